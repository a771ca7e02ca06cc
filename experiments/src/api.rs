use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status an experiment resolves to for a given user. Most experiments
/// are plain on/off switches; multivariate ones resolve to a variant key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureStatus {
    Boolean(bool),
    Variant(String),
}

impl FeatureStatus {
    pub fn is_enabled(&self) -> bool {
        match self {
            FeatureStatus::Boolean(enabled) => *enabled,
            FeatureStatus::Variant(_) => true,
        }
    }
}

impl Default for FeatureStatus {
    fn default() -> Self {
        FeatureStatus::Boolean(false)
    }
}

impl From<bool> for FeatureStatus {
    fn from(enabled: bool) -> Self {
        FeatureStatus::Boolean(enabled)
    }
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExperimentsResponse {
    pub bucket: u32,
    pub features: HashMap<String, FeatureStatus>,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeatureResponse {
    pub name: String,
    pub status: FeatureStatus,
}

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("remote request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("failed to parse remote configuration: {0}")]
    ConfigParsingError(#[from] serde_json::Error),

    #[error("remote configuration unavailable: {0}")]
    RemoteUnavailable(String),
}
