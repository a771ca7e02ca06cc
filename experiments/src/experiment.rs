use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::api::FeatureStatus;

const LONG_SCALE: u64 = 0xfffffffffffffff;

/// Buckets partition the user base for targeting. A user keeps the bucket
/// stored in their token; new users get one derived from their identifier.
const BUCKET_COUNT: u64 = 1024;

/// A single experiment rule as declared on the experiments server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExperimentDefinition {
    pub name: String,
    #[serde(default)]
    pub default: FeatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<f32>,
}

/// One domain's slice of the remote configuration blob.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub experiments: Vec<ExperimentDefinition>,
}

/// Deterministic assignment context for one user in one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentContext {
    pub bucket: u32,
    pub identifier: String,
}

/// One domain's experiment readout for one request. `dirty_features` carries
/// the client's overrides forward so they survive the next token round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExperiments {
    pub bucket: u32,
    pub stamp: String,
    pub features: HashMap<String, FeatureStatus>,
    pub dirty_features: HashMap<String, FeatureStatus>,
}

/// One namespace of experiments: the `app` domain is global, the `shared`
/// domain is per-user. Owns the current rule set and its revision stamp.
#[derive(Debug, Clone, Default)]
pub struct ExperimentDomain {
    experiments: Vec<ExperimentDefinition>,
    stamp: Option<String>,
}

impl ExperimentDomain {
    /// Ingests a configuration blob and returns its content-derived stamp.
    /// The same definitions and reference always produce the same stamp, so
    /// callers can compare stamps to detect stale user-held state.
    pub fn configure(&mut self, config: DomainConfig, reference: &str) -> String {
        let stamp = config_stamp(&config, reference);
        self.experiments = config.experiments;
        self.stamp = Some(stamp.clone());
        stamp
    }

    pub fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    /// Builds the assignment context for a user. Deterministic: the same
    /// bucket and identifier always yield the same context, which is what
    /// keeps experiment membership stable across requests.
    pub fn context_for(&self, bucket: Option<u32>, id: Option<&str>) -> ExperimentContext {
        let identifier = id.unwrap_or_default().to_string();
        let bucket = bucket.unwrap_or_else(|| assign_bucket(&identifier));
        ExperimentContext { bucket, identifier }
    }

    /// Evaluates every known experiment for this context. A dirty override
    /// wins verbatim over whatever the server rules would compute, and
    /// overrides for experiments the server no longer knows about are still
    /// honored until the client state is refreshed.
    pub fn read_for(
        &self,
        context: &ExperimentContext,
        dirty: &HashMap<String, FeatureStatus>,
    ) -> ResolvedExperiments {
        let mut features = HashMap::with_capacity(self.experiments.len());
        for experiment in &self.experiments {
            let status = match dirty.get(&experiment.name) {
                Some(overridden) => overridden.clone(),
                None => self.evaluate(experiment, context),
            };
            features.insert(experiment.name.clone(), status);
        }
        for (name, status) in dirty {
            features
                .entry(name.clone())
                .or_insert_with(|| status.clone());
        }

        ResolvedExperiments {
            bucket: context.bucket,
            stamp: self.stamp.clone().unwrap_or_default(),
            features,
            dirty_features: dirty.clone(),
        }
    }

    /// This domain's status for a feature, `None` if it has no opinion.
    pub fn feature(&self, name: &str, resolved: &ResolvedExperiments) -> Option<FeatureStatus> {
        resolved.features.get(name).cloned()
    }

    fn evaluate(
        &self,
        experiment: &ExperimentDefinition,
        context: &ExperimentContext,
    ) -> FeatureStatus {
        match experiment.rollout_percentage {
            Some(percentage) if percentage <= 0.0 => FeatureStatus::Boolean(false),
            Some(percentage) if percentage >= 100.0 => FeatureStatus::Boolean(true),
            Some(percentage) => {
                let hash = rollout_hash(&experiment.name, context);
                FeatureStatus::Boolean(hash < f64::from(percentage) / 100.0)
            }
            None => experiment.default.clone(),
        }
    }
}

/// This function takes an experiment name and a context and returns a float
/// between 0 and 1. Given the same inputs, it'll always return the same
/// float. These floats are uniformly distributed, so if we want to show an
/// experiment to 20% of traffic we can do rollout_hash(..) < 0.2.
fn rollout_hash(name: &str, context: &ExperimentContext) -> f64 {
    let hash_key = format!("{}.{}.{}", name, context.identifier, context.bucket);
    let hex_str = sha1_hex(hash_key.as_bytes());
    let hash_val = u64::from_str_radix(&hex_str[..15], 16).unwrap_or(0);

    hash_val as f64 / LONG_SCALE as f64
}

fn assign_bucket(identifier: &str) -> u32 {
    let hex_str = sha1_hex(identifier.as_bytes());
    let hash_val = u64::from_str_radix(&hex_str[..15], 16).unwrap_or(0);

    (hash_val % BUCKET_COUNT) as u32
}

fn config_stamp(config: &DomainConfig, reference: &str) -> String {
    let serialized = serde_json::to_string(config).unwrap_or_default();
    sha1_hex(format!("{}:{}", serialized, reference).as_bytes())
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    result.iter().fold(String::new(), |mut acc, byte| {
        let _ = write!(acc, "{:02x}", byte);
        acc
    })
}
