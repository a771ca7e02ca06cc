use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::ExperimentError;
use crate::experiment::DomainConfig;

/// The blob returned by the experiments server. Either domain may be absent;
/// an absent domain leaves the corresponding local rules untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<DomainConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<DomainConfig>,
}

/// A failed fetch paired with the defaults the caller declared up front.
/// The cache consumes this as the "optional" configuration path: defaults
/// apply only when nothing better has ever been fetched.
#[derive(Debug)]
pub struct FetchFailure {
    pub error: ExperimentError,
    pub defaults: RemoteConfig,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn load(&self) -> Result<RemoteConfig, FetchFailure>;

    /// Announces this app's experiment declarations to the remote and
    /// returns the authoritative configuration it responds with.
    async fn announce(&self) -> Result<RemoteConfig, FetchFailure>;

    /// Opaque deployment reference, carried into configuration stamps.
    fn reference(&self) -> &str;
}

pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    reference: String,
    defaults: RemoteConfig,
}

impl HttpRemoteClient {
    pub fn new(
        base_url: &str,
        reference: &str,
        timeout: Duration,
    ) -> Result<HttpRemoteClient, ExperimentError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpRemoteClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            reference: reference.to_string(),
            defaults: RemoteConfig::default(),
        })
    }

    /// Declares the configuration to fall back to while the remote is
    /// unreachable and no fetch has succeeded yet.
    pub fn with_defaults(mut self, defaults: RemoteConfig) -> Self {
        self.defaults = defaults;
        self
    }

    fn failure(&self, error: ExperimentError) -> FetchFailure {
        FetchFailure {
            error,
            defaults: self.defaults.clone(),
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn load(&self) -> Result<RemoteConfig, FetchFailure> {
        let response = self
            .http
            .get(format!("{}/config", self.base_url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.failure(e.into()))?;

        response
            .json::<RemoteConfig>()
            .await
            .map_err(|e| self.failure(e.into()))
    }

    async fn announce(&self) -> Result<RemoteConfig, FetchFailure> {
        let response = self
            .http
            .post(format!("{}/announce", self.base_url))
            .json(&self.defaults)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.failure(e.into()))?;

        response
            .json::<RemoteConfig>()
            .await
            .map_err(|e| self.failure(e.into()))
    }

    fn reference(&self) -> &str {
        &self.reference
    }
}

/// In-memory stand-in for the experiments server, for tests. Configured
/// results are returned as-is; an unset result simulates a fetch failure
/// carrying the declared defaults.
#[derive(Clone, Default)]
pub struct MockRemoteClient {
    load_ret: Option<RemoteConfig>,
    announce_ret: Option<RemoteConfig>,
    defaults: RemoteConfig,
    reference: String,
}

impl MockRemoteClient {
    pub fn new() -> MockRemoteClient {
        MockRemoteClient {
            reference: "mock-ref".to_string(),
            ..MockRemoteClient::default()
        }
    }

    pub fn load_ret(&mut self, ret: Option<RemoteConfig>) -> Self {
        self.load_ret = ret;

        self.clone()
    }

    pub fn announce_ret(&mut self, ret: Option<RemoteConfig>) -> Self {
        self.announce_ret = ret;

        self.clone()
    }

    pub fn defaults_ret(&mut self, defaults: RemoteConfig) -> Self {
        self.defaults = defaults;

        self.clone()
    }

    fn outcome(&self, ret: &Option<RemoteConfig>) -> Result<RemoteConfig, FetchFailure> {
        match ret {
            Some(config) => Ok(config.clone()),
            None => Err(FetchFailure {
                error: ExperimentError::RemoteUnavailable("mock remote is down".to_string()),
                defaults: self.defaults.clone(),
            }),
        }
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn load(&self) -> Result<RemoteConfig, FetchFailure> {
        self.outcome(&self.load_ret)
    }

    async fn announce(&self) -> Result<RemoteConfig, FetchFailure> {
        self.outcome(&self.announce_ret)
    }

    fn reference(&self) -> &str {
        &self.reference
    }
}
