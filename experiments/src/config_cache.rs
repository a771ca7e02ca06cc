use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::experiment::{ExperimentDomain, ResolvedExperiments};
use crate::remote::{RemoteClient, RemoteConfig};
use crate::user_state::UserState;

/// Both domains' resolved experiments for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPair {
    pub app: ResolvedExperiments,
    pub shared: ResolvedExperiments,
}

#[derive(Debug, Default)]
struct CacheState {
    last_fetch: Option<RemoteConfig>,
    fetched: bool,
    app: ExperimentDomain,
    shared: ExperimentDomain,
}

/// Process-wide holder of the last known good experiment configuration.
///
/// Updated by refresh completions, read by every request. Updates take the
/// write lock for a single assignment, so readers always observe either the
/// prior or the fully-applied configuration, never a partial one.
#[derive(Default)]
pub struct ConfigCache {
    state: RwLock<CacheState>,
}

impl ConfigCache {
    pub fn new() -> ConfigCache {
        ConfigCache::default()
    }

    /// Fetches the remote configuration and applies the outcome. A failed
    /// fetch degrades to the caller-declared defaults and is swallowed here:
    /// request handling never sees it.
    pub async fn refresh(&self, client: &dyn RemoteClient) {
        match client.load().await {
            Ok(config) => self.apply(config, client.reference(), false),
            Err(failure) => {
                tracing::warn!(error = %failure.error, "experiment fetch failed");
                self.apply(failure.defaults, client.reference(), true);
            }
        }
    }

    /// Announces this app's experiment declarations and applies whatever
    /// configuration the remote responds with, through the same
    /// success/failure handling as `refresh`.
    pub async fn announce(&self, client: &dyn RemoteClient) {
        match client.announce().await {
            Ok(config) => self.apply(config, client.reference(), false),
            Err(failure) => {
                tracing::warn!(error = %failure.error, "experiment announce failed");
                self.apply(failure.defaults, client.reference(), true);
            }
        }
    }

    /// Ingests a fetched configuration.
    ///
    /// `optional` marks fallback defaults: if a successful fetch has already
    /// landed, they are ignored. Stale-but-valid data outranks defaults, so
    /// a startup fetch that succeeds once is never regressed by later
    /// failures. The app domain always configures (defaulting to an empty
    /// rule set); the shared domain only when the blob carries it.
    pub fn apply(&self, config: RemoteConfig, reference: &str, optional: bool) {
        let mut state = self.write();

        if optional && state.fetched {
            tracing::debug!("keeping previously fetched configuration over defaults");
            return;
        }

        state
            .app
            .configure(config.app.clone().unwrap_or_default(), reference);
        if let Some(shared) = config.shared.clone() {
            state.shared.configure(shared, reference);
        }

        state.fetched = true;
        state.last_fetch = Some(config);
    }

    /// Resolves both domains for a user under a single read of the current
    /// configuration.
    pub fn resolve(&self, user: &UserState) -> ResolvedPair {
        let state = self.read();

        let app_context = state.app.context_for(user.bucket, user.id.as_deref());
        let shared_context = state.shared.context_for(user.bucket, user.id.as_deref());

        ResolvedPair {
            app: state.app.read_for(&app_context, &user.app.dirty),
            shared: state.shared.read_for(&shared_context, &user.shared.dirty),
        }
    }

    /// Whether any fetch (or defaults application) has landed yet.
    pub fn fetched(&self) -> bool {
        self.read().fetched
    }

    pub fn last_fetch(&self) -> Option<RemoteConfig> {
        self.read().last_fetch.clone()
    }

    /// Current per-domain configuration stamps, `None` while unconfigured.
    pub fn stamps(&self) -> (Option<String>, Option<String>) {
        let state = self.read();
        (
            state.app.stamp().map(str::to_string),
            state.shared.stamp().map(str::to_string),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().expect("config cache lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().expect("config cache lock poisoned")
    }
}
