use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use uuid::Uuid;

use crate::api::FeatureStatus;
use crate::config_cache::ResolvedPair;
use crate::router;
use crate::user_state::{self, DecodeOutcome, UserState};

/// Outcome of the read hook. `Corrupt` means state was persisted but could
/// not be decoded: resolution proceeds with a fresh state and the store is
/// told to discard whatever it held.
pub enum UserRead {
    Found(UserState),
    Missing,
    Corrupt,
}

/// Pluggable persistence hooks for user experiment state. The default reads
/// and writes the token through a cookie, but callers can plug any other
/// transport without touching resolution.
pub trait UserStore: Send + Sync {
    fn read_user(&self, headers: &HeaderMap) -> UserRead;

    fn save_user(&self, id: &str, resolved: &ResolvedPair, response: &mut Response);

    fn clear_user(&self, response: &mut Response);
}

/// Default store: the token rides in a percent-encoded cookie with a fixed
/// max-age. A visitor without a cookie gets a fresh uuid so the save hook
/// has an identity to persist under.
pub struct CookieUserStore {
    cookie_name: String,
    max_age_secs: u64,
}

impl CookieUserStore {
    pub fn new(cookie_name: String, max_age_secs: u64) -> CookieUserStore {
        CookieUserStore {
            cookie_name,
            max_age_secs,
        }
    }

    fn cookie_value(&self, headers: &HeaderMap) -> Option<String> {
        for header in headers.get_all(COOKIE) {
            let Ok(cookies) = header.to_str() else {
                continue;
            };
            for pair in cookies.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    if name == self.cookie_name {
                        return Some(percent_decode_str(value).decode_utf8_lossy().into_owned());
                    }
                }
            }
        }
        None
    }

    fn set_cookie(&self, response: &mut Response, value: &str, max_age_secs: u64) {
        let header = format!(
            "{}={}; Max-Age={}; Path=/",
            self.cookie_name, value, max_age_secs
        );
        match HeaderValue::from_str(&header) {
            Ok(header) => {
                response.headers_mut().append(SET_COOKIE, header);
            }
            Err(e) => tracing::error!(error = %e, "could not build experiment cookie header"),
        }
    }
}

impl UserStore for CookieUserStore {
    fn read_user(&self, headers: &HeaderMap) -> UserRead {
        let Some(raw) = self.cookie_value(headers) else {
            return UserRead::Missing;
        };

        match user_state::decode(&raw) {
            DecodeOutcome::State(user) => UserRead::Found(user),
            DecodeOutcome::Malformed => {
                tracing::warn!("stored experiment state did not decode, resetting");
                UserRead::Corrupt
            }
        }
    }

    fn save_user(&self, id: &str, resolved: &ResolvedPair, response: &mut Response) {
        let token = match user_state::encode(id, &resolved.app, &resolved.shared) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize user experiment state");
                return;
            }
        };

        let encoded = utf8_percent_encode(&token, NON_ALPHANUMERIC).to_string();
        self.set_cookie(response, &encoded, self.max_age_secs);
    }

    fn clear_user(&self, response: &mut Response) {
        self.set_cookie(response, "", 0);
    }
}

/// Attached to every request as an extension; downstream handlers query this
/// instead of touching the domains directly. Cheap to clone.
#[derive(Clone)]
pub struct FeatureHandle {
    resolved: Arc<ResolvedPair>,
}

impl FeatureHandle {
    pub fn new(resolved: ResolvedPair) -> FeatureHandle {
        FeatureHandle {
            resolved: Arc::new(resolved),
        }
    }

    /// Merged feature query. The app domain's status wins when defined, the
    /// shared domain is the fallback layer. Precedence is about definedness,
    /// not truthiness: an explicitly-false app status beats a true shared
    /// one.
    pub fn feature_or(&self, name: &str, fallback: FeatureStatus) -> FeatureStatus {
        let app = self.resolved.app.features.get(name);
        let shared = self.resolved.shared.features.get(name);

        app.or(shared).cloned().unwrap_or(fallback)
    }

    pub fn feature(&self, name: &str) -> FeatureStatus {
        self.feature_or(name, FeatureStatus::Boolean(false))
    }

    /// Merged per-feature view with app precedence, for reporting.
    pub fn merged_features(&self) -> HashMap<String, FeatureStatus> {
        let mut merged = self.resolved.shared.features.clone();
        merged.extend(self.resolved.app.features.clone());
        merged
    }

    pub fn bucket(&self) -> u32 {
        self.resolved.app.bucket
    }
}

/// Per-request orchestration: read the persisted user state, resolve both
/// domains against the current configuration, expose the merged query to
/// the inner handler, then persist the refreshed state on the way out.
///
/// Persistence is unconditional for users with an id; re-issuing the token
/// on every response also refreshes its max-age.
pub async fn resolve_experiments(
    axum::extract::State(state): axum::extract::State<router::State>,
    mut request: Request,
    next: Next,
) -> Response {
    let (user, corrupt) = match state.user_store.read_user(request.headers()) {
        UserRead::Found(user) => (user, false),
        UserRead::Missing => (fresh_user(), false),
        UserRead::Corrupt => (fresh_user(), true),
    };

    let resolved = state.cache.resolve(&user);
    request
        .extensions_mut()
        .insert(FeatureHandle::new(resolved.clone()));

    let mut response = next.run(request).await;

    if corrupt {
        state.user_store.clear_user(&mut response);
    }
    if let Some(id) = user.id.as_deref() {
        state.user_store.save_user(id, &resolved, &mut response);
    }

    response
}

fn fresh_user() -> UserState {
    UserState {
        id: Some(Uuid::now_v7().to_string()),
        ..UserState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ResolvedExperiments;
    use axum::body::Body;

    fn resolved_with(
        app: Vec<(&str, FeatureStatus)>,
        shared: Vec<(&str, FeatureStatus)>,
    ) -> ResolvedPair {
        let to_map = |pairs: Vec<(&str, FeatureStatus)>| {
            pairs
                .into_iter()
                .map(|(name, status)| (name.to_string(), status))
                .collect::<HashMap<_, _>>()
        };
        ResolvedPair {
            app: ResolvedExperiments {
                bucket: 1,
                stamp: "s1".to_string(),
                features: to_map(app),
                dirty_features: HashMap::new(),
            },
            shared: ResolvedExperiments {
                bucket: 1,
                stamp: "s2".to_string(),
                features: to_map(shared),
                dirty_features: HashMap::new(),
            },
        }
    }

    #[test]
    fn app_status_wins_by_definedness() {
        let handle = FeatureHandle::new(resolved_with(
            vec![("f", FeatureStatus::Boolean(false))],
            vec![("f", FeatureStatus::Boolean(true))],
        ));

        assert_eq!(handle.feature("f"), FeatureStatus::Boolean(false));
    }

    #[test]
    fn shared_status_fills_in_when_app_has_no_opinion() {
        let handle = FeatureHandle::new(resolved_with(
            vec![],
            vec![("f", FeatureStatus::Boolean(true))],
        ));

        assert_eq!(handle.feature("f"), FeatureStatus::Boolean(true));
    }

    #[test]
    fn unknown_feature_returns_the_fallback() {
        let handle = FeatureHandle::new(resolved_with(vec![], vec![]));

        assert_eq!(handle.feature("ghost"), FeatureStatus::Boolean(false));
        assert_eq!(
            handle.feature_or(
                "ghost",
                FeatureStatus::Variant("fallback-value".to_string())
            ),
            FeatureStatus::Variant("fallback-value".to_string())
        );
    }

    #[test]
    fn merged_view_prefers_app() {
        let handle = FeatureHandle::new(resolved_with(
            vec![("f", FeatureStatus::Boolean(false))],
            vec![
                ("f", FeatureStatus::Boolean(true)),
                ("g", FeatureStatus::Boolean(true)),
            ],
        ));

        let merged = handle.merged_features();
        assert_eq!(merged.get("f"), Some(&FeatureStatus::Boolean(false)));
        assert_eq!(merged.get("g"), Some(&FeatureStatus::Boolean(true)));
    }

    #[test]
    fn cookie_store_reads_its_own_cookie() {
        let store = CookieUserStore::new("xpr.config".to_string(), 900);
        let pair = resolved_with(vec![], vec![]);

        let mut response = Response::new(Body::empty());
        store.save_user("u1", &pair, &mut response);

        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .expect("save_user should set a cookie")
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.contains("Max-Age=900"));

        let cookie_pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie_pair).unwrap());

        match store.read_user(&headers) {
            UserRead::Found(user) => {
                assert_eq!(user.id.as_deref(), Some("u1"));
                assert_eq!(user.bucket, Some(1));
                assert_eq!(user.app.stamp, "s1");
            }
            _ => panic!("expected the round-tripped cookie to decode"),
        }
    }

    #[test]
    fn corrupt_cookie_reads_as_corrupt_and_clear_expires_it() {
        let store = CookieUserStore::new("xpr.config".to_string(), 900);

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("xpr.config=garbage-not-matching-grammar"),
        );
        assert!(matches!(store.read_user(&headers), UserRead::Corrupt));

        let mut response = Response::new(Body::empty());
        store.clear_user(&mut response);
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[test]
    fn missing_cookie_reads_as_missing() {
        let store = CookieUserStore::new("xpr.config".to_string(), 900);
        assert!(matches!(store.read_user(&HeaderMap::new()), UserRead::Missing));
    }
}
