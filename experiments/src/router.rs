use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config_cache::ConfigCache;
use crate::endpoint;
use crate::resolver::{self, UserStore};

#[derive(Clone)]
pub struct State {
    pub cache: Arc<ConfigCache>,
    pub user_store: Arc<dyn UserStore>,
}

async fn index() -> &'static str {
    "experiments"
}

async fn liveness(
    axum::extract::State(state): axum::extract::State<State>,
) -> Result<&'static str, (StatusCode, String)> {
    if state.cache.fetched() {
        Ok("live")
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "no experiment configuration fetched yet".to_string(),
        ))
    }
}

pub fn router(cache: Arc<ConfigCache>, user_store: Arc<dyn UserStore>) -> Router {
    let state = State { cache, user_store };

    // Resolution only runs where downstream handlers actually query features.
    let experiment_routes = Router::new()
        .route("/experiments", get(endpoint::experiments))
        .route("/experiments/:name", get(endpoint::feature))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolver::resolve_experiments,
        ));

    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .merge(experiment_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
