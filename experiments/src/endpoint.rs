use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;

use crate::api::{ExperimentsResponse, FeatureResponse, FeatureStatus};
use crate::resolver::FeatureHandle;

/// The requester's merged feature set, as resolved by the middleware.
pub async fn experiments(
    Extension(features): Extension<FeatureHandle>,
) -> Json<ExperimentsResponse> {
    Json(ExperimentsResponse {
        bucket: features.bucket(),
        features: features.merged_features(),
    })
}

#[derive(Deserialize, Default)]
pub struct FeatureQueryParams {
    pub fallback: Option<String>,
}

impl FeatureQueryParams {
    /// `fallback=true`/`false` mean the boolean statuses; anything else is a
    /// variant key.
    fn fallback_status(&self) -> FeatureStatus {
        match self.fallback.as_deref() {
            None => FeatureStatus::Boolean(false),
            Some("true") => FeatureStatus::Boolean(true),
            Some("false") => FeatureStatus::Boolean(false),
            Some(variant) => FeatureStatus::Variant(variant.to_string()),
        }
    }
}

/// Single feature query, the HTTP face of `feature(name, fallback)`.
pub async fn feature(
    Path(name): Path<String>,
    Query(params): Query<FeatureQueryParams>,
    Extension(features): Extension<FeatureHandle>,
) -> Json<FeatureResponse> {
    let status = features.feature_or(&name, params.fallback_status());

    Json(FeatureResponse { name, status })
}
