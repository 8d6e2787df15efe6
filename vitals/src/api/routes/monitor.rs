//! Monitor routes: the read surface over collected resource samples.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{SampleHistoryResponse, SampleResponse};
use crate::api::server::AppState;

/// Default number of samples returned by the history endpoint.
const DEFAULT_HISTORY_LIMIT: i32 = 20;

/// Upper bound on the history page size.
const MAX_HISTORY_LIMIT: i32 = 500;

/// Create the monitor router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(latest_sample))
        .route("/samples", get(sample_history))
}

/// Latest persisted sample for this host.
///
/// Reflects only what was successfully persisted: a gap in the series is
/// the only visible symptom of dropped samples.
async fn latest_sample(State(state): State<AppState>) -> ApiResult<Json<SampleResponse>> {
    let sample = state
        .metrics_store
        .latest_sample(&state.host)
        .await?
        .ok_or_else(|| ApiError::not_found("No samples recorded yet"))?;

    Ok(Json(SampleResponse::from(sample)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i32>,
}

/// Most recent samples for this host, ordered by sampling timestamp
/// descending (not insertion order).
async fn sample_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<SampleHistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let samples = state.metrics_store.recent_samples(&state.host, limit).await?;

    Ok(Json(SampleHistoryResponse {
        host: state.host.clone(),
        count: samples.len(),
        samples: samples.into_iter().map(SampleResponse::from).collect(),
    }))
}
