//! Solar Index Routes

use axum::{
    extract::{Query, State},
    Json,
};
use feed_client::SolarSample;
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, SeriesMeta, SeriesQuery, SeriesResponse, MAX_SERIES_LIMIT};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SolarLatestResponse {
    pub data: SolarSample,
}

/// Get the most recent solar sample
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SolarLatestResponse>, ApiError> {
    let data = state.repository.solar().latest()?;
    Ok(Json(SolarLatestResponse { data }))
}

/// Get recent solar samples, oldest first
pub async fn get_series(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeriesQuery>,
) -> Result<Json<SeriesResponse<SolarSample>>, ApiError> {
    let store = state.repository.solar();
    let limit = params.limit.min(MAX_SERIES_LIMIT);
    let data = store.tail(limit)?;

    Ok(Json(SeriesResponse {
        meta: SeriesMeta {
            count: data.len(),
            limit,
            total: store.len()?,
        },
        data,
    }))
}
