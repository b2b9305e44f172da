//! Station Routes

use axum::{
    extract::{Query, State},
    Json,
};
use feed_client::StationSample;
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, SeriesMeta, SeriesQuery, SeriesResponse, MAX_SERIES_LIMIT};
use crate::AppState;

/// Monitored station
#[derive(Debug, Serialize)]
pub struct StationInfo {
    pub code: String,
    pub label: String,
}

/// Response for the latest station reading
#[derive(Debug, Serialize)]
pub struct StationLatestResponse {
    pub data: StationSample,
    pub station: StationInfo,
}

/// Get the most recent station sample
pub async fn get_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StationLatestResponse>, ApiError> {
    let data = state.repository.station().latest()?;

    Ok(Json(StationLatestResponse {
        data,
        station: StationInfo {
            code: state.station_code.clone(),
            label: state.station_label.clone(),
        },
    }))
}

/// Get recent station samples, oldest first
pub async fn get_series(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeriesQuery>,
) -> Result<Json<SeriesResponse<StationSample>>, ApiError> {
    let store = state.repository.station();
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
