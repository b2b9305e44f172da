//! Read Routes

pub mod solar;
pub mod station;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use storage::StorageError;
use tracing::error;

/// Upper bound on `?limit=` for series endpoints
pub const MAX_SERIES_LIMIT: usize = 10_000;

/// Query parameters for series endpoints
#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    /// Most recent samples to return
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Response for series endpoints
#[derive(Debug, Serialize)]
pub struct SeriesResponse<T> {
    pub data: Vec<T>,
    pub meta: SeriesMeta,
}

#[derive(Debug, Serialize)]
pub struct SeriesMeta {
    pub count: usize,
    pub limit: usize,
    /// Samples held by the store
    pub total: usize,
}

/// Store read failure rendered as an HTTP response
pub struct ApiError(StorageError);

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            StorageError::EmptySeries(store) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "status": "no_data", "store": store })),
            )
                .into_response(),
            err => {
                error!(error = %err, "Store read failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "status": "error", "message": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
