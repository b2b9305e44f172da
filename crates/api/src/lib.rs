//! HF Propagation Monitor Service
//!
//! Wires the feed clients, stores and fetch scheduler together and serves
//! the read API over the stored series.

use axum::{extract::State, routing::get, Json, Router};
use feed_client::{build_http_client, SolarClient, StationClient};
use fetch_scheduler::FetchScheduler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use storage::{Repository, SeriesStore};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod observability;
pub mod routes;
pub mod settings;

pub use observability::{init_logging, init_metrics, LogFormat};
pub use settings::{Settings, SettingsError};

/// Application state shared across handlers
pub struct AppState {
    /// Both feed stores
    pub repository: Repository,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
    /// Monitored station code
    pub station_code: String,
    /// Human-readable station location
    pub station_label: String,
}

impl AppState {
    /// Create new application state
    pub fn new(repository: Repository, station_code: String, station_label: String) -> Self {
        Self {
            repository,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            station_code,
            station_label,
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub stores: StoreStatuses,
}

#[derive(Debug, Serialize)]
pub struct StoreStatuses {
    pub station: StoreStatus,
    pub solar: StoreStatus,
}

/// Size of one store
#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub samples: usize,
    pub bytes: u64,
    pub max_bytes: u64,
    /// Set when the store could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreStatus {
    fn of<T: series::Record>(store: &SeriesStore<T>) -> Self {
        let max_bytes = store.max_file_size();
        match store.len().and_then(|samples| Ok((samples, store.encoded_len()?))) {
            Ok((samples, bytes)) => Self {
                samples,
                bytes,
                max_bytes,
                error: None,
            },
            Err(e) => {
                warn!(store = store.name(), error = %e, "Store unreadable for health check");
                Self {
                    samples: 0,
                    bytes: 0,
                    max_bytes,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/station/latest", get(routes::station::get_latest))
        .route("/api/v1/station/series", get(routes::station::get_series))
        .route("/api/v1/solar/latest", get(routes::solar::get_latest))
        .route("/api/v1/solar/series", get(routes::solar::get_series))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let stores = StoreStatuses {
        station: StoreStatus::of(state.repository.station()),
        solar: StoreStatus::of(state.repository.solar()),
    };
    let status = if stores.station.error.is_none() && stores.solar.error.is_none() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        stores,
    })
}

/// Cancel `token` on Ctrl+C
fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        token.cancel();
    });
}

/// Run the service until Ctrl+C
///
/// Opens both stores, starts the fetch scheduler in the background (priming
/// empty stores first) and serves the read API. On shutdown the server stops
/// accepting requests and the scheduler finishes its current cycle.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    if let Some(port) = settings.metrics.port {
        init_metrics(port)?;
    }

    let repository = Repository::open(&settings.storage_config())?;

    let feed_config = settings.feed_config();
    let http = build_http_client(&feed_config)?;
    let mut scheduler = FetchScheduler::new(
        settings.scheduler_config(),
        StationClient::new(http.clone(), &feed_config),
        Arc::clone(repository.station()),
        SolarClient::new(http, &feed_config),
        Arc::clone(repository.solar()),
    );

    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    let scheduler_token = shutdown.child_token();
    let scheduler_task = tokio::spawn(async move {
        tokio::select! {
            _ = scheduler_token.cancelled() => return 0,
            _ = scheduler.prime() => {}
        }
        scheduler.run(scheduler_token).await
    });

    let state = Arc::new(AppState::new(
        repository,
        settings.feeds.station_code.clone(),
        settings.feeds.station_label.clone(),
    ));
    let addr = settings.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    let server_token = shutdown.clone();
    let served = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await;

    // Server may also stop on error; the scheduler must follow either way
    shutdown.cancel();
    let cycles = scheduler_task.await?;
    info!(cycles, "Shutdown complete");

    served?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::DateTime;
    use feed_client::{SolarSample, StationSample};
    use serde_json::Value;
    use storage::StorageConfig;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        let config = StorageConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let repository = Repository::open(&config).unwrap();
        Arc::new(AppState::new(
            repository,
            "EA036".to_string(),
            "El Arenosillo, Spain".to_string(),
        ))
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = create_router(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn station_sample(minute: u32) -> StationSample {
        StationSample {
            time: Some(format!("2024-01-01T00:{minute:02}:00")),
            muf: Some(18.2),
            fof2: Some(6.1),
        }
    }

    #[tokio::test]
    async fn test_latest_on_empty_store_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let (status, body) = get(&state, "/api/v1/station/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "no_data");
        assert_eq!(body["store"], "station");

        let (status, body) = get(&state, "/api/v1/solar/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["store"], "solar");
    }

    #[tokio::test]
    async fn test_station_latest() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.repository.station().append(station_sample(0)).unwrap();
        state.repository.station().append(station_sample(5)).unwrap();

        let (status, body) = get(&state, "/api/v1/station/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["time"], "2024-01-01T00:05:00");
        assert_eq!(body["data"]["muf"], 18.2);
        assert_eq!(body["station"]["code"], "EA036");
        assert_eq!(body["station"]["label"], "El Arenosillo, Spain");
    }

    #[tokio::test]
    async fn test_station_latest_keeps_missing_fields_null() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state
            .repository
            .station()
            .append(StationSample {
                time: Some("2024-01-01T00:00:00".to_string()),
                muf: None,
                fof2: Some(4.2),
            })
            .unwrap();

        let (_, body) = get(&state, "/api/v1/station/latest").await;
        assert!(body["data"]["muf"].is_null());
        assert_eq!(body["data"]["fof2"], 4.2);
    }

    #[tokio::test]
    async fn test_series_limit_returns_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        for minute in 0..5 {
            state.repository.station().append(station_sample(minute)).unwrap();
        }

        let (status, body) = get(&state, "/api/v1/station/series?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["count"], 2);
        assert_eq!(body["meta"]["total"], 5);
        assert_eq!(body["data"][0]["time"], "2024-01-01T00:03:00");
        assert_eq!(body["data"][1]["time"], "2024-01-01T00:04:00");

        let (_, body) = get(&state, "/api/v1/station/series").await;
        assert_eq!(body["meta"]["count"], 5);
        assert_eq!(body["meta"]["limit"], 100);
    }

    #[tokio::test]
    async fn test_solar_routes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state
            .repository
            .solar()
            .append(SolarSample {
                time: DateTime::from_timestamp(200, 0).unwrap(),
                ssn: 95,
                sfi: 142,
            })
            .unwrap();

        let (status, body) = get(&state, "/api/v1/solar/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ssn"], 95);
        assert_eq!(body["data"]["sfi"], 142);

        let (_, body) = get(&state, "/api/v1/solar/series").await;
        assert_eq!(body["meta"]["count"], 1);
    }

    #[tokio::test]
    async fn test_health_reports_store_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.repository.station().append(station_sample(0)).unwrap();

        let (status, body) = get(&state, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stores"]["station"]["samples"], 1);
        assert_eq!(body["stores"]["solar"]["samples"], 0);
        assert_eq!(body["stores"]["station"]["max_bytes"], 209_715_200);
        assert!(body["stores"]["station"]["bytes"].as_u64().unwrap() > 0);
        assert!(body["stores"]["station"].get("error").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/v1/sensors/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
