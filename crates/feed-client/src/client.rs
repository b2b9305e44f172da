//! HTTP Plumbing Shared by the Feed Clients

use crate::error::FeedError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Default station list endpoint
pub const DEFAULT_STATION_URL: &str = "https://prop.kc2g.com/api/stations.json";
/// Default solar index endpoint
pub const DEFAULT_SOLAR_URL: &str = "https://prop.kc2g.com/api/essn.json";
/// Default ionosonde (El Arenosillo)
pub const DEFAULT_STATION_CODE: &str = "EA036";
/// Default HTTP request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// A remote source producing one sample per fetch
#[async_trait]
pub trait Feed: Send + Sync {
    /// Normalized record produced by this feed
    type Sample: Send + 'static;

    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Fetch and normalize the current sample
    async fn fetch(&self) -> Result<Self::Sample, FeedError>;
}

/// Feed endpoint configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Station list URL
    pub station_url: String,
    /// Solar index URL (without query string)
    pub solar_url: String,
    /// Station identifier to extract from the station list
    pub station_code: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            station_url: DEFAULT_STATION_URL.to_string(),
            solar_url: DEFAULT_SOLAR_URL.to_string(),
            station_code: DEFAULT_STATION_CODE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Build the HTTP client shared by both feeds
pub fn build_http_client(config: &FeedConfig) -> Result<reqwest::Client, FeedError> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("propagation-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FeedError::Config(format!("Failed to create HTTP client: {}", e)))?;

    info!(
        timeout_ms = config.request_timeout.as_millis() as u64,
        "Created feed HTTP client"
    );
    Ok(client)
}

/// GET `url` and decode the body as JSON
pub(crate) async fn get_json(
    http: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    timeout: Duration,
) -> Result<Value, FeedError> {
    debug!(url, ?query, "Requesting feed");

    let response = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| map_send_error(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        return Err(FeedError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| map_send_error(e, timeout))?;
    let json = serde_json::from_str(&body)?;
    Ok(json)
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> FeedError {
    if err.is_timeout() {
        FeedError::Timeout(timeout.as_millis() as u64)
    } else {
        FeedError::from(err)
    }
}

/// Read a JSON value as `f64`, accepting numeric strings
pub(crate) fn value_as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
