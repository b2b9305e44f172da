//! Solar Index Feed Client
//!
//! Requests the last day of SSN/SFI entries and keeps the most recent one.

use crate::client::{get_json, value_as_f64, Feed, FeedConfig};
use crate::error::FeedError;
use crate::sample::SolarSample;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Key of the 24 hour window in the solar payload
const WINDOW_KEY: &str = "24h";

/// Client for the solar index feed
pub struct SolarClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl SolarClient {
    /// Create a solar client on a shared HTTP client
    pub fn new(http: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            http,
            url: config.solar_url.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl Feed for SolarClient {
    type Sample = SolarSample;

    fn name(&self) -> &'static str {
        "solar"
    }

    async fn fetch(&self) -> Result<SolarSample, FeedError> {
        let body = get_json(&self.http, &self.url, &[("days", "1")], self.timeout).await?;
        let sample = parse_solar(&body)?;
        debug!(
            time = %sample.time,
            ssn = sample.ssn,
            sfi = sample.sfi,
            "Parsed solar sample"
        );
        Ok(sample)
    }
}

/// Select the latest entry of the 24 hour window
///
/// Entries without a usable `time`, `ssn` or `sfi` are skipped. On equal
/// timestamps the later entry in the payload wins.
pub fn parse_solar(body: &Value) -> Result<SolarSample, FeedError> {
    let window = body
        .get(WINDOW_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| FeedError::Parse(format!("solar feed has no `{}` array", WINDOW_KEY)))?;

    if window.is_empty() {
        return Err(FeedError::NoData("solar window is empty".to_string()));
    }

    window
        .iter()
        .filter_map(normalize_entry)
        .max_by_key(|sample| sample.time)
        .ok_or_else(|| {
            FeedError::NoData(format!(
                "none of {} solar entries carried time, ssn and sfi",
                window.len()
            ))
        })
}

fn normalize_entry(entry: &Value) -> Option<SolarSample> {
    let epoch = value_as_f64(entry.get("time"))?;
    let time = DateTime::from_timestamp(epoch.floor() as i64, 0)?;
    let ssn = value_as_f64(entry.get("ssn"))?.floor() as i64;
    let sfi = value_as_f64(entry.get("sfi"))?.floor() as i64;
    Some(SolarSample { time, ssn, sfi })
}
