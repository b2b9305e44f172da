//! Station Feed Client
//!
//! Extracts one station's MUF/foF2 reading from the station list.

use crate::client::{get_json, value_as_f64, Feed, FeedConfig};
use crate::error::FeedError;
use crate::sample::StationSample;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Client for the ionosonde station list
pub struct StationClient {
    http: reqwest::Client,
    url: String,
    station_code: String,
    timeout: Duration,
}

impl StationClient {
    /// Create a station client on a shared HTTP client
    pub fn new(http: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            http,
            url: config.station_url.clone(),
            station_code: config.station_code.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl Feed for StationClient {
    type Sample = StationSample;

    fn name(&self) -> &'static str {
        "station"
    }

    async fn fetch(&self) -> Result<StationSample, FeedError> {
        let body = get_json(&self.http, &self.url, &[], self.timeout).await?;
        let sample = parse_station(&body, &self.station_code)?;
        debug!(
            station = %self.station_code,
            muf = ?sample.muf,
            fof2 = ?sample.fof2,
            time = ?sample.time,
            "Parsed station sample"
        );
        Ok(sample)
    }
}

/// Pick `station_code` out of a station list payload
///
/// Only the matching entry is inspected, so unrelated malformed entries do
/// not fail the fetch. The first match wins.
pub fn parse_station(body: &Value, station_code: &str) -> Result<StationSample, FeedError> {
    let entries = body
        .as_array()
        .ok_or_else(|| FeedError::Parse("station feed is not a JSON array".to_string()))?;

    let entry = entries
        .iter()
        .find(|entry| {
            entry
                .get("station")
                .and_then(|station| station.get("code"))
                .and_then(Value::as_str)
                == Some(station_code)
        })
        .ok_or_else(|| FeedError::StationNotFound(station_code.to_string()))?;

    Ok(StationSample {
        time: entry.get("time").and_then(Value::as_str).map(str::to_string),
        muf: value_as_f64(entry.get("mufd")),
        fof2: value_as_f64(entry.get("fof2")),
    })
}
