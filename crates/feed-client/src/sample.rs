//! Normalized Feed Samples
//!
//! The records stored per fetch cycle, independent of the remote JSON shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layouts seen on the station feed
const STATION_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// One ionosonde reading for the configured station
///
/// Fields the feed leaves out or sends as `null` stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationSample {
    /// Measurement time as supplied by the feed (ISO-8601)
    pub time: Option<String>,
    /// Maximum usable frequency (MHz)
    pub muf: Option<f64>,
    /// F2 layer critical frequency (MHz)
    pub fof2: Option<f64>,
}

impl StationSample {
    /// Parse the raw feed time
    ///
    /// Accepts both `T` and space separators, with or without fractional
    /// seconds. Returns `None` if the time is absent or unparseable.
    pub fn parsed_time(&self) -> Option<NaiveDateTime> {
        let raw = self.time.as_deref()?.trim();
        let raw = raw.strip_suffix('Z').unwrap_or(raw);
        STATION_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }
}

/// Solar activity indices for one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolarSample {
    /// Entry time (from feed epoch seconds)
    pub time: DateTime<Utc>,
    /// Sunspot number, floored
    pub ssn: i64,
    /// Solar flux index, floored
    pub sfi: i64,
}
