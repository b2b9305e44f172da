//! Propagation Feed Clients
//!
//! Async HTTP clients for the ionosonde station list and the solar index
//! feed. Each client turns the remote JSON payload into a normalized sample.

mod client;
mod error;
mod sample;
mod solar;
mod station;

pub use client::{
    build_http_client, Feed, FeedConfig, DEFAULT_SOLAR_URL, DEFAULT_STATION_CODE,
    DEFAULT_STATION_URL,
};
pub use error::FeedError;
pub use sample::{SolarSample, StationSample};
pub use solar::{parse_solar, SolarClient};
pub use station::{parse_station, StationClient};
