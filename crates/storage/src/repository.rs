//! Repository of Per-Feed Stores

use crate::store::SeriesStore;
use crate::StorageError;
use feed_client::{SolarSample, StationSample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Default snapshot size bound (200 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// Identifies one store (one per feed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreId {
    Station,
    Solar,
}

impl StoreId {
    /// Name used in logs, metrics and API responses
    pub fn name(&self) -> &'static str {
        match self {
            StoreId::Station => "station",
            StoreId::Solar => "solar",
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do when a snapshot cannot be decoded at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Refuse to open the store
    #[default]
    Fail,
    /// Move the file aside and start with an empty series
    RecreateEmpty,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding both snapshots
    pub data_dir: PathBuf,
    /// Station snapshot file name
    pub station_file: String,
    /// Solar snapshot file name
    pub solar_file: String,
    /// Per-snapshot size bound in bytes
    pub max_file_size: u64,
    /// Corrupt snapshot handling
    pub recovery: RecoveryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            station_file: "station.bin".to_string(),
            solar_file: "solar.bin".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            recovery: RecoveryPolicy::Fail,
        }
    }
}

impl StorageConfig {
    /// Snapshot path of a store
    pub fn path_for(&self, id: StoreId) -> PathBuf {
        match id {
            StoreId::Station => self.data_dir.join(&self.station_file),
            StoreId::Solar => self.data_dir.join(&self.solar_file),
        }
    }
}

/// Both feed stores, opened once at startup and shared by reference
#[derive(Clone)]
pub struct Repository {
    station: Arc<SeriesStore<StationSample>>,
    solar: Arc<SeriesStore<SolarSample>>,
}

impl Repository {
    /// Open (or create) both stores
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        info!(
            data_dir = %config.data_dir.display(),
            max_file_size = config.max_file_size,
            recovery = ?config.recovery,
            "Opening repository"
        );

        let station = SeriesStore::open(
            StoreId::Station,
            config.path_for(StoreId::Station),
            config.max_file_size,
            config.recovery,
        )?;
        let solar = SeriesStore::open(
            StoreId::Solar,
            config.path_for(StoreId::Solar),
            config.max_file_size,
            config.recovery,
        )?;

        Ok(Self {
            station: Arc::new(station),
            solar: Arc::new(solar),
        })
    }

    /// Station measurement store
    pub fn station(&self) -> &Arc<SeriesStore<StationSample>> {
        &self.station
    }

    /// Solar index store
    pub fn solar(&self) -> &Arc<SeriesStore<SolarSample>> {
        &self.solar
    }
}
