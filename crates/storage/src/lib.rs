//! Storage Layer
//!
//! One append-only series per feed, kept in memory behind a lock and
//! mirrored to an on-disk snapshot after every append. Snapshots are bounded
//! in size by evicting the oldest samples.

mod repository;
mod snapshot;
mod store;

pub use repository::{RecoveryPolicy, Repository, StorageConfig, StoreId};
pub use store::{AppendReport, SeriesStore};

use series::SeriesError;
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Store {0} has no samples yet")]
    EmptySeries(StoreId),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<SeriesError> for StorageError {
    fn from(err: SeriesError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
