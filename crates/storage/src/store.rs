//! Bounded Series Store

use crate::repository::{RecoveryPolicy, StoreId};
use crate::{snapshot, StorageError};
use metrics::{counter, gauge};
use series::{Record, Series};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    /// Samples held after the append
    pub len: usize,
    /// Snapshot size on disk after the append
    pub bytes: u64,
    /// Oldest samples dropped to stay under the size limit
    pub evicted: usize,
}

/// Durable, size-bounded series for one feed
///
/// The in-memory series and its snapshot change together under the write
/// lock: readers see either the state before an append or after it has been
/// persisted, never in between.
pub struct SeriesStore<T> {
    id: StoreId,
    path: PathBuf,
    max_file_size: u64,
    series: RwLock<Series<T>>,
}

impl<T: Record> SeriesStore<T> {
    /// Load the store from its snapshot, or start empty if there is none
    pub fn open(
        id: StoreId,
        path: impl Into<PathBuf>,
        max_file_size: u64,
        recovery: RecoveryPolicy,
    ) -> Result<Self, StorageError> {
        let path = path.into();

        let series = match snapshot::read(&path)? {
            None => {
                info!(store = %id, path = %path.display(), "No snapshot found, starting empty");
                Series::new()
            }
            Some(bytes) => match Series::decode(&bytes) {
                Ok(series) => {
                    info!(
                        store = %id,
                        path = %path.display(),
                        samples = series.len(),
                        bytes = bytes.len(),
                        "Loaded snapshot"
                    );
                    series
                }
                Err(e) => match recovery {
                    RecoveryPolicy::Fail => {
                        return Err(StorageError::Corrupt {
                            path,
                            reason: e.to_string(),
                        })
                    }
                    RecoveryPolicy::RecreateEmpty => {
                        let moved = snapshot::quarantine(&path)?;
                        warn!(
                            store = %id,
                            error = %e,
                            moved_to = %moved.display(),
                            "Snapshot unreadable, moved aside and starting empty"
                        );
                        Series::new()
                    }
                },
            },
        };

        let store = Self {
            id,
            path,
            max_file_size,
            series: RwLock::new(series),
        };
        store.enforce_limit()?;
        store.publish_gauges(&*store.read()?);
        Ok(store)
    }

    /// Trim a loaded snapshot that is already over the limit (e.g. after the limit was lowered)
    fn enforce_limit(&self) -> Result<(), StorageError> {
        let on_disk = snapshot::file_size(&self.path)?.unwrap_or(0);
        if on_disk < self.max_file_size {
            return Ok(());
        }

        let mut series = self.write()?;
        let evicted = series.evict_to_fit(self.max_file_size);
        let bytes = series.encode()?;
        snapshot::write_atomic(&self.path, &bytes)?;
        warn!(
            store = %self.id,
            on_disk,
            limit = self.max_file_size,
            evicted = evicted.len(),
            "Snapshot exceeded size limit at load, trimmed"
        );
        Ok(())
    }

    /// Append a sample and persist the whole series
    ///
    /// Oldest samples are evicted first until the snapshot is below the size
    /// limit. If the snapshot cannot be written, the in-memory series is put
    /// back exactly as it was.
    pub fn append(&self, sample: T) -> Result<AppendReport, StorageError> {
        let mut series = self.write()?;

        series.push(sample)?;
        let evicted = series.evict_to_fit(self.max_file_size);

        let written = series
            .encode()
            .map_err(StorageError::from)
            .and_then(|bytes| snapshot::write_atomic(&self.path, &bytes));
        if let Err(e) = written {
            series.restore(evicted);
            series.pop_back();
            warn!(store = %self.id, error = %e, "Persist failed, append rolled back");
            return Err(e);
        }

        let mut evicted_count = evicted.len();
        evicted_count += self.settle_on_disk(&mut series);

        if evicted_count > 0 {
            counter!("store_evicted_total", "store" => self.id.name()).increment(evicted_count as u64);
            info!(
                store = %self.id,
                evicted = evicted_count,
                limit = self.max_file_size,
                "Evicted oldest samples to stay under size limit"
            );
        }
        self.publish_gauges(&series);

        let report = AppendReport {
            len: series.len(),
            bytes: series.encoded_len(),
            evicted: evicted_count,
        };
        debug!(store = %self.id, ?report, "Appended sample");
        Ok(report)
    }

    /// Check the written file against the size limit
    ///
    /// Accounting is exact, so this only evicts if the file on disk disagrees
    /// with it; then one more head sample is dropped per rewrite until it fits.
    /// The appended sample is already persisted at this point: a failed check
    /// or rewrite is logged, the series is left matching the last good write,
    /// and the append still succeeds.
    fn settle_on_disk(&self, series: &mut Series<T>) -> usize {
        let mut extra = 0;
        loop {
            let on_disk = match snapshot::file_size(&self.path) {
                Ok(Some(on_disk)) => on_disk,
                Ok(None) => break,
                Err(e) => {
                    warn!(store = %self.id, error = %e, "Could not check snapshot size");
                    break;
                }
            };
            if on_disk < self.max_file_size || series.is_empty() {
                break;
            }
            warn!(
                store = %self.id,
                on_disk,
                expected = series.encoded_len(),
                limit = self.max_file_size,
                "Snapshot on disk over size limit, evicting one more sample"
            );

            let head = series.evict_front(1);
            let rewritten = series
                .encode()
                .map_err(StorageError::from)
                .and_then(|bytes| snapshot::write_atomic(&self.path, &bytes));
            if let Err(e) = rewritten {
                series.restore(head);
                warn!(store = %self.id, error = %e, "Rewrite after extra eviction failed, kept previous snapshot");
                break;
            }
            extra += 1;
        }
        extra
    }

    /// Most recently appended sample
    pub fn latest(&self) -> Result<T, StorageError> {
        self.read()?
            .latest()
            .cloned()
            .ok_or(StorageError::EmptySeries(self.id))
    }

    /// Copy of the whole series in append order
    pub fn snapshot(&self) -> Result<Vec<T>, StorageError> {
        Ok(self.read()?.to_vec())
    }

    /// Copy of the last `count` samples in append order
    pub fn tail(&self, count: usize) -> Result<Vec<T>, StorageError> {
        Ok(self.read()?.tail(count))
    }

    /// Number of samples held
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.len())
    }

    /// Whether the store holds no samples
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.read()?.is_empty())
    }

    /// Current snapshot size in bytes
    pub fn encoded_len(&self) -> Result<u64, StorageError> {
        Ok(self.read()?.encoded_len())
    }

    /// Store name used in logs and metrics
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Snapshot size bound in bytes
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Series<T>>, StorageError> {
        self.series
            .read()
            .map_err(|e| StorageError::Lock(format!("{} store: {}", self.id, e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Series<T>>, StorageError> {
        self.series
            .write()
            .map_err(|e| StorageError::Lock(format!("{} store: {}", self.id, e)))
    }

    fn publish_gauges(&self, series: &Series<T>) {
        gauge!("store_samples", "store" => self.id.name()).set(series.len() as f64);
        gauge!("store_bytes", "store" => self.id.name()).set(series.encoded_len() as f64);
    }
}
