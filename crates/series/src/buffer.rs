//! Size-Accounted Series Implementation

use crate::{Record, SeriesError};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;

/// Bytes postcard uses for a varint-encoded `usize`
pub fn varint_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// A sample together with its standalone encoded size
#[derive(Debug, Clone)]
struct Entry<T> {
    sample: T,
    encoded_len: usize,
}

/// Samples removed from the head by [`Series::evict_to_fit`], oldest first
#[derive(Debug)]
pub struct Evicted<T>(Vec<Entry<T>>);

impl<T> Evicted<T> {
    /// Number of evicted samples
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was evicted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the evicted samples, oldest first
    pub fn into_samples(self) -> Vec<T> {
        self.0.into_iter().map(|e| e.sample).collect()
    }
}

/// Append-ordered series of samples
///
/// The snapshot of a series is the postcard encoding of its samples as a
/// sequence: a varint count followed by each sample's own encoding. Since
/// every entry's size is recorded on insert, [`Series::encoded_len`] is exact
/// and costs nothing.
#[derive(Debug, Clone)]
pub struct Series<T> {
    entries: VecDeque<Entry<T>>,
    /// Sum of all entries' encoded sizes
    payload_bytes: usize,
}

impl<T: Record> Series<T> {
    /// Create an empty series
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            payload_bytes: 0,
        }
    }

    /// Build a series from samples in append order
    pub fn from_samples(samples: impl IntoIterator<Item = T>) -> Result<Self, SeriesError> {
        let mut series = Self::new();
        for sample in samples {
            series.push(sample)?;
        }
        Ok(series)
    }

    /// Decode a snapshot produced by [`Series::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self, SeriesError> {
        let (samples, rest): (Vec<T>, _) =
            postcard::take_from_bytes(bytes).map_err(|e| SeriesError::Decode(e.to_string()))?;
        if !rest.is_empty() {
            return Err(SeriesError::Decode(format!(
                "{} trailing bytes after {} samples",
                rest.len(),
                samples.len()
            )));
        }
        Self::from_samples(samples)
    }

    /// Encode the whole series as one snapshot
    pub fn encode(&self) -> Result<Vec<u8>, SeriesError> {
        Ok(postcard::to_allocvec(&SampleSeq(&self.entries))?)
    }

    /// Append a sample at the tail
    pub fn push(&mut self, sample: T) -> Result<(), SeriesError> {
        let encoded_len = postcard::to_allocvec(&sample)?.len();
        self.payload_bytes += encoded_len;
        self.entries.push_back(Entry {
            sample,
            encoded_len,
        });
        Ok(())
    }

    /// Remove the most recent sample
    pub fn pop_back(&mut self) -> Option<T> {
        let entry = self.entries.pop_back()?;
        self.payload_bytes -= entry.encoded_len;
        Some(entry.sample)
    }

    /// Remove the oldest sample
    pub fn pop_front(&mut self) -> Option<T> {
        self.pop_front_entry().map(|e| e.sample)
    }

    fn pop_front_entry(&mut self) -> Option<Entry<T>> {
        let entry = self.entries.pop_front()?;
        self.payload_bytes -= entry.encoded_len;
        Some(entry)
    }

    /// Drop oldest samples, one at a time, until the snapshot is below `limit` bytes
    ///
    /// Stops as soon as the bound holds, so no more than necessary is removed.
    /// An empty series always satisfies the bound.
    pub fn evict_to_fit(&mut self, limit: u64) -> Evicted<T> {
        let mut evicted = Vec::new();
        while !self.entries.is_empty() && self.encoded_len() >= limit {
            if let Some(entry) = self.pop_front_entry() {
                evicted.push(entry);
            }
        }
        Evicted(evicted)
    }

    /// Drop up to `count` oldest samples regardless of size
    pub fn evict_front(&mut self, count: usize) -> Evicted<T> {
        let mut evicted = Vec::with_capacity(count.min(self.entries.len()));
        while evicted.len() < count {
            match self.pop_front_entry() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        Evicted(evicted)
    }

    /// Put previously evicted samples back at the head, in their original order
    pub fn restore(&mut self, evicted: Evicted<T>) {
        for entry in evicted.0.into_iter().rev() {
            self.payload_bytes += entry.encoded_len;
            self.entries.push_front(entry);
        }
    }

    /// Exact size in bytes of [`Series::encode`]'s output
    pub fn encoded_len(&self) -> u64 {
        (varint_len(self.entries.len()) + self.payload_bytes) as u64
    }

    /// Most recently appended sample
    pub fn latest(&self) -> Option<&T> {
        self.entries.back().map(|e| &e.sample)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the series holds no samples
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate samples in append order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|e| &e.sample)
    }

    /// Copy all samples in append order
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Copy the last `count` samples, in append order
    pub fn tail(&self, count: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(count);
        self.iter().skip(skip).cloned().collect()
    }
}

impl<T: Record> Default for Series<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes entries as a plain sequence of samples
struct SampleSeq<'a, T>(&'a VecDeque<Entry<T>>);

impl<T: Serialize> Serialize for SampleSeq<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|e| &e.sample))
    }
}
