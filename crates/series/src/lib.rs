//! Sample Series
//!
//! An append-ordered sequence of samples that knows, without re-encoding,
//! how many bytes its postcard snapshot occupies. Stores use this to evict
//! from the head in O(1) per element.

mod buffer;

pub use buffer::{varint_len, Evicted, Series};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Anything that can live in a series and its snapshot
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Series encoding errors
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Failed to encode sample: {0}")]
    Encode(String),
    #[error("Failed to decode series: {0}")]
    Decode(String),
}

impl From<postcard::Error> for SeriesError {
    fn from(err: postcard::Error) -> Self {
        SeriesError::Encode(err.to_string())
    }
}
