//! Fetch Scheduler
//!
//! Drives periodic acquisition from the station and solar feeds and appends
//! each result to its store. Feeds fail independently; a failing feed backs
//! off for a capped number of cycles while the other keeps running.

mod scheduler;

pub use scheduler::{
    backoff_cycles, CycleError, CycleReport, FeedOutcome, FetchScheduler, SchedulerConfig,
};
