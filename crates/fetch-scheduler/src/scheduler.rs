//! Fetch Scheduler Implementation

use feed_client::{Feed, FeedError};
use metrics::counter;
use series::Record;
use std::sync::Arc;
use std::time::Duration;
use storage::{AppendReport, SeriesStore, StorageError};
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the fetch scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between fetch cycles (default: 300 s)
    pub interval: Duration,
    /// Upper bound on one feed fetch, including parsing (default: 30 s)
    pub fetch_timeout: Duration,
    /// Most cycles a failing feed sits out between attempts
    pub max_backoff_cycles: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            max_backoff_cycles: 6,
        }
    }
}

/// Why one feed's step in a cycle produced no sample
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FeedError),
    #[error("append failed: {0}")]
    Store(#[from] StorageError),
    #[error("append task failed: {0}")]
    Task(String),
}

impl CycleError {
    /// Transport, timeout, status and parse failures, expected to clear on
    /// their own; anything else points at configuration or local storage
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Fetch(e) if e.is_fetch_error())
    }
}

/// What happened to one feed in one cycle
#[derive(Debug)]
pub enum FeedOutcome {
    /// A sample was fetched and persisted
    Appended(AppendReport),
    /// Fetch or append failed; the feed will sit out `skip_cycles` cycles
    Failed {
        error: CycleError,
        consecutive_failures: u32,
        skip_cycles: u32,
    },
    /// Not attempted because the feed is backing off
    Skipped { remaining: u32 },
}

impl FeedOutcome {
    /// Whether a sample was appended
    pub fn is_appended(&self) -> bool {
        matches!(self, FeedOutcome::Appended(_))
    }

    /// Whether the feed was attempted and failed
    pub fn is_failed(&self) -> bool {
        matches!(self, FeedOutcome::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            FeedOutcome::Appended(_) => "appended",
            FeedOutcome::Failed { .. } => "failed",
            FeedOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of one fetch cycle
#[derive(Debug)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    pub station: FeedOutcome,
    pub solar: FeedOutcome,
}

/// Cycles to sit out after `consecutive_failures` failures in a row
///
/// `2^(n-1) - 1`, capped: the first failure retries on the next cycle, then
/// the gap doubles.
pub fn backoff_cycles(consecutive_failures: u32, cap: u32) -> u32 {
    if consecutive_failures <= 1 {
        return 0;
    }
    let exp = (consecutive_failures - 1).min(31);
    ((1u64 << exp) - 1).min(u64::from(cap)) as u32
}

/// A feed together with its store and failure bookkeeping
struct FeedTask<F: Feed> {
    feed: F,
    store: Arc<SeriesStore<F::Sample>>,
    consecutive_failures: u32,
    skip_remaining: u32,
}

impl<F> FeedTask<F>
where
    F: Feed,
    F::Sample: Record,
{
    fn new(feed: F, store: Arc<SeriesStore<F::Sample>>) -> Self {
        Self {
            feed,
            store,
            consecutive_failures: 0,
            skip_remaining: 0,
        }
    }

    /// Whether the store is empty; unreadable stores are left alone
    fn needs_priming(&self) -> bool {
        match self.store.is_empty() {
            Ok(empty) => empty,
            Err(e) => {
                warn!(feed = self.feed.name(), error = %e, "Store unreadable, not priming");
                false
            }
        }
    }

    async fn step(&mut self, config: &SchedulerConfig) -> FeedOutcome {
        let name = self.feed.name();

        let outcome = if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            debug!(feed = name, remaining = self.skip_remaining, "Feed backing off, fetch skipped");
            FeedOutcome::Skipped {
                remaining: self.skip_remaining,
            }
        } else {
            match self.fetch_and_append(config.fetch_timeout).await {
                Ok(report) => {
                    if self.consecutive_failures > 0 {
                        info!(
                            feed = name,
                            after_failures = self.consecutive_failures,
                            "Feed recovered"
                        );
                    }
                    self.consecutive_failures = 0;
                    info!(feed = name, samples = report.len, bytes = report.bytes, "Fetched sample");
                    FeedOutcome::Appended(report)
                }
                Err(error) => {
                    self.consecutive_failures += 1;
                    self.skip_remaining =
                        backoff_cycles(self.consecutive_failures, config.max_backoff_cycles);
                    if error.is_transient() {
                        warn!(
                            feed = name,
                            error = %error,
                            consecutive_failures = self.consecutive_failures,
                            skip_cycles = self.skip_remaining,
                            "Feed cycle failed"
                        );
                    } else {
                        error!(
                            feed = name,
                            error = %error,
                            consecutive_failures = self.consecutive_failures,
                            skip_cycles = self.skip_remaining,
                            "Feed cycle failed"
                        );
                    }
                    FeedOutcome::Failed {
                        error,
                        consecutive_failures: self.consecutive_failures,
                        skip_cycles: self.skip_remaining,
                    }
                }
            }
        };

        counter!("feed_fetch_total", "feed" => name, "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn fetch_and_append(&self, timeout: Duration) -> Result<AppendReport, CycleError> {
        let sample = match tokio::time::timeout(timeout, self.feed.fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(FeedError::Timeout(timeout.as_millis() as u64).into()),
        };

        // Snapshot writes are blocking file I/O
        let store = Arc::clone(&self.store);
        let report = tokio::task::spawn_blocking(move || store.append(sample))
            .await
            .map_err(|e| CycleError::Task(e.to_string()))??;
        Ok(report)
    }
}

/// Scheduler feeding the station and solar stores
pub struct FetchScheduler<S: Feed, P: Feed> {
    station: FeedTask<S>,
    solar: FeedTask<P>,
    config: SchedulerConfig,
    cycles: u64,
}

impl<S, P> FetchScheduler<S, P>
where
    S: Feed,
    S::Sample: Record,
    P: Feed,
    P::Sample: Record,
{
    /// Create a scheduler over both feeds and their stores
    pub fn new(
        config: SchedulerConfig,
        station_feed: S,
        station_store: Arc<SeriesStore<S::Sample>>,
        solar_feed: P,
        solar_store: Arc<SeriesStore<P::Sample>>,
    ) -> Self {
        info!(
            interval_secs = config.interval.as_secs(),
            fetch_timeout_secs = config.fetch_timeout.as_secs(),
            max_backoff_cycles = config.max_backoff_cycles,
            "Fetch scheduler created"
        );
        Self {
            station: FeedTask::new(station_feed, station_store),
            solar: FeedTask::new(solar_feed, solar_store),
            config,
            cycles: 0,
        }
    }

    /// Fetch once for every store that is still empty
    ///
    /// Run before [`FetchScheduler::run`] so a fresh install has data before
    /// the first interval elapses. Returns `None` for stores that already
    /// held samples.
    pub async fn prime(&mut self) -> (Option<FeedOutcome>, Option<FeedOutcome>) {
        let station = if self.station.needs_priming() {
            info!(feed = self.station.feed.name(), "Store empty, fetching immediately");
            Some(self.station.step(&self.config).await)
        } else {
            None
        };

        let solar = if self.solar.needs_priming() {
            info!(feed = self.solar.feed.name(), "Store empty, fetching immediately");
            Some(self.solar.step(&self.config).await)
        } else {
            None
        };

        (station, solar)
    }

    /// Run one fetch cycle: station first, then solar
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;

        let station = self.station.step(&self.config).await;
        let solar = self.solar.step(&self.config).await;

        counter!("scheduler_cycles_total").increment(1);
        debug!(
            cycle,
            station = station.label(),
            solar = solar.label(),
            "Fetch cycle complete"
        );

        CycleReport {
            cycle,
            station,
            solar,
        }
    }

    /// Run cycles every interval until `shutdown` is cancelled
    ///
    /// The first cycle starts one interval after the call. A cycle in
    /// progress is allowed to finish. Returns the number of cycles run.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        info!("Starting fetch scheduler");

        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle().await;
        }

        info!(cycles = self.cycles, "Fetch scheduler stopped");
        self.cycles
    }

    /// Cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use feed_client::{parse_solar, parse_station, SolarSample, StationSample};
    use std::marker::PhantomData;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::{RecoveryPolicy, StoreId};

    /// Feed answering each call from a closure of the call index
    struct FnFeed<T, F> {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        respond: F,
        _sample: PhantomData<fn() -> T>,
    }

    impl<T, F> FnFeed<T, F>
    where
        F: Fn(usize) -> Result<T, FeedError> + Send + Sync,
    {
        fn new(name: &'static str, respond: F) -> Self {
            Self {
                name,
                calls: Arc::new(AtomicUsize::new(0)),
                respond,
                _sample: PhantomData,
            }
        }

        fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl<T, F> Feed for FnFeed<T, F>
    where
        T: Send + 'static,
        F: Fn(usize) -> Result<T, FeedError> + Send + Sync,
    {
        type Sample = T;

        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self) -> Result<T, FeedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(call)
        }
    }

    /// Feed that never answers within any sane timeout
    struct StalledFeed;

    #[async_trait]
    impl Feed for StalledFeed {
        type Sample = StationSample;

        fn name(&self) -> &'static str {
            "station"
        }

        async fn fetch(&self) -> Result<StationSample, FeedError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StationSample::default())
        }
    }

    fn station_store(dir: &Path) -> Arc<SeriesStore<StationSample>> {
        Arc::new(
            SeriesStore::open(StoreId::Station, dir.join("station.bin"), 1 << 20, RecoveryPolicy::Fail)
                .unwrap(),
        )
    }

    fn solar_store(dir: &Path) -> Arc<SeriesStore<SolarSample>> {
        Arc::new(
            SeriesStore::open(StoreId::Solar, dir.join("solar.bin"), 1 << 20, RecoveryPolicy::Fail)
                .unwrap(),
        )
    }

    fn solar_at(epoch: i64) -> SolarSample {
        SolarSample {
            time: DateTime::from_timestamp(epoch, 0).unwrap(),
            ssn: 100,
            sfi: 150,
        }
    }

    fn ok_station(call: usize) -> Result<StationSample, FeedError> {
        Ok(StationSample {
            time: Some(format!("2024-01-01T00:{:02}:00", call % 60)),
            muf: Some(15.0),
            fof2: Some(5.0),
        })
    }

    fn ok_solar(call: usize) -> Result<SolarSample, FeedError> {
        Ok(solar_at(call as i64 * 300))
    }

    fn network_down<T>(_: usize) -> Result<T, FeedError> {
        Err(FeedError::Network("connection refused".to_string()))
    }

    #[test]
    fn test_backoff_cycles() {
        assert_eq!(backoff_cycles(0, 6), 0);
        assert_eq!(backoff_cycles(1, 6), 0);
        assert_eq!(backoff_cycles(2, 6), 1);
        assert_eq!(backoff_cycles(3, 6), 3);
        assert_eq!(backoff_cycles(4, 6), 6);
        assert_eq!(backoff_cycles(40, 6), 6);
        assert_eq!(backoff_cycles(5, 0), 0);
    }

    #[tokio::test]
    async fn test_station_payload_reaches_store() {
        let dir = tempfile::tempdir().unwrap();
        let stations = station_store(dir.path());
        let payload = serde_json::json!([
            {"station": {"code": "EA036"}, "mufd": 18.2, "fof2": 6.1, "time": "2024-01-01T00:00:00"}
        ]);
        let station_feed = FnFeed::new("station", move |_| parse_station(&payload, "EA036"));

        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            station_feed,
            Arc::clone(&stations),
            FnFeed::new("solar", ok_solar),
            solar_store(dir.path()),
        );
        let report = scheduler.run_cycle().await;

        assert!(report.station.is_appended());
        assert_eq!(
            stations.latest().unwrap(),
            StationSample {
                muf: Some(18.2),
                fof2: Some(6.1),
                time: Some("2024-01-01T00:00:00".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_solar_window_appends_single_latest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let solars = solar_store(dir.path());
        let payload = serde_json::json!({"24h": [
            {"time": 100, "ssn": 90, "sfi": 140},
            {"time": 200, "ssn": 95, "sfi": 142},
        ]});
        let solar_feed = FnFeed::new("solar", move |_| parse_solar(&payload));

        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            FnFeed::new("station", ok_station),
            station_store(dir.path()),
            solar_feed,
            Arc::clone(&solars),
        );
        scheduler.run_cycle().await;

        assert_eq!(solars.len().unwrap(), 1);
        assert_eq!(solars.latest().unwrap().time.timestamp(), 200);
    }

    #[tokio::test]
    async fn test_station_failure_does_not_affect_solar() {
        let dir = tempfile::tempdir().unwrap();
        let stations = station_store(dir.path());
        let solars = solar_store(dir.path());

        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            FnFeed::new("station", network_down::<StationSample>),
            Arc::clone(&stations),
            FnFeed::new("solar", ok_solar),
            Arc::clone(&solars),
        );
        let report = scheduler.run_cycle().await;

        assert!(matches!(
            report.station,
            FeedOutcome::Failed {
                error: CycleError::Fetch(FeedError::Network(_)),
                consecutive_failures: 1,
                skip_cycles: 0,
            }
        ));
        assert!(report.solar.is_appended());
        assert_eq!(stations.len().unwrap(), 0);
        assert_eq!(solars.len().unwrap(), 1);

        // Scheduler keeps going
        let report = scheduler.run_cycle().await;
        assert_eq!(report.cycle, 2);
        assert_eq!(solars.len().unwrap(), 2);
    }

    #[test]
    fn test_transient_errors() {
        assert!(CycleError::Fetch(FeedError::Timeout(5000)).is_transient());
        assert!(CycleError::Fetch(FeedError::Status { status: 503, body: String::new() }).is_transient());
        assert!(!CycleError::Fetch(FeedError::StationNotFound("EA036".to_string())).is_transient());
        assert!(!CycleError::Task("cancelled".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_prime_only_fills_empty_stores() {
        let dir = tempfile::tempdir().unwrap();
        let stations = station_store(dir.path());
        stations.append(ok_station(0).unwrap()).unwrap();
        let solars = solar_store(dir.path());

        let station_feed = FnFeed::new("station", ok_station);
        let station_calls = station_feed.calls();
        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            station_feed,
            Arc::clone(&stations),
            FnFeed::new("solar", ok_solar),
            Arc::clone(&solars),
        );

        let (station, solar) = scheduler.prime().await;
        assert!(station.is_none());
        assert!(solar.map(|o| o.is_appended()).unwrap_or(false));
        assert_eq!(station_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stations.len().unwrap(), 1);
        assert_eq!(solars.len().unwrap(), 1);
        assert_eq!(scheduler.cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_feed_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchedulerConfig {
            fetch_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let solars = solar_store(dir.path());

        let mut scheduler = FetchScheduler::new(
            config,
            StalledFeed,
            station_store(dir.path()),
            FnFeed::new("solar", ok_solar),
            Arc::clone(&solars),
        );
        let report = scheduler.run_cycle().await;

        assert!(matches!(
            report.station,
            FeedOutcome::Failed {
                error: CycleError::Fetch(FeedError::Timeout(5000)),
                ..
            }
        ));
        assert_eq!(solars.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_back_off() {
        let dir = tempfile::tempdir().unwrap();
        let station_feed = FnFeed::new("station", network_down::<StationSample>);
        let calls = station_feed.calls();

        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            station_feed,
            station_store(dir.path()),
            FnFeed::new("solar", ok_solar),
            solar_store(dir.path()),
        );

        // fail, fail, skip, fail, skip x3
        let mut skipped = 0;
        for _ in 0..7 {
            let report = scheduler.run_cycle().await;
            if matches!(report.station, FeedOutcome::Skipped { .. }) {
                skipped += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(skipped, 4);
    }

    #[tokio::test]
    async fn test_success_resets_backoff() {
        let dir = tempfile::tempdir().unwrap();
        // calls 0, 1 fail; call 2 succeeds; call 3 fails
        let station_feed = FnFeed::new("station", |call| match call {
            2 => ok_station(call),
            _ => network_down(call),
        });
        let calls = station_feed.calls();

        let mut scheduler = FetchScheduler::new(
            SchedulerConfig::default(),
            station_feed,
            station_store(dir.path()),
            FnFeed::new("solar", ok_solar),
            solar_store(dir.path()),
        );

        let outcomes: Vec<FeedOutcome> = {
            let mut out = Vec::new();
            for _ in 0..6 {
                out.push(scheduler.run_cycle().await.station);
            }
            out
        };

        assert!(outcomes[0].is_failed());
        assert!(outcomes[1].is_failed());
        assert!(matches!(outcomes[2], FeedOutcome::Skipped { remaining: 0 }));
        assert!(outcomes[3].is_appended());
        // Counter was reset, so the next failure retries straight away
        assert!(matches!(
            outcomes[4],
            FeedOutcome::Failed { consecutive_failures: 1, .. }
        ));
        assert!(outcomes[5].is_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let stations = station_store(dir.path());
        let solars = solar_store(dir.path());
        let config = SchedulerConfig {
            interval: Duration::from_millis(20),
            ..Default::default()
        };

        let scheduler = FetchScheduler::new(
            config,
            FnFeed::new("station", ok_station),
            Arc::clone(&stations),
            FnFeed::new("solar", ok_solar),
            Arc::clone(&solars),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert!(cycles >= 2);
        assert_eq!(stations.len().unwrap() as u64, cycles);
        assert_eq!(solars.len().unwrap() as u64, cycles);
    }
}
