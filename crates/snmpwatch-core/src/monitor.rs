//! Scheduling: the poll loop and the aggregate loop.
//!
//! Both loops run as tokio tasks driven by `tokio::time::interval` and stop
//! when the shared [`CancellationToken`] fires. The poll loop awaits each
//! cycle, so a cycle that runs long causes missed ticks to be skipped rather
//! than queued. Aggregate appends run in their own task so a slow database
//! never delays the next aggregate tick.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::metric::MetricRegistry;
use crate::probe::ProbeClient;
use crate::query::QueryFacade;
use crate::sampler::Sampler;
use crate::storage::Persistence;
use crate::window::WindowStore;

/// Timing knobs for the two loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub aggregate_interval: Duration,
    pub probe_timeout: Duration,
}

impl Schedule {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            aggregate_interval: cfg.effective_aggregate_interval(),
            probe_timeout: cfg.probe_timeout,
        }
    }
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    probe_failures: AtomicU64,
    aggregates_written: AtomicU64,
    aggregate_failures: AtomicU64,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the monitor counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub cycles: u64,
    pub probe_failures: u64,
    pub aggregates_written: u64,
    pub aggregate_failures: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub window_len: usize,
    pub window_capacity: usize,
}

/// Shared read side of a running (or stopped) monitor.
#[derive(Clone)]
pub struct MonitorView {
    facade: QueryFacade,
    store: Arc<WindowStore>,
    counters: Arc<Counters>,
}

impl MonitorView {
    pub fn facade(&self) -> &QueryFacade {
        &self.facade
    }

    pub fn status(&self) -> MonitorStatus {
        let c = &self.counters;
        MonitorStatus {
            cycles: c.cycles.load(Ordering::Relaxed),
            probe_failures: c.probe_failures.load(Ordering::Relaxed),
            aggregates_written: c.aggregates_written.load(Ordering::Relaxed),
            aggregate_failures: c.aggregate_failures.load(Ordering::Relaxed),
            last_poll: *c.last_poll.lock().unwrap_or_else(|e| e.into_inner()),
            window_len: self.store.len(),
            window_capacity: self.store.capacity(),
        }
    }
}

/// Wiring for one monitored device.
pub struct Monitor {
    sampler: Arc<Sampler>,
    aggregator: Arc<Aggregator>,
    view: MonitorView,
    schedule: Schedule,
}

impl Monitor {
    /// Build the engine. Fails on an empty registry or zero window capacity.
    pub fn new(
        registry: MetricRegistry,
        window_capacity: usize,
        schedule: Schedule,
        client: Arc<dyn ProbeClient>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, ConfigError> {
        if schedule.poll_interval.is_zero() || schedule.aggregate_interval.is_zero() {
            return Err(ConfigError::invalid("intervals must be positive"));
        }
        let registry = Arc::new(registry);
        let store = Arc::new(WindowStore::new(registry.names(), window_capacity)?);

        let sampler = Sampler::new(
            Arc::clone(&registry),
            client,
            Arc::clone(&store),
            schedule.probe_timeout,
        );
        let aggregator = Aggregator::new(Arc::clone(&store), Arc::clone(&persistence));
        let facade = QueryFacade::new(Arc::clone(&store), persistence);

        Ok(Self {
            sampler: Arc::new(sampler),
            aggregator: Arc::new(aggregator),
            view: MonitorView {
                facade,
                store,
                counters: Arc::new(Counters::default()),
            },
            schedule,
        })
    }

    /// Build from a validated config.
    pub fn from_config(
        cfg: &MonitorConfig,
        client: Arc<dyn ProbeClient>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Self::new(
            cfg.registry()?,
            cfg.window_capacity,
            Schedule::from_config(cfg),
            client,
            persistence,
        )
    }

    pub fn view(&self) -> MonitorView {
        self.view.clone()
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Spawn both loops on the current runtime.
    pub fn start(self) -> MonitorHandle {
        let cancel = CancellationToken::new();

        let poll_task = spawn_poll_loop(
            Arc::clone(&self.sampler),
            Arc::clone(&self.view.counters),
            self.schedule.poll_interval,
            cancel.clone(),
        );
        let aggregate_task = spawn_aggregate_loop(
            Arc::clone(&self.aggregator),
            Arc::clone(&self.view.counters),
            self.schedule.aggregate_interval,
            cancel.clone(),
        );

        log::info!(
            "monitor started: poll every {:?}, aggregate every {:?}, probe timeout {:?}",
            self.schedule.poll_interval,
            self.schedule.aggregate_interval,
            self.schedule.probe_timeout
        );

        MonitorHandle {
            view: self.view,
            cancel,
            tasks: vec![poll_task, aggregate_task],
        }
    }
}

fn spawn_poll_loop(
    sampler: Arc<Sampler>,
    counters: Arc<Counters>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first poll happens one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let report = tokio::select! {
                        _ = cancel.cancelled() => return,
                        report = sampler.poll_once() => report,
                    };
                    match report {
                        Ok(report) => {
                            counters.cycles.fetch_add(1, Ordering::Relaxed);
                            counters
                                .probe_failures
                                .fetch_add(report.failures() as u64, Ordering::Relaxed);
                            *counters.last_poll.lock().unwrap_or_else(|e| e.into_inner()) =
                                Some(report.collected_at);
                        }
                        Err(e) => log::error!("poll cycle rejected by window store: {e}"),
                    }
                }
            }
        }
    })
}

fn spawn_aggregate_loop(
    aggregator: Arc<Aggregator>,
    counters: Arc<Counters>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut appends = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !appends.is_empty() {
                        log::warn!(
                            "{} aggregate append(s) still pending; storage may be stalled",
                            appends.len()
                        );
                    }
                    let aggregator = Arc::clone(&aggregator);
                    let counters = Arc::clone(&counters);
                    appends.spawn(async move {
                        match aggregator.tick().await {
                            Ok(Some(_)) => {
                                counters.aggregates_written.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                counters.aggregate_failures.fetch_add(1, Ordering::Relaxed);
                                log::error!("failed to save aggregate: {e}");
                            }
                        }
                    });
                }
                Some(done) = appends.join_next(), if !appends.is_empty() => {
                    if let Err(e) = done {
                        log::error!("aggregate task failed: {e}");
                    }
                }
            }
        }

        // Let appends already handed to storage finish.
        while let Some(done) = appends.join_next().await {
            if let Err(e) = done {
                log::error!("aggregate task failed: {e}");
            }
        }
    })
}

/// Handle to running loops. Dropping it stops them.
pub struct MonitorHandle {
    view: MonitorView,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn view(&self) -> MonitorView {
        self.view.clone()
    }

    pub fn facade(&self) -> &QueryFacade {
        self.view.facade()
    }

    pub fn status(&self) -> MonitorStatus {
        self.view.status()
    }

    /// Token that fires when the monitor is asked to stop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both loops and wait for them, including in-flight appends.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::error!("monitor task ended abnormally: {e}");
            }
        }
        log::info!("monitor stopped");
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeFailure;
    use crate::metric::{MetricSpec, Transform};
    use crate::error::StorageError;
    use crate::storage::{AggregateRecord, MemoryStore, MetricMeans};
    use async_trait::async_trait;

    /// Returns an increasing counter per call.
    struct CountingClient {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ProbeClient for CountingClient {
        async fn fetch(&self, _key: &str, _timeout: Duration) -> Result<u64, ProbeFailure> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn monitor(persistence: Arc<MemoryStore>, capacity: usize) -> Monitor {
        let registry = MetricRegistry::new(vec![
            MetricSpec::new("a", "1", Transform::Identity),
            MetricSpec::new("b", "2", Transform::Identity),
        ])
        .unwrap();
        let schedule = Schedule {
            poll_interval: Duration::from_secs(5),
            aggregate_interval: Duration::from_secs(5 * capacity as u64),
            probe_timeout: Duration::from_secs(1),
        };
        let client = Arc::new(CountingClient {
            calls: AtomicU64::new(0),
        });
        Monitor::new(registry, capacity, schedule, client, persistence).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let registry = MetricRegistry::device_default();
        let schedule = Schedule::from_config(&MonitorConfig::default());
        let result = Monitor::new(
            registry,
            0,
            schedule,
            Arc::new(CountingClient {
                calls: AtomicU64::new(0),
            }),
            Arc::new(MemoryStore::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_poll_and_aggregate() {
        let persistence = Arc::new(MemoryStore::new());
        let handle = monitor(persistence.clone(), 3).start();

        // Three polls fill the window, the aggregate fires at 15s.
        tokio::time::sleep(Duration::from_millis(15_500)).await;

        let status = handle.status();
        assert_eq!(status.cycles, 3);
        assert_eq!(status.window_len, 3);
        assert_eq!(status.aggregates_written, 1);
        assert_eq!(persistence.len(), 1);

        let live = handle.facade().live_window();
        assert_eq!(live.len(), 3);
        assert_eq!(live.get("a").unwrap().points.len(), 3);
        assert_eq!(live.get("b").unwrap().points.len(), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_skipped_before_first_poll() {
        let persistence = Arc::new(MemoryStore::new());
        let m = monitor(persistence.clone(), 3);
        assert!(m.aggregator().tick().await.unwrap().is_none());
        assert!(persistence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregate_failure_does_not_stop_loops() {
        let persistence = Arc::new(MemoryStore::new());
        persistence.set_offline(true);
        let handle = monitor(persistence.clone(), 2).start();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(handle.status().aggregate_failures, 1);

        persistence.set_offline(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = handle.status();
        assert_eq!(status.aggregates_written, 1);
        assert_eq!(status.cycles, 4);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let persistence = Arc::new(MemoryStore::new());
        let handle = monitor(persistence, 10).start();
        let view = handle.view();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        handle.shutdown().await;
        let cycles = view.status().cycles;
        assert_eq!(cycles, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(view.status().cycles, cycles);
    }

    /// Storage whose appends take `delay` to complete.
    struct SlowStore {
        inner: MemoryStore,
        started: AtomicU64,
        delay: Duration,
    }

    #[async_trait]
    impl Persistence for SlowStore {
        async fn append(&self, means: MetricMeans) -> Result<AggregateRecord, StorageError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.append(means).await
        }

        async fn last_n(&self, limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
            self.inner.last_n(limit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_append_does_not_delay_next_tick() {
        let registry =
            MetricRegistry::new(vec![MetricSpec::new("a", "1", Transform::Identity)]).unwrap();
        let schedule = Schedule {
            poll_interval: Duration::from_secs(5),
            aggregate_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
        };
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            started: AtomicU64::new(0),
            delay: Duration::from_secs(30),
        });
        let client = Arc::new(CountingClient {
            calls: AtomicU64::new(0),
        });
        let handle = Monitor::new(registry, 2, schedule, client, store.clone())
            .unwrap()
            .start();
        let view = handle.view();

        // Appends start at 10s and 20s; neither finishes before 40s.
        tokio::time::sleep(Duration::from_millis(20_500)).await;
        assert_eq!(store.started.load(Ordering::SeqCst), 2);
        assert_eq!(view.status().aggregates_written, 0);
        assert!(store.inner.is_empty());

        handle.shutdown().await;
        assert_eq!(view.status().aggregates_written, 2);
        assert_eq!(store.inner.len(), 2);
        assert_eq!(store.started.load(Ordering::SeqCst), 2);
    }
}
