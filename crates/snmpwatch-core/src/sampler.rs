//! One poll cycle: probe every metric concurrently, then push the results.
//!
//! Each probe runs as its own tokio task with its own timeout. A failed or
//! timed-out probe is logged and replaced by [`FALLBACK_VALUE`] so every
//! window grows by exactly one sample per cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::error::{ContractError, ProbeFailure};
use crate::metric::MetricRegistry;
use crate::probe::ProbeClient;
use crate::window::{Sample, WindowStore};

/// Value recorded for a metric whose probe failed this cycle.
pub const FALLBACK_VALUE: f64 = 0.0;

/// Result of probing one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub metric: String,
    /// Transformed value, or why there is none.
    pub result: Result<f64, ProbeFailure>,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    /// The value that went into the window.
    pub fn recorded_value(&self) -> f64 {
        self.result.as_ref().copied().unwrap_or(FALLBACK_VALUE)
    }
}

/// Everything one poll cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub collected_at: DateTime<Utc>,
    /// Registry order.
    pub outcomes: Vec<ProbeOutcome>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn outcome(&self, metric: &str) -> Option<&ProbeOutcome> {
        self.outcomes.iter().find(|o| o.metric == metric)
    }
}

/// Polls every registered metric and feeds the window store.
pub struct Sampler {
    registry: Arc<MetricRegistry>,
    client: Arc<dyn ProbeClient>,
    store: Arc<WindowStore>,
    probe_timeout: Duration,
}

impl Sampler {
    pub fn new(
        registry: Arc<MetricRegistry>,
        client: Arc<dyn ProbeClient>,
        store: Arc<WindowStore>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            store,
            probe_timeout,
        }
    }

    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Run one poll cycle and push one sample per metric.
    ///
    /// Completes once every probe has answered, failed or timed out. The only
    /// error is a registry/store mismatch, which is a wiring bug.
    pub async fn poll_once(&self) -> Result<CycleReport, ContractError> {
        let started = Instant::now();
        let specs = self.registry.specs();

        let mut tasks = JoinSet::new();
        for (idx, spec) in specs.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let key = spec.probe_key.clone();
            let timeout = self.probe_timeout;
            tasks.spawn(async move {
                let t0 = Instant::now();
                // Enforced here as well as inside the client.
                let raw = match tokio::time::timeout(timeout, client.fetch(&key, timeout)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeFailure::Timeout),
                };
                (idx, raw, t0.elapsed())
            });
        }

        let mut raws: Vec<Option<(Result<u64, ProbeFailure>, Duration)>> = vec![None; specs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, raw, elapsed)) => raws[idx] = Some((raw, elapsed)),
                Err(e) => log::error!("probe task failed: {e}"),
            }
        }

        let collected_at = Utc::now();
        let mut outcomes = Vec::with_capacity(specs.len());
        let mut cycle = Vec::with_capacity(specs.len());

        for (spec, raw) in specs.iter().zip(raws) {
            let (result, elapsed) = match raw {
                Some((raw, elapsed)) => (raw.map(|v| spec.transform.apply(v)), elapsed),
                None => (
                    Err(ProbeFailure::Transport("probe task panicked".to_string())),
                    started.elapsed(),
                ),
            };

            match &result {
                Ok(value) => log::info!(
                    "probe metric={} key={} value={value:.3} elapsed_ms={}",
                    spec.name,
                    spec.probe_key,
                    elapsed.as_millis()
                ),
                Err(failure) => log::warn!(
                    "probe metric={} key={} failure={} detail=\"{failure}\" elapsed_ms={}",
                    spec.name,
                    spec.probe_key,
                    failure.kind(),
                    elapsed.as_millis()
                ),
            }

            let outcome = ProbeOutcome {
                metric: spec.name.clone(),
                result,
                elapsed,
            };
            cycle.push((
                spec.name.clone(),
                Sample::new(outcome.recorded_value(), collected_at),
            ));
            outcomes.push(outcome);
        }

        self.store.push_cycle(&cycle)?;

        let report = CycleReport {
            collected_at,
            outcomes,
            elapsed: started.elapsed(),
        };
        log::info!(
            "poll {} | failures={}/{} | elapsed_ms={}",
            summary_line(&report),
            report.failures(),
            report.outcomes.len(),
            report.elapsed.as_millis()
        );
        Ok(report)
    }
}

fn summary_line(report: &CycleReport) -> String {
    report
        .outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(v) => format!("{}={v:.3}", o.metric),
            Err(_) => format!("{}=N/A", o.metric),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
