//! Fixed-capacity per-metric sample history.
//!
//! The [`WindowStore`] holds one `SlidingWindow` per registered metric behind
//! a single `RwLock`. Writers (the sampler) push a whole poll cycle under one
//! write guard, so readers always see every window at the same length and
//! never observe an evicted-but-not-yet-replaced state.

use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ConfigError, ContractError};

/// Default number of samples retained per metric.
pub const DEFAULT_WINDOW_CAPACITY: usize = 150;

/// One transformed reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub value: f64,
    pub collected_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: f64, collected_at: DateTime<Utc>) -> Self {
        Self {
            value,
            collected_at,
        }
    }
}

/// Age-ordered ring of at most `capacity` samples.
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest sample first when full.
    fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value).sum();
        Some(sum / self.samples.len() as f64)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

/// Copy of one metric's window, taken under the store's read lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub metric: String,
    pub samples: Vec<Sample>,
}

impl WindowSnapshot {
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

struct Inner {
    /// Registry order is preserved so snapshots come back in a stable order.
    windows: Vec<(String, SlidingWindow)>,
}

impl Inner {
    fn index_of(&self, metric: &str) -> Result<usize, ContractError> {
        self.windows
            .iter()
            .position(|(name, _)| name == metric)
            .ok_or_else(|| ContractError::UnknownMetric {
                name: metric.to_string(),
            })
    }
}

/// Thread-safe set of sliding windows keyed by metric name.
pub struct WindowStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl WindowStore {
    /// Create a store with one empty window per metric name.
    pub fn new<I, S>(metrics: I, capacity: usize) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if capacity == 0 {
            return Err(ConfigError::invalid("window capacity must be positive"));
        }

        let mut windows: Vec<(String, SlidingWindow)> = Vec::new();
        for name in metrics {
            let name = name.into();
            if windows.iter().any(|(n, _)| *n == name) {
                return Err(ConfigError::DuplicateMetric { name });
            }
            windows.push((name, SlidingWindow::new(capacity)));
        }
        if windows.is_empty() {
            return Err(ConfigError::invalid("window store needs at least one metric"));
        }

        Ok(Self {
            inner: RwLock::new(Inner { windows }),
            capacity,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.read().windows.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Append one sample to one metric's window.
    pub fn push(&self, metric: &str, sample: Sample) -> Result<(), ContractError> {
        let mut inner = self.write();
        let idx = inner.index_of(metric)?;
        inner.windows[idx].1.push(sample);
        Ok(())
    }

    /// Append one sample to every window as a single atomic step.
    ///
    /// `samples` must name every registered metric exactly once; nothing is
    /// mutated if it does not.
    pub fn push_cycle(&self, samples: &[(String, Sample)]) -> Result<(), ContractError> {
        let mut inner = self.write();

        let mut order = Vec::with_capacity(samples.len());
        for (metric, _) in samples {
            let idx = inner.index_of(metric)?;
            if order.contains(&idx) {
                return Err(ContractError::DuplicateSample {
                    name: metric.clone(),
                });
            }
            order.push(idx);
        }
        for (name, _) in &inner.windows {
            if !samples.iter().any(|(m, _)| m == name) {
                return Err(ContractError::MissingSample { name: name.clone() });
            }
        }

        for (idx, (_, sample)) in order.into_iter().zip(samples) {
            inner.windows[idx].1.push(*sample);
        }
        Ok(())
    }

    /// Copies of every window, consistent as of one instant.
    pub fn snapshot(&self) -> Vec<WindowSnapshot> {
        self.read()
            .windows
            .iter()
            .map(|(name, window)| WindowSnapshot {
                metric: name.clone(),
                samples: window.iter().copied().collect(),
            })
            .collect()
    }

    /// Mean of one metric's retained samples; `Ok(None)` when empty.
    pub fn mean_of(&self, metric: &str) -> Result<Option<f64>, ContractError> {
        let inner = self.read();
        let idx = inner.index_of(metric)?;
        Ok(inner.windows[idx].1.mean())
    }

    /// Means of every non-empty window under one read lock, in registry order.
    ///
    /// Returns `None` when no sample has been pushed yet.
    pub fn means(&self) -> Option<Vec<(String, f64)>> {
        let inner = self.read();
        let means: Vec<(String, f64)> = inner
            .windows
            .iter()
            .filter_map(|(name, w)| w.mean().map(|m| (name.clone(), m)))
            .collect();
        if means.is_empty() { None } else { Some(means) }
    }

    /// Length of the longest window.
    pub fn len(&self) -> usize {
        self.read()
            .windows
            .iter()
            .map(|(_, w)| w.len())
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.read().windows.iter().all(|(_, w)| w.is_empty())
    }
}

impl std::fmt::Debug for WindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowStore")
            .field("capacity", &self.capacity)
            .field("metrics", &self.metric_names())
            .finish_non_exhaustive()
    }
}
