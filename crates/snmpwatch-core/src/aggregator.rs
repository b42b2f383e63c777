//! Reduce the live window to one row of means and hand it to storage.

use std::sync::Arc;

use crate::error::StorageError;
use crate::storage::{AggregateRecord, MetricMeans, Persistence};
use crate::window::WindowStore;

/// Turns the current window contents into an [`AggregateRecord`].
///
/// Fallback samples from failed probes are part of the window and therefore
/// part of the mean.
pub struct Aggregator {
    store: Arc<WindowStore>,
    persistence: Arc<dyn Persistence>,
}

impl Aggregator {
    pub fn new(store: Arc<WindowStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self { store, persistence }
    }

    /// Means of the current window, or `None` before the first poll cycle.
    pub fn current_means(&self) -> Option<MetricMeans> {
        self.store.means().map(|m| m.into_iter().collect())
    }

    /// One aggregate cycle: compute means and append exactly one row.
    ///
    /// Returns `Ok(None)` without touching storage when the window is empty.
    pub async fn tick(&self) -> Result<Option<AggregateRecord>, StorageError> {
        let Some(means) = self.current_means() else {
            log::debug!("aggregate skipped: window is empty");
            return Ok(None);
        };

        let record = self.persistence.append(means).await?;
        log::info!(
            "aggregate saved id={} metrics={} at {}",
            record.id,
            record.means.len(),
            record.timestamp.to_rfc3339()
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::window::Sample;
    use chrono::Utc;

    fn setup() -> (Arc<WindowStore>, Arc<MemoryStore>, Aggregator) {
        let store = Arc::new(WindowStore::new(["m", "n"], 150).unwrap());
        let persistence = Arc::new(MemoryStore::new());
        let agg = Aggregator::new(Arc::clone(&store), persistence.clone());
        (store, persistence, agg)
    }

    fn push_cycle(store: &WindowStore, m: f64, n: f64) {
        let now = Utc::now();
        store
            .push_cycle(&[
                ("m".to_string(), Sample::new(m, now)),
                ("n".to_string(), Sample::new(n, now)),
            ])
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_window_skips_tick() {
        let (_, persistence, agg) = setup();
        assert!(agg.tick().await.unwrap().is_none());
        assert!(persistence.is_empty());
    }

    #[tokio::test]
    async fn test_tick_stores_exact_mean() {
        let (store, persistence, agg) = setup();
        for v in [10.0, 20.0, 30.0] {
            push_cycle(&store, v, 1.0);
        }

        let record = agg.tick().await.unwrap().unwrap();
        assert_eq!(record.means["m"], 20.0);
        assert_eq!(record.means["n"], 1.0);
        assert_eq!(persistence.len(), 1);
    }

    #[tokio::test]
    async fn test_each_tick_appends_once() {
        let (store, persistence, agg) = setup();
        push_cycle(&store, 5.0, 5.0);
        agg.tick().await.unwrap();
        agg.tick().await.unwrap();
        assert_eq!(persistence.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_zeros_count_in_mean() {
        let (store, _, agg) = setup();
        push_cycle(&store, 30.0, 0.0);
        push_cycle(&store, 0.0, 0.0);
        let record = agg.tick().await.unwrap().unwrap();
        assert_eq!(record.means["m"], 15.0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (store, persistence, agg) = setup();
        push_cycle(&store, 1.0, 1.0);
        persistence.set_offline(true);
        assert!(matches!(
            agg.tick().await,
            Err(StorageError::Unavailable(_))
        ));
    }
}
