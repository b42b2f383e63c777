//! Read-only access to the live window and the stored history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;
use crate::storage::{AggregateRecord, Persistence};
use crate::window::WindowStore;

/// Default number of history rows returned when the caller does not say.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One metric's live series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub name: String,
    /// `(collected_at, value)`, oldest first.
    pub points: Vec<(DateTime<Utc>, f64)>,
}

impl MetricSeries {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

/// The live window of every metric.
///
/// Index `i` of every series (and of `times`) is the same poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveWindow {
    pub times: Vec<DateTime<Utc>>,
    pub series: Vec<MetricSeries>,
}

impl LiveWindow {
    pub fn get(&self, metric: &str) -> Option<&MetricSeries> {
        self.series.iter().find(|s| s.name == metric)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Composes the window store and persistence for external readers.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<WindowStore>,
    persistence: Arc<dyn Persistence>,
}

impl QueryFacade {
    pub fn new(store: Arc<WindowStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self { store, persistence }
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.store.metric_names()
    }

    pub fn window_capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Snapshot of every window, aligned by poll cycle.
    pub fn live_window(&self) -> LiveWindow {
        let snapshot = self.store.snapshot();
        let times = snapshot
            .iter()
            .max_by_key(|w| w.samples.len())
            .map(|w| w.samples.iter().map(|s| s.collected_at).collect())
            .unwrap_or_default();
        let series = snapshot
            .into_iter()
            .map(|w| MetricSeries {
                name: w.metric,
                points: w
                    .samples
                    .into_iter()
                    .map(|s| (s.collected_at, s.value))
                    .collect(),
            })
            .collect();
        LiveWindow { times, series }
    }

    /// The newest `limit` aggregate rows in ascending time order.
    pub async fn history(&self, limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut rows = self.persistence.last_n(limit).await?;
        rows.truncate(limit);
        rows.reverse();
        Ok(rows)
    }
}

impl std::fmt::Debug for QueryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, MetricMeans};
    use crate::window::Sample;
    use async_trait::async_trait;

    fn facade() -> (Arc<WindowStore>, Arc<MemoryStore>, QueryFacade) {
        let store = Arc::new(WindowStore::new(["cpu", "mem"], 3).unwrap());
        let persistence = Arc::new(MemoryStore::new());
        let facade = QueryFacade::new(Arc::clone(&store), persistence.clone());
        (store, persistence, facade)
    }

    fn push(store: &WindowStore, cpu: f64) {
        let now = Utc::now();
        store
            .push_cycle(&[
                ("cpu".to_string(), Sample::new(cpu, now)),
                ("mem".to_string(), Sample::new(1.0, now)),
            ])
            .unwrap();
    }

    #[test]
    fn test_live_window_empty() {
        let (_, _, facade) = facade();
        let live = facade.live_window();
        assert!(live.is_empty());
        assert_eq!(live.series.len(), 2);
        assert!(live.get("cpu").unwrap().points.is_empty());
    }

    #[test]
    fn test_live_window_aligned() {
        let (store, _, facade) = facade();
        for v in [40.0, 60.0, 80.0, 20.0] {
            push(&store, v);
        }
        let live = facade.live_window();
        assert_eq!(live.len(), 3);
        assert_eq!(live.get("cpu").unwrap().values(), vec![60.0, 80.0, 20.0]);
        for series in &live.series {
            let times: Vec<_> = series.points.iter().map(|(t, _)| *t).collect();
            assert_eq!(times, live.times);
        }
    }

    #[tokio::test]
    async fn test_history_ascending_and_limited() {
        let (_, persistence, facade) = facade();
        for i in 0..10 {
            persistence
                .append(MetricMeans::from([("cpu".to_string(), i as f64)]))
                .await
                .unwrap();
        }

        let rows = facade.history(4).await.unwrap();
        assert_eq!(rows.len(), 4);
        let cpu: Vec<f64> = rows.iter().map(|r| r.means["cpu"]).collect();
        assert_eq!(cpu, vec![6.0, 7.0, 8.0, 9.0]);
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        assert_eq!(facade.history(1000).await.unwrap().len(), 10);
        assert!(facade.history(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_propagates_outage() {
        let (_, persistence, facade) = facade();
        persistence.set_offline(true);
        assert!(matches!(
            facade.history(10).await,
            Err(StorageError::Unavailable(_))
        ));
    }

    /// Returns more rows than asked for.
    struct OversharingStore;

    #[async_trait]
    impl Persistence for OversharingStore {
        async fn append(&self, _means: MetricMeans) -> Result<AggregateRecord, StorageError> {
            Err(StorageError::Unavailable("read-only".into()))
        }

        async fn last_n(&self, _limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
            let base = Utc::now();
            Ok((0..5)
                .rev()
                .map(|i| AggregateRecord {
                    id: i,
                    timestamp: base + chrono::Duration::seconds(i),
                    means: MetricMeans::new(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_history_enforces_limit() {
        let store = Arc::new(WindowStore::new(["cpu"], 3).unwrap());
        let facade = QueryFacade::new(store, Arc::new(OversharingStore));
        let rows = facade.history(2).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
