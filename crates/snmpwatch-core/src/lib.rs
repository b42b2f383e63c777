//! # snmpwatch-core
//!
//! Sampling, sliding-window and aggregation engine for SNMP device metrics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use snmpwatch_core::{Monitor, MonitorConfig, SnmpGetClient, SqliteStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = MonitorConfig::default();
//! let client = Arc::new(SnmpGetClient::new(cfg.snmp.clone()));
//! let db = Arc::new(SqliteStore::open(&cfg.database)?);
//!
//! let handle = Monitor::from_config(&cfg, client, db)?.start();
//! let live = handle.facade().live_window();
//! println!("{} samples per metric", live.len());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Probe client → Sampler (one task per metric) → WindowStore → Aggregator → Persistence
//!
//! Every poll cycle appends exactly one sample to every metric's window; a
//! probe that fails or times out contributes [`FALLBACK_VALUE`]. Windows are
//! bounded FIFOs, so the newest `capacity` samples are always what is served.
//! Every aggregate cycle reduces the windows to per-metric means and appends
//! one row to storage. [`QueryFacade`] reads both sides for external callers.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod metric;
pub mod monitor;
pub mod probe;
pub mod query;
pub mod sampler;
pub mod storage;
pub mod window;

pub use aggregator::Aggregator;
pub use config::{DEFAULT_POLL_INTERVAL, HttpConfig, MonitorConfig};
pub use error::{ConfigError, ContractError, ProbeFailure, StorageError};
pub use metric::{MetricRegistry, MetricSpec, Transform, default_specs};
pub use monitor::{Monitor, MonitorHandle, MonitorStatus, MonitorView, Schedule};
pub use probe::{
    DEFAULT_PROBE_TIMEOUT, ProbeClient, SnmpGetClient, SnmpTarget, parse_snmpget_output,
};
pub use query::{DEFAULT_HISTORY_LIMIT, LiveWindow, MetricSeries, QueryFacade};
pub use sampler::{CycleReport, FALLBACK_VALUE, ProbeOutcome, Sampler};
pub use storage::{AggregateRecord, MemoryStore, MetricMeans, Persistence, SqliteStore};
pub use window::{DEFAULT_WINDOW_CAPACITY, Sample, WindowSnapshot, WindowStore};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
