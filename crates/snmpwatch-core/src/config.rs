//! Monitor configuration.
//!
//! Loaded from a YAML file (every field optional) and then overridden by CLI
//! flags. Durations use humantime notation (`5s`, `12m 30s`).
//!
//! ```yaml
//! poll_interval: 5s
//! window_capacity: 150
//! probe_timeout: 10s
//! # aggregate_interval defaults to poll_interval * window_capacity
//! snmp:
//!   host: 10.1.108.43
//!   port: 161
//!   community: comm1
//! database: monitor.db
//! http:
//!   bind: 0.0.0.0
//!   port: 8000
//! metrics:
//!   - name: cpu_usage
//!     probe_key: 1.3.6.1.4.1.23668.8107.1.6.1.0
//!   - name: in_traffic1
//!     probe_key: 1.3.6.1.4.1.23668.8107.2.1.1.110.13
//!     transform: { kind: divide, by: 1000000.0 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::metric::{MetricRegistry, MetricSpec, default_specs};
use crate::probe::{DEFAULT_PROBE_TIMEOUT, SnmpTarget};
use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Everything the monitor needs at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    pub window_capacity: usize,

    /// Unset means one aggregate per full window refresh.
    #[serde(with = "humantime_serde")]
    pub aggregate_interval: Option<Duration>,

    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    pub snmp: SnmpTarget,

    /// SQLite database file.
    pub database: PathBuf,

    pub http: HttpConfig,

    pub metrics: Vec<MetricSpec>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            aggregate_interval: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            snmp: SnmpTarget::default(),
            database: PathBuf::from("monitor.db"),
            http: HttpConfig::default(),
            metrics: default_specs(),
        }
    }
}

impl MonitorConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_yaml_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml_str(data: &str) -> Result<Self, serde_yaml::Error> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data)
    }

    /// Aggregate cadence, derived from the window when not set explicitly.
    pub fn effective_aggregate_interval(&self) -> Duration {
        self.aggregate_interval.unwrap_or_else(|| {
            self.poll_interval
                .saturating_mul(u32::try_from(self.window_capacity).unwrap_or(u32::MAX))
        })
    }

    /// Validated metric registry.
    pub fn registry(&self) -> Result<MetricRegistry, ConfigError> {
        MetricRegistry::new(self.metrics.clone())
    }

    /// Check intervals, capacity and metric definitions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval must be positive"));
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::invalid("window_capacity must be positive"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::invalid("probe_timeout must be positive"));
        }
        let aggregate = self.effective_aggregate_interval();
        if aggregate <= self.poll_interval {
            return Err(ConfigError::invalid(format!(
                "aggregate_interval {aggregate:?} must be longer than poll_interval {:?}",
                self.poll_interval
            )));
        }
        if self.snmp.host.trim().is_empty() {
            return Err(ConfigError::invalid("snmp.host is required"));
        }
        self.registry()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Transform;

    #[test]
    fn test_defaults_match_device() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.window_capacity, 150);
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.metrics.len(), 6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_aggregate_interval_derived_from_window() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.effective_aggregate_interval(), Duration::from_secs(750));

        let cfg = MonitorConfig {
            aggregate_interval: Some(Duration::from_secs(60)),
            ..MonitorConfig::default()
        };
        assert_eq!(cfg.effective_aggregate_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_partial_override() {
        let cfg = MonitorConfig::from_yaml_str(
            "poll_interval: 2s\nwindow_capacity: 10\nsnmp:\n  host: 192.0.2.1\n",
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.window_capacity, 10);
        assert_eq!(cfg.snmp.host, "192.0.2.1");
        assert_eq!(cfg.snmp.community, "comm1");
        assert_eq!(cfg.effective_aggregate_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_yaml_metrics() {
        let cfg = MonitorConfig::from_yaml_str(
            r"
metrics:
  - name: cpu
    probe_key: 1.3.6.1.4.1.1
  - name: rx
    probe_key: 1.3.6.1.4.1.2
    transform: { kind: divide, by: 1000.0 }
aggregate_interval: 1m
",
        )
        .unwrap();
        assert_eq!(cfg.metrics.len(), 2);
        assert_eq!(cfg.metrics[0].transform, Transform::Identity);
        assert_eq!(cfg.metrics[1].transform, Transform::Divide(1000.0));
        assert_eq!(cfg.aggregate_interval, Some(Duration::from_secs(60)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = MonitorConfig::from_yaml_str("   \n").unwrap();
        assert_eq!(cfg.window_capacity, DEFAULT_WINDOW_CAPACITY);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_cap = MonitorConfig {
            window_capacity: 0,
            ..MonitorConfig::default()
        };
        assert!(zero_cap.validate().is_err());

        let zero_poll = MonitorConfig {
            poll_interval: Duration::ZERO,
            ..MonitorConfig::default()
        };
        assert!(zero_poll.validate().is_err());

        let short_aggregate = MonitorConfig {
            aggregate_interval: Some(Duration::from_secs(5)),
            ..MonitorConfig::default()
        };
        assert!(short_aggregate.validate().is_err());

        let no_metrics = MonitorConfig {
            metrics: Vec::new(),
            ..MonitorConfig::default()
        };
        assert!(no_metrics.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = MonitorConfig::load(Path::new("/nonexistent/snmpwatch.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snmpwatch.yaml");
        std::fs::write(&path, "window_capacity: 30\nhttp:\n  port: 9100\n").unwrap();
        let cfg = MonitorConfig::load(&path).unwrap();
        assert_eq!(cfg.window_capacity, 30);
        assert_eq!(cfg.http.addr(), "0.0.0.0:9100");
    }
}
