//! Metric definitions and the fixed registry of metrics polled from a device.
//!
//! Every metric is described by a [`MetricSpec`]: a name, the opaque key handed
//! to the probe client (an OID for SNMP), and a [`Transform`] that turns the
//! raw integer reading into engineering units.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Conversion applied to a raw probe reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "by")]
pub enum Transform {
    /// Raw value passes through unchanged (CPU %, memory).
    #[default]
    Identity,
    /// Raw value divided by a constant, e.g. bits/s to Mb/s with `1e6`.
    Divide(f64),
}

impl Transform {
    /// Apply the transform to a raw reading.
    pub fn apply(&self, raw: u64) -> f64 {
        match self {
            Self::Identity => raw as f64,
            Self::Divide(d) => raw as f64 / d,
        }
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Divide(d) => write!(f, "÷{d}"),
        }
    }
}

/// Static description of one polled metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Identifier used as the window key and the JSON field name.
    pub name: String,
    /// Opaque handle passed to the probe client.
    pub probe_key: String,
    /// Raw → engineering-unit conversion.
    #[serde(default)]
    pub transform: Transform,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, probe_key: impl Into<String>, transform: Transform) -> Self {
        Self {
            name: name.into(),
            probe_key: probe_key.into(),
            transform,
        }
    }
}

/// Immutable, ordered set of metrics for one process lifetime.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    specs: Vec<MetricSpec>,
}

impl MetricRegistry {
    /// Build a registry, rejecting empty sets, empty or duplicate names, empty
    /// probe keys and zero divisors.
    pub fn new(specs: Vec<MetricSpec>) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::invalid("at least one metric is required"));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::invalid("metric name must not be empty"));
            }
            if spec.probe_key.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "metric {} has an empty probe key",
                    spec.name
                )));
            }
            if let Transform::Divide(d) = spec.transform
                && (d == 0.0 || !d.is_finite())
            {
                return Err(ConfigError::invalid(format!(
                    "metric {} has an invalid divisor {d}",
                    spec.name
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateMetric {
                    name: spec.name.clone(),
                });
            }
        }

        Ok(Self { specs })
    }

    /// The two-interface device this tool was written for.
    pub fn device_default() -> Self {
        Self {
            specs: default_specs(),
        }
    }

    pub fn specs(&self) -> &[MetricSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Metric names in registry order.
    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }
}

/// Bits/s → Mb/s.
const MEGA: f64 = 1e6;

/// Metrics of the monitored device: two interfaces (in/out), CPU and memory.
pub fn default_specs() -> Vec<MetricSpec> {
    vec![
        MetricSpec::new(
            "in_traffic1",
            "1.3.6.1.4.1.23668.8107.2.1.1.110.13",
            Transform::Divide(MEGA),
        ),
        MetricSpec::new(
            "out_traffic1",
            "1.3.6.1.4.1.23668.8107.2.1.1.121.13",
            Transform::Divide(MEGA),
        ),
        MetricSpec::new(
            "in_traffic2",
            "1.3.6.1.4.1.23668.8107.2.1.1.110.14",
            Transform::Divide(MEGA),
        ),
        MetricSpec::new(
            "out_traffic2",
            "1.3.6.1.4.1.23668.8107.2.1.1.121.14",
            Transform::Divide(MEGA),
        ),
        MetricSpec::new(
            "cpu_usage",
            "1.3.6.1.4.1.23668.8107.1.6.1.0",
            Transform::Identity,
        ),
        MetricSpec::new(
            "mem_used",
            "1.3.6.1.4.1.23668.8107.1.6.7.0",
            Transform::Identity,
        ),
    ]
}
