pub mod history;
pub mod metrics;
pub mod probe;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Context;
use snmpwatch_core::MonitorConfig;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub http_port: Option<u16>,
    pub db: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut MonitorConfig) {
        if let Some(host) = &self.host {
            cfg.snmp.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.snmp.port = port;
        }
        if let Some(bind) = &self.bind {
            cfg.http.bind = bind.clone();
        }
        if let Some(port) = self.http_port {
            cfg.http.port = port;
        }
        if let Some(db) = &self.db {
            cfg.database = db.clone();
        }
    }
}

/// Load the config file (or defaults), apply flag overrides and validate.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<MonitorConfig> {
    let mut cfg = match path {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    overrides.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("starting tokio runtime")
}
