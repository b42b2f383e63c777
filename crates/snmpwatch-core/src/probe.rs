//! Probe clients: fetch one raw integer reading for one metric.
//!
//! [`SnmpGetClient`] shells out to net-snmp's `snmpget` and parses the typed
//! value from its output. Anything else that can answer "what is the current
//! value behind this key" can implement [`ProbeClient`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::ProbeFailure;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Value labels `snmpget` prints before a numeric reading.
const NUMERIC_LABELS: &[&str] = &["Counter64", "Counter32", "Gauge32", "INTEGER"];

/// Source of raw metric readings.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Fetch the raw value behind `probe_key`, giving up after `timeout`.
    async fn fetch(&self, probe_key: &str, timeout: Duration) -> Result<u64, ProbeFailure>;
}

/// Where and how to reach the SNMP agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub community: String,
    /// Path or name of the `snmpget` binary.
    pub command: String,
}

impl Default for SnmpTarget {
    fn default() -> Self {
        Self {
            host: "10.1.108.43".to_string(),
            port: 161,
            community: "comm1".to_string(),
            command: "snmpget".to_string(),
        }
    }
}

impl SnmpTarget {
    fn agent(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Probe client backed by the external `snmpget` program (SNMP v2c).
#[derive(Debug, Clone)]
pub struct SnmpGetClient {
    target: SnmpTarget,
}

impl SnmpGetClient {
    pub fn new(target: SnmpTarget) -> Self {
        Self { target }
    }

    fn command(&self, oid: &str) -> Command {
        let mut cmd = Command::new(&self.target.command);
        cmd.args(["-v2c", "-c", &self.target.community])
            .arg(self.target.agent())
            .arg(oid)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ProbeClient for SnmpGetClient {
    async fn fetch(&self, probe_key: &str, timeout: Duration) -> Result<u64, ProbeFailure> {
        log::debug!(
            "executing {} -v2c -c <community> {} {probe_key}",
            self.target.command,
            self.target.agent()
        );

        let child = self
            .command(probe_key)
            .spawn()
            .map_err(|e| ProbeFailure::Transport(format!("failed to spawn snmpget: {e}")))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeFailure::Timeout)?
            .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(ProbeFailure::Transport(stderr.trim().to_string()));
        }
        if !output.status.success() {
            return Err(ProbeFailure::Transport(format!(
                "snmpget exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_snmpget_output(&stdout)
    }
}

/// Extract the integer from `OID = <Label>: <digits>`.
///
/// Only the labels in [`NUMERIC_LABELS`] are accepted (case-insensitive).
pub fn parse_snmpget_output(output: &str) -> Result<u64, ProbeFailure> {
    let line = output.trim();
    let parse_err = || ProbeFailure::Parse(line.to_string());

    let (_, rhs) = line.split_once('=').ok_or_else(parse_err)?;
    let (label, value) = rhs.trim_start().split_once(':').ok_or_else(parse_err)?;

    if !NUMERIC_LABELS
        .iter()
        .any(|l| l.eq_ignore_ascii_case(label.trim()))
    {
        return Err(parse_err());
    }

    let digits: String = value
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u64>().map_err(|_| parse_err())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter64() {
        let out = "SNMPv2-SMI::enterprises.23668.8107.2.1.1.110.13 = Counter64: 123456789\n";
        assert_eq!(parse_snmpget_output(out), Ok(123_456_789));
    }

    #[test]
    fn test_parse_all_numeric_labels() {
        for label in ["Counter64", "Counter32", "Gauge32", "INTEGER", "integer", "gauge32"] {
            let out = format!("iso.3.6.1 = {label}: 42");
            assert_eq!(parse_snmpget_output(&out), Ok(42), "label {label}");
        }
    }

    #[test]
    fn test_parse_trailing_units() {
        assert_eq!(parse_snmpget_output("x = Gauge32: 17 percent"), Ok(17));
    }

    #[test]
    fn test_parse_rejects_other_types() {
        let out = "iso.3.6.1 = STRING: \"hello\"";
        assert!(matches!(
            parse_snmpget_output(out),
            Err(ProbeFailure::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_no_such_object() {
        let out = "iso.3.6.1 = No Such Object available on this agent at this OID";
        assert!(matches!(
            parse_snmpget_output(out),
            Err(ProbeFailure::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_negative_and_empty() {
        assert!(parse_snmpget_output("x = INTEGER: -5").is_err());
        assert!(parse_snmpget_output("").is_err());
    }

    #[test]
    fn test_default_target() {
        let t = SnmpTarget::default();
        assert_eq!(t.agent(), "10.1.108.43:161");
        assert_eq!(t.community, "comm1");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transport_failure() {
        let client = SnmpGetClient::new(SnmpTarget {
            command: "/nonexistent/snmpget-binary".to_string(),
            ..SnmpTarget::default()
        });
        let result = client.fetch("1.3.6.1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeFailure::Transport(_))));
    }
}
