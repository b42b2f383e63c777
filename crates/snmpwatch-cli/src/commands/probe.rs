use std::path::Path;
use std::sync::Arc;

use snmpwatch_core::{Sampler, SnmpGetClient, WindowStore};

use super::Overrides;

pub fn run(config: Option<&Path>, overrides: &Overrides) -> anyhow::Result<()> {
    let cfg = super::load_config(config, overrides)?;
    let registry = Arc::new(cfg.registry()?);
    let store = Arc::new(WindowStore::new(registry.names(), 1)?);
    let client = Arc::new(SnmpGetClient::new(cfg.snmp.clone()));
    let sampler = Sampler::new(Arc::clone(&registry), client, store, cfg.probe_timeout);

    println!("Probing {}:{} ...", cfg.snmp.host, cfg.snmp.port);
    println!();

    let report = super::runtime()?.block_on(sampler.poll_once())?;

    println!("  {:<16} {:>14}  {:>8}  {}", "METRIC", "VALUE", "TIME", "STATUS");
    for outcome in &report.outcomes {
        let status = match &outcome.result {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("{} ({e})", e.kind()),
        };
        println!(
            "  {:<16} {:>14.3}  {:>7.3}s  {}",
            outcome.metric,
            outcome.recorded_value(),
            outcome.elapsed.as_secs_f64(),
            status
        );
    }
    println!();
    println!(
        "  {}/{} probes answered in {:.3}s",
        report.outcomes.len() - report.failures(),
        report.outcomes.len(),
        report.elapsed.as_secs_f64()
    );

    if report.failures() == report.outcomes.len() {
        anyhow::bail!("no probe answered; check host, community and that snmpget is installed");
    }
    Ok(())
}
