use std::path::Path;

use super::Overrides;

pub fn run(config: Option<&Path>) -> anyhow::Result<()> {
    let cfg = super::load_config(config, &Overrides::default())?;
    let registry = cfg.registry()?;

    println!("{} metrics on {}:{}", registry.len(), cfg.snmp.host, cfg.snmp.port);
    println!();
    println!("  {:<16} {:<12} {}", "NAME", "TRANSFORM", "PROBE KEY");
    for spec in registry.specs() {
        println!(
            "  {:<16} {:<12} {}",
            spec.name,
            spec.transform.to_string(),
            spec.probe_key
        );
    }
    Ok(())
}
