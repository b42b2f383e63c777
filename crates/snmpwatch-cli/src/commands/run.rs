use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use snmpwatch_core::{MemoryStore, Monitor, Persistence, SnmpGetClient, SqliteStore};

use super::Overrides;

pub fn run(config: Option<&Path>, overrides: &Overrides, no_db: bool) -> anyhow::Result<()> {
    let cfg = super::load_config(config, overrides)?;

    let persistence: Arc<dyn Persistence> = if no_db {
        log::warn!("--no-db: aggregates are kept in memory and lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::open(&cfg.database)
                .with_context(|| format!("opening database {}", cfg.database.display()))?,
        )
    };

    let base = format!("http://{}", cfg.http.addr());
    println!("snmpwatch v{}", snmpwatch_core::VERSION);
    println!("   device   {}:{} ({} metrics)", cfg.snmp.host, cfg.snmp.port, cfg.metrics.len());
    println!(
        "   window   {} samples every {:?}, aggregate every {:?}",
        cfg.window_capacity,
        cfg.poll_interval,
        cfg.effective_aggregate_interval()
    );
    println!("   api      {base}");
    println!();
    println!("   Endpoints:");
    println!("     GET /                 API index (try: curl {base})");
    println!("     GET /data             Live sliding window");
    println!("     GET /historical-data  Stored averages (limit=N, default 100)");
    println!("     GET /health           Monitor counters");
    println!();

    let client = Arc::new(SnmpGetClient::new(cfg.snmp.clone()));
    let monitor = Monitor::from_config(&cfg, client, persistence)?;

    let rt = super::runtime()?;
    rt.block_on(async move {
        let handle = monitor.start();

        let shutdown = {
            let cancel = handle.cancellation_token();
            async move {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            log::error!("failed to listen for Ctrl+C: {e}");
                        }
                        log::info!("received Ctrl+C, shutting down");
                    }
                    _ = cancel.cancelled() => {}
                }
            }
        };

        let served = snmpwatch_server::run_server(
            handle.view(),
            &cfg.http.bind,
            cfg.http.port,
            shutdown,
        )
        .await;

        handle.shutdown().await;
        served.with_context(|| format!("serving on {}", cfg.http.addr()))
    })
}
