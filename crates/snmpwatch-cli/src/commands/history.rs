use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use snmpwatch_core::{AggregateRecord, QueryFacade, SqliteStore, WindowStore};

use super::Overrides;

pub fn run(
    config: Option<&Path>,
    overrides: &Overrides,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = super::load_config(config, overrides)?;
    if !cfg.database.exists() {
        anyhow::bail!("no database at {}", cfg.database.display());
    }
    let db = Arc::new(
        SqliteStore::open(&cfg.database)
            .with_context(|| format!("opening database {}", cfg.database.display()))?,
    );
    let registry = cfg.registry()?;
    let store = Arc::new(WindowStore::new(registry.names(), cfg.window_capacity)?);
    let facade = QueryFacade::new(store, db);

    let rows = super::runtime()?.block_on(facade.history(limit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    print!("{}", render_table(&registry.names(), &rows));
    Ok(())
}

fn render_table(metrics: &[String], rows: &[AggregateRecord]) -> String {
    if rows.is_empty() {
        return "No aggregates stored yet.\n".to_string();
    }

    let mut out = format!("{:<20}", "TIMESTAMP");
    for name in metrics {
        out.push_str(&format!(" {name:>14}"));
    }
    out.push('\n');

    for row in rows {
        let ts = row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        out.push_str(&format!("{ts:<20}"));
        for name in metrics {
            match row.means.get(name) {
                Some(v) => out.push_str(&format!(" {v:>14.3}")),
                None => out.push_str(&format!(" {:>14}", "-")),
            }
        }
        out.push('\n');
    }
    out
}
