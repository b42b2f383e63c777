//! CLI for snmpwatch: poll an SNMP device, serve live windows, keep averaged history.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::Overrides;

#[derive(Parser)]
#[command(name = "snmpwatch")]
#[command(about = "snmpwatch: sliding-window SNMP metrics with persisted averages")]
#[command(version = snmpwatch_core::VERSION)]
struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start polling the device and serve the dashboard API
    Run {
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// SNMP agent host
        #[arg(long)]
        host: Option<String>,

        /// SNMP agent port
        #[arg(long)]
        port: Option<u16>,

        /// HTTP bind address
        #[arg(long)]
        bind: Option<String>,

        /// HTTP port
        #[arg(long)]
        http_port: Option<u16>,

        /// SQLite database path
        #[arg(long, conflicts_with = "no_db")]
        db: Option<PathBuf>,

        /// Keep aggregates in memory only
        #[arg(long)]
        no_db: bool,
    },

    /// Run a single poll cycle and print what each probe returned
    Probe {
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// SNMP agent host
        #[arg(long)]
        host: Option<String>,

        /// SNMP agent port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print stored aggregate rows, oldest first
    History {
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of most recent rows
        #[arg(long, default_value_t = snmpwatch_core::DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the configured metrics
    Metrics {
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            host,
            port,
            bind,
            http_port,
            db,
            no_db,
        } => commands::run::run(
            config.as_deref(),
            &Overrides {
                host,
                port,
                bind,
                http_port,
                db,
            },
            no_db,
        ),
        Commands::Probe { config, host, port } => commands::probe::run(
            config.as_deref(),
            &Overrides {
                host,
                port,
                ..Overrides::default()
            },
        ),
        Commands::History {
            config,
            db,
            limit,
            json,
        } => commands::history::run(
            config.as_deref(),
            &Overrides {
                db,
                ..Overrides::default()
            },
            limit,
            json,
        ),
        Commands::Metrics { config } => commands::metrics::run(config.as_deref()),
    }
}
