//! pulsemon entry point.
//!
//! `run` starts the monitor and blocks until SIGTERM/SIGINT or a fatal input
//! failure. `dump` and `usage` read a timestamp log (possibly while the
//! monitor is still appending to it) and print tab-separated or JSON reports.

mod dates;
mod signals;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use pulse_common::config::MonitorConfig;
use pulse_log::{
    open_source, read_timestamps, usage_report, write_json, write_timestamps_tsv, write_usage_tsv,
    TimeRange,
};
use pulse_runtime::{Monitor, MonitorParts};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::signals::SignalBridge;

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "PULSEMON_CONFIG";

/// pulsemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "pulsemon",
    about = "Water meter pulse monitor - debounced counting, alerts and usage reports",
    version,
    long_about = None
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor until SIGTERM or SIGINT.
    Run {
        /// Path to a configuration file (TOML).
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print logged pulses: pulse, nanosecond, time.
    Dump {
        #[command(flatten)]
        query: Query,
    },
    /// Print usage per period with running totals.
    Usage {
        #[command(flatten)]
        query: Query,

        /// Reporting period.
        #[arg(long, default_value = "24h")]
        period: humantime::Duration,

        /// Volume per pulse (defaults to the configured value).
        #[arg(long)]
        volume_per_pulse: Option<u64>,

        /// Volume unit (defaults to the configured value).
        #[arg(long)]
        unit: Option<String>,
    },
    /// Load and validate the configuration, then print it.
    CheckConfig {
        /// Path to a configuration file (TOML).
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// Arguments shared by the log reports.
#[derive(Args, Debug)]
struct Query {
    /// Timestamp log, or `-` for standard input (defaults to the configured log).
    file: Option<String>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Earliest pulse to include, MM-DD-YY[:HH:MM] local time.
    #[arg(long)]
    start: Option<String>,

    /// Latest pulse to include, MM-DD-YY[:HH:MM] local time (default: now).
    #[arg(long)]
    end: Option<String>,

    /// Print JSON instead of tab-separated text.
    #[arg(long)]
    json: bool,
}

impl Query {
    fn range(&self) -> Result<TimeRange> {
        let mut range = TimeRange::new(TimeRange::all().start, Utc::now());
        if let Some(start) = &self.start {
            range.start = dates::parse_local(start).context("invalid --start")?;
        }
        if let Some(end) = &self.end {
            range.end = dates::parse_local(end).context("invalid --end")?;
        }
        Ok(range)
    }

    fn source(&self, config: &MonitorConfig) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| config.timestamp_log.display().to_string())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Command::Run { config } => run(config.as_deref()),
        Command::Dump { query } => dump(&query),
        Command::Usage {
            query,
            period,
            volume_per_pulse,
            unit,
        } => usage(&query, period.into(), volume_per_pulse, unit),
        Command::CheckConfig { config } => check_config(config.as_deref()),
    }
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr so report output on stdout stays clean.
fn init_logging(level: &str) {
    let filter = format!(
        "pulsemon={level},pulse_daemon={level},pulse_runtime={level},pulse_log={level},pulse_io={level},pulse_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `PULSEMON_CONFIG` environment variable
/// 3. `/etc/pulsemon/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(explicit: Option<&Path>) -> Result<MonitorConfig> {
    if let Some(config_path) = explicit {
        info!(?config_path, "Loading config from command-line argument");
        return MonitorConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return MonitorConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/pulsemon/config.toml", "config/default.toml"] {
        let config_path = Path::new(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config");
            return MonitorConfig::from_file(config_path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(MonitorConfig::default())
}

fn run(config_path: Option<&Path>) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting pulsemon");

    let config = load_config(config_path)?;
    config.validate().context("Invalid configuration")?;
    info!(
        polling = %humantime::format_duration(config.polling_interval),
        debounce = %humantime::format_duration(config.debounce),
        debounce_count = config.debounce_count(),
        input = ?config.input.driver,
        log = %config.timestamp_log.display(),
        "Configuration loaded"
    );

    let parts = MonitorParts::from_config(&config).context("Failed to open I/O drivers")?;
    let monitor = Monitor::start(config, parts).context("Failed to start monitor")?;
    let signals =
        SignalBridge::install(&monitor.shutdown_handle()).context("Failed to set up signal handlers")?;

    let result = monitor.wait();
    if let Some(signal) = signals.stop() {
        info!(%signal, "Stopped by signal");
    }
    let summary = result.context("Monitor stopped on error")?;
    info!(
        pulses = summary.pulses,
        logged = summary.logged,
        dropped = summary.dropped_events,
        "pulsemon stopped"
    );
    Ok(())
}

fn dump(query: &Query) -> Result<()> {
    let config = load_config(query.config.as_deref())?;
    let source = query.source(&config);
    let records = read_timestamps(
        open_source(&source).with_context(|| format!("Failed to open {source}"))?,
        query.range()?,
    )
    .with_context(|| format!("Failed to read {source}"))?;

    let mut out = BufWriter::new(io::stdout().lock());
    if query.json {
        write_json(&mut out, &records)?;
    } else {
        write_timestamps_tsv(&mut out, &records, &Local)?;
    }
    out.flush().context("Failed to write output")
}

fn usage(
    query: &Query,
    period: std::time::Duration,
    volume_per_pulse: Option<u64>,
    unit: Option<String>,
) -> Result<()> {
    let config = load_config(query.config.as_deref())?;
    let source = query.source(&config);
    let rows = usage_report(
        open_source(&source).with_context(|| format!("Failed to open {source}"))?,
        query.range()?,
        period,
        volume_per_pulse.unwrap_or(config.volume_per_pulse),
    )
    .with_context(|| format!("Failed to read {source}"))?;

    let mut out = BufWriter::new(io::stdout().lock());
    if query.json {
        write_json(&mut out, &rows)?;
    } else {
        let unit = unit.unwrap_or_else(|| config.volume_unit.clone());
        write_usage_tsv(&mut out, &rows, &unit, &Local)?;
    }
    out.flush().context("Failed to write output")
}

fn check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Invalid configuration")?;
    print!("{}", config.to_toml()?);
    Ok(())
}
