use std::path::PathBuf;

use clap::{Parser, Subcommand};
use opic_ledger::{
    LedgerConfig,
    config::{DEFAULT_INITIAL_CASH, DEFAULT_STATE_FILE},
};
use thiserror::Error;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};

const DEFAULT_INTERVAL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(name = "opic", version, about = "Maintain OPIC importance cash for crawled URLs")]
pub struct Cli {
    /// File to keep state in.
    #[arg(long, env = "OPIC_FILENAME", default_value = DEFAULT_STATE_FILE)]
    pub filename: PathBuf,

    /// Revisit interval used when estimating, in seconds.
    #[arg(
        long,
        env = "OPIC_INTERVAL_SECS",
        default_value_t = DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub interval_secs: i64,

    /// RFC-3339 time to use for estimate and distribute instead of now.
    #[arg(long, env = "OPIC_TIME")]
    pub time: Option<String>,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, env = "OPIC_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialise the ledger from a tab-delimited file whose first column is a URL.
    Import {
        file: PathBuf,
        /// Global cash split across the imported URLs.
        #[arg(long, env = "OPIC_INITIALISE", default_value_t = DEFAULT_INITIAL_CASH)]
        initialise: f64,
    },
    /// Print raw history, current cash and clearing time.
    Read { ids: Vec<String> },
    /// Print the estimated cash of each identifier.
    Estimate { ids: Vec<String> },
    /// Distribute cash from SOURCE to the remaining arguments.
    Distribute { source: String, outputs: Vec<String> },
    /// Print totals and the virtual reserve.
    Stats,
    /// Top the virtual reserve up so total cash reaches TARGET.
    Balance {
        #[arg(long)]
        target: f64,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --time {value:?}: {source}")]
    InvalidTime {
        value: String,
        source: time::error::Parse,
    },
}

/// Settings resolved from the command line and environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub observed: OffsetDateTime,
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let observed = match cli.time.as_deref() {
            Some(value) => OffsetDateTime::parse(value, &Rfc3339).map_err(|source| {
                ConfigError::InvalidTime {
                    value: value.to_string(),
                    source,
                }
            })?,
            None => OffsetDateTime::now_utc(),
        };

        let mut ledger = LedgerConfig::new(cli.filename.clone());
        ledger.interval = Duration::seconds(cli.interval_secs);
        ledger.ignore_missing = true;
        if let Command::Import { initialise, .. } = cli.command {
            ledger.initial_cash = initialise;
        }

        Ok(Self { ledger, observed })
    }

    pub fn interval(&self) -> Duration {
        self.ledger.interval
    }
}
