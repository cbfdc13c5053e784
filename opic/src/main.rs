mod config;

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
    process,
};

use clap::Parser;
use config::{AppConfig, Cli, Command, ConfigError};
use opic_ledger::{CashLedger, LedgerController, LedgerError};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    if let Err(err) = run() {
        eprintln!("opic failed: {err}");
        process::exit(1);
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to read import file {path}: {source}")]
    Import { path: String, source: io::Error },
    #[error("failed to format timestamp: {0}")]
    Format(#[from] time::error::Format),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let config = AppConfig::from_cli(&cli)?;

    let controller = LedgerController::bootstrap(config.ledger.clone())?;
    let ledger = controller.ledger();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match &cli.command {
        Command::Import { file, .. } => {
            info!("# importing from {}", file.display());
            let identifiers = read_import_file(file)?;
            info!(
                "# initialising to {} with {} urls",
                config.ledger.initial_cash,
                identifiers.len()
            );
            ledger.initialise(config.ledger.initial_cash, &identifiers)?;
        }
        Command::Read { ids } => write_entries(&mut out, &ledger, ids)?,
        Command::Estimate { ids } => write_estimates(&mut out, &ledger, ids, &config)?,
        Command::Distribute { source, outputs } => {
            let moved = ledger.distribute(source, outputs.as_slice(), config.observed);
            writeln!(out, "{source}\t{moved}")?;
        }
        Command::Stats => write_stats(&mut out, &ledger)?,
        Command::Balance { target } => {
            ledger.ensure_balance(*target)?;
            write_stats(&mut out, &ledger)?;
        }
    }
    out.flush()?;

    if controller.dirty() {
        info!("# saving");
        controller.save()?;
    }
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_import_file(path: &Path) -> Result<Vec<String>, AppError> {
    let import_err = |source| AppError::Import {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(import_err)?;
    parse_identifiers(BufReader::new(file)).map_err(import_err)
}

/// First tab-delimited column of every non-blank line.
fn parse_identifiers<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut identifiers = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches([' ', '\r', '\n']);
        let identifier = line.split('\t').next().unwrap_or_default();
        if !identifier.is_empty() {
            identifiers.push(identifier.to_string());
        }
    }
    Ok(identifiers)
}

fn write_entries<W: Write>(
    out: &mut W,
    ledger: &CashLedger,
    ids: &[String],
) -> Result<(), AppError> {
    for (id, entry) in ids.iter().zip(ledger.get_many(ids)) {
        writeln!(
            out,
            "{id}\t{}\t{}\t{}",
            entry.history,
            entry.current,
            entry.cleared.format(&Rfc3339)?
        )?;
    }
    Ok(())
}

fn write_estimates<W: Write>(
    out: &mut W,
    ledger: &CashLedger,
    ids: &[String],
    config: &AppConfig,
) -> Result<(), AppError> {
    let estimates = ledger.estimate_many(ids, config.interval(), config.observed)?;
    for (id, estimate) in ids.iter().zip(estimates) {
        writeln!(out, "{id}\t{estimate}")?;
    }
    Ok(())
}

fn write_stats<W: Write>(out: &mut W, ledger: &CashLedger) -> Result<(), AppError> {
    let stats = ledger.stats();
    writeln!(out, "entries\t{}", stats.current_entries)?;
    writeln!(out, "cleared\t{}", stats.cleared_entries)?;
    writeln!(out, "history_sum\t{}", stats.sums.history)?;
    writeln!(out, "current_sum\t{}", stats.sums.current)?;
    writeln!(out, "total\t{}", stats.sums.total())?;
    writeln!(out, "virtual_history\t{}", stats.virtual_reserve.history)?;
    writeln!(out, "virtual_current\t{}", stats.virtual_reserve.current)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use time::macros::datetime;

    #[test]
    fn import_takes_first_column_and_skips_blanks() {
        let input = "http://a.example/\t12\nhttp://b.example/ \r\n\n\t\nhttp://c.example/";
        let ids = parse_identifiers(Cursor::new(input)).unwrap();
        assert_eq!(
            ids,
            vec!["http://a.example/", "http://b.example/", "http://c.example/"]
        );
    }

    #[test]
    fn read_output_is_tab_delimited() {
        let ledger = CashLedger::new();
        ledger.initialise(2.0, &["a", "b"]).unwrap();
        // skim = 0.5 / (3 entries + 1)
        ledger.distribute("a", &["b"], datetime!(2024-03-01 12:00 UTC));

        let mut out = Vec::new();
        write_entries(&mut out, &ledger, &["a".to_string(), "zz".to_string()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "a\t1\t0.125\t2024-03-01T12:00:00Z");
        assert_eq!(lines[1], "zz\t0\t0\t1970-01-01T00:00:00Z");
    }

    #[test]
    fn estimate_output_uses_observed_time() {
        let ledger = CashLedger::new();
        ledger.initialise(1.0, &["a"]).unwrap();
        let cli = Cli::try_parse_from([
            "opic",
            "--interval-secs",
            "60",
            "--time",
            "1970-01-01T00:02:00Z",
            "estimate",
            "a",
        ])
        .unwrap();
        let config = AppConfig::from_cli(&cli).unwrap();

        let mut out = Vec::new();
        write_estimates(&mut out, &ledger, &["a".to_string()], &config).unwrap();
        // Never cleared: 120s past the epoch with a 60s interval halves current cash.
        assert_eq!(String::from_utf8(out).unwrap(), "a\t0.5\n");
    }

    #[test]
    fn stats_report_totals() {
        let ledger = CashLedger::new();
        ledger.initialise(4.0, &["a", "b"]).unwrap();
        let mut out = Vec::new();
        write_stats(&mut out, &ledger).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("entries\t2\n"));
        assert!(text.contains("total\t4\n"));
        assert!(text.contains("virtual_current\t0\n"));
    }
}
