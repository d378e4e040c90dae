//! QuoteLab CLI: decode, backfill, verify and inspect commands.
//!
//! Commands:
//! - `decode`: decode one date's feeds into per-instrument Parquet files
//! - `backfill`: decode every date with source files on disk
//! - `verify`: parity check between two output roots
//! - `universe`: print the instruments selected for a date
//! - `status`: list materialized files for a date from its manifest

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quotelab_core::data::universe::parse_table_date;
use quotelab_core::data::{InstrumentDayStore, LimitUpTable};
use quotelab_runner::{
    resolve_universe, run_backfill, run_configured_date, verify_date, BackfillOptions,
    DateOutcome, RunConfig, RunRequest, RunSummary, VerifyOptions,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quotelab",
    about = "QuoteLab CLI: market-data feed decoder and instrument-day store"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one date's feeds into the instrument-day store.
    Decode {
        /// Trading date (YYYYMMDD or YYYY-MM-DD).
        #[arg(long)]
        date: String,

        /// Path to a TOML run config. Defaults to the built-in ./data layout.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only materialize this instrument.
        #[arg(long)]
        instrument: Option<String>,

        /// Previous trading date. Looked up in the limit-up table when omitted.
        #[arg(long)]
        previous_date: Option<String>,

        /// Fail the run when more records than this fail to decode.
        #[arg(long)]
        max_decode_errors: Option<u64>,

        /// Output root (overrides the config).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the run summary as JSON to this path.
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Write per-source counters as CSV to this path.
        #[arg(long)]
        summary_csv: Option<PathBuf>,
    },
    /// Decode every date for which source files exist.
    Backfill {
        /// Path to a TOML run config. Defaults to the built-in ./data layout.
        #[arg(long)]
        config: Option<PathBuf>,

        /// First date to consider (inclusive).
        #[arg(long)]
        from: Option<String>,

        /// Last date to consider (inclusive).
        #[arg(long)]
        to: Option<String>,

        /// Skip dates that already have a manifest.
        #[arg(long, default_value_t = false)]
        skip_complete: bool,

        /// Per-date decode error budget.
        #[arg(long)]
        max_decode_errors: Option<u64>,
    },
    /// Compare two output roots for one date.
    Verify {
        /// Trading date (YYYYMMDD or YYYY-MM-DD).
        #[arg(long)]
        date: String,

        /// Reference output root.
        #[arg(long)]
        left: PathBuf,

        /// Candidate output root.
        #[arg(long)]
        right: PathBuf,

        /// Only verify this instrument.
        #[arg(long)]
        instrument: Option<String>,

        /// Stable-sort both sides by event time before comparing.
        #[arg(long, default_value_t = false)]
        align_by_time: bool,

        /// Report at most this many cell mismatches per column.
        #[arg(long)]
        max_examples: Option<usize>,
    },
    /// Print the universe selected for a date.
    Universe {
        /// Trading date (YYYYMMDD or YYYY-MM-DD).
        #[arg(long)]
        date: String,

        /// Path to a TOML run config. Defaults to the built-in ./data layout.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Previous trading date. Looked up in the limit-up table when omitted.
        #[arg(long)]
        previous_date: Option<String>,
    },
    /// List materialized files for a date.
    Status {
        /// Trading date (YYYYMMDD or YYYY-MM-DD).
        #[arg(long)]
        date: String,

        /// Output root. Defaults to ./output.
        #[arg(long, default_value = "output")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Decode {
            date,
            config,
            instrument,
            previous_date,
            max_decode_errors,
            output,
            summary_json,
            summary_csv,
        } => {
            let request = RunRequest {
                date: Some(parse_date(&date)?),
                previous_date: previous_date.as_deref().map(parse_date).transpose()?,
                instrument,
                max_decode_errors,
                output,
            };
            run_decode(
                config.as_deref(),
                &request,
                summary_json.as_deref(),
                summary_csv.as_deref(),
            )
        }
        Commands::Backfill {
            config,
            from,
            to,
            skip_complete,
            max_decode_errors,
        } => {
            let options = BackfillOptions {
                from: from.as_deref().map(parse_date).transpose()?,
                to: to.as_deref().map(parse_date).transpose()?,
                skip_complete,
                max_decode_errors,
            };
            run_backfill_cmd(config.as_deref(), &options)
        }
        Commands::Verify {
            date,
            left,
            right,
            instrument,
            align_by_time,
            max_examples,
        } => {
            let options = VerifyOptions {
                instrument,
                align_by_time,
                max_examples,
                ..Default::default()
            };
            run_verify(parse_date(&date)?, &left, &right, &options)
        }
        Commands::Universe {
            date,
            config,
            previous_date,
        } => run_universe(
            config.as_deref(),
            parse_date(&date)?,
            previous_date.as_deref().map(parse_date).transpose()?,
        ),
        Commands::Status { date, output } => run_status(parse_date(&date)?, &output),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    parse_table_date(value)
        .with_context(|| format!("invalid date '{value}' (expected YYYYMMDD or YYYY-MM-DD)"))
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RunConfig::default_layout()),
    }
}

fn load_table(config: &RunConfig) -> Result<LimitUpTable> {
    let path = &config.universe.limit_up_table;
    LimitUpTable::load(path)
        .with_context(|| format!("failed to load limit-up table {}", path.display()))
}

fn run_decode(
    config_path: Option<&Path>,
    request: &RunRequest,
    summary_json: Option<&Path>,
    summary_csv: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let summary = run_configured_date(&config, request, None).context("decode run failed")?;

    println!("{summary}");
    write_summary_exports(&summary, summary_json, summary_csv)?;
    if summary.failed() > 0 {
        eprintln!(
            "warning: {} records failed to decode and were dropped",
            summary.failed()
        );
    }
    Ok(())
}

fn write_summary_exports(
    summary: &RunSummary,
    json: Option<&Path>,
    csv: Option<&Path>,
) -> Result<()> {
    if let Some(path) = json {
        std::fs::write(path, summary.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Summary written to: {}", path.display());
    }
    if let Some(path) = csv {
        std::fs::write(path, summary.export_sources_csv()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Source counters written to: {}", path.display());
    }
    Ok(())
}

fn run_backfill_cmd(config_path: Option<&Path>, options: &BackfillOptions) -> Result<()> {
    let config = load_config(config_path)?;
    let table = load_table(&config)?;
    let report = run_backfill(&config, &table, options, None);

    for outcome in &report.outcomes {
        match outcome {
            DateOutcome::Completed(s) => println!(
                "{}  ok       {:>5} files {:>10} rows {:>6} failed",
                s.date,
                s.files_written,
                s.rows_written,
                s.failed()
            ),
            DateOutcome::Skipped { date } => println!("{date}  skipped  (manifest present)"),
            DateOutcome::Failed { date, error } => println!("{date}  FAILED   {error}"),
        }
    }
    println!(
        "\n{} completed, {} skipped, {} failed",
        report.completed(),
        report.skipped(),
        report.failed()
    );

    if !report.is_success() {
        bail!("backfill finished with {} failed dates", report.failed());
    }
    Ok(())
}

fn run_verify(date: NaiveDate, left: &Path, right: &Path, options: &VerifyOptions) -> Result<()> {
    for root in [left, right] {
        if !root.is_dir() {
            bail!("output root does not exist: {}", root.display());
        }
    }
    let report = verify_date(
        &InstrumentDayStore::new(left),
        &InstrumentDayStore::new(right),
        date,
        options,
    )?;
    println!("{report}");

    if !report.passed() {
        bail!("parity check failed for {date}");
    }
    Ok(())
}

fn run_universe(
    config_path: Option<&Path>,
    date: NaiveDate,
    previous_date: Option<NaiveDate>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let table = load_table(&config)?;
    let (universe, previous) = resolve_universe(
        &table,
        date,
        previous_date,
        config.universe.lookback_days,
        None,
    );

    match previous {
        Some(prev) => println!("Universe for {date} (previous date {prev}):"),
        None => println!("Universe for {date} (no previous date found):"),
    }
    for code in universe.sorted_codes() {
        println!("  {code}");
    }
    println!("{} instruments", universe.len());
    Ok(())
}

fn run_status(date: NaiveDate, output: &Path) -> Result<()> {
    let store = InstrumentDayStore::new(output);
    let Some(manifest) = store.read_manifest(date)? else {
        let files = store.list_instruments(date)?;
        if files.is_empty() {
            println!("No output for {date} under {}", output.display());
        } else {
            println!("{} files for {date} but no manifest (incomplete run?)", files.len());
        }
        return Ok(());
    };

    println!("Output for {date} in {}:", store.date_dir(date).display());
    println!(
        "  {:<10} {:>10} {:>10} {:>10}  blake3",
        "code", "rows", "trades", "depths"
    );
    for entry in &manifest.files {
        let marker = if store.exists(date, entry.instrument_code.as_str()) {
            ""
        } else {
            "  (missing)"
        };
        println!(
            "  {:<10} {:>10} {:>10} {:>10}  {}{marker}",
            entry.instrument_code.as_str(),
            entry.rows,
            entry.trades,
            entry.depths,
            &entry.blake3[..entry.blake3.len().min(16)],
        );
    }
    println!(
        "{} files, {} rows",
        manifest.files.len(),
        manifest.total_rows()
    );
    Ok(())
}
