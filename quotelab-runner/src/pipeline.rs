//! One-date run: universe → decode → materialize → manifest.
//!
//! Each run builds its own universe, decoder and buffer arena; nothing is
//! shared between dates. Output for a date is written only after every
//! source has been scanned and the decode-error budget has been checked, so
//! a failed run leaves no instrument files behind. A successful unscoped
//! run also removes files from earlier runs that its manifest does not list.

use chrono::NaiveDate;
use quotelab_core::data::{
    DateManifest, InstrumentDayStore, InstrumentUniverse, LimitUpTable, StoreError, UniverseError,
};
use quotelab_core::decode::Decoder;
use quotelab_core::domain::InstrumentCode;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, RunConfig};
use crate::materializer::Materializer;
use crate::multiplexer::{Multiplexer, ScanError};
use crate::source::{FeedSource, FileSource, SourceError};
use crate::summary::RunSummary;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("feed unavailable: {0}")]
    FeedUnavailable(SourceError),

    #[error("{failed} decode errors exceed the budget of {budget}")]
    ErrorBudgetExceeded { failed: u64, budget: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("universe error: {0}")]
    Universe(#[from] UniverseError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("scan setup failed: {0}")]
    Scan(String),
}

impl From<ScanError> for RunError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Unavailable(e) => RunError::FeedUnavailable(e),
            ScanError::Cancelled => RunError::Cancelled,
            ScanError::ThreadPool(e) => RunError::Scan(e),
        }
    }
}

/// Per-invocation overrides on top of a [`RunConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub date: Option<NaiveDate>,
    /// Previous trading date; looked up in the reference table when unset.
    pub previous_date: Option<NaiveDate>,
    /// Restrict the run to a single instrument.
    pub instrument: Option<String>,
    pub max_decode_errors: Option<u64>,
    pub output: Option<PathBuf>,
}

impl RunRequest {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Default::default()
        }
    }
}

/// Universe for `date`, plus the previous date it was built with.
pub fn resolve_universe(
    table: &LimitUpTable,
    date: NaiveDate,
    previous_date: Option<NaiveDate>,
    lookback_days: u32,
    instrument: Option<&str>,
) -> (InstrumentUniverse, Option<NaiveDate>) {
    let previous = previous_date.or_else(|| table.previous_listed_date(date, lookback_days));
    let universe = table.select(date, previous);
    let universe = match instrument {
        Some(code) => universe.restrict_to(code),
        None => universe,
    };
    (universe, previous)
}

/// Run one date over explicit sources.
///
/// `sources` are in declaration order; the order fixes how per-source
/// segments are concatenated in each file.
pub fn run_date(
    config: &RunConfig,
    table: &LimitUpTable,
    request: &RunRequest,
    date: NaiveDate,
    sources: &[Box<dyn FeedSource>],
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary, RunError> {
    let (universe, previous_date) = resolve_universe(
        table,
        date,
        request.previous_date,
        config.universe.lookback_days,
        request.instrument.as_deref(),
    );
    let max_decode_errors = request.max_decode_errors.or(config.run.max_decode_errors);
    let store = InstrumentDayStore::new(
        request
            .output
            .clone()
            .unwrap_or_else(|| config.output.root.clone()),
    );
    info!(
        %date,
        previous = ?previous_date,
        instruments = universe.len(),
        sources = sources.len(),
        "starting run"
    );
    if universe.is_empty() {
        warn!(%date, "universe is empty; no files will be written");
    }

    let materializer = Materializer::new(&universe, sources.len());
    let decoder = Decoder::new(date, &universe);
    let mut multiplexer = Multiplexer::new(decoder, &materializer)
        .concurrent(config.run.concurrent)
        .threads(config.run.threads);
    if let Some(flag) = cancel {
        multiplexer = multiplexer.with_cancel(flag);
    }

    let scanned = multiplexer.run(sources);
    let stats = match scanned {
        Ok(stats) => stats,
        Err(e) => {
            materializer.discard();
            return Err(e.into());
        }
    };

    let mut summary = RunSummary {
        date,
        previous_date,
        universe_size: universe.len(),
        instrument: request.instrument.as_deref().map(InstrumentCode::new),
        sources: stats,
        max_decode_errors,
        files_written: 0,
        rows_written: 0,
    };

    if let Err(exceeded) = summary.check_budget() {
        warn!(
            failed = exceeded.failed,
            budget = exceeded.budget,
            "decode error budget exceeded; discarding output"
        );
        materializer.discard();
        return Err(RunError::ErrorBudgetExceeded {
            failed: exceeded.failed,
            budget: exceeded.budget,
        });
    }
    if summary.failed() > 0 {
        warn!(failed = summary.failed(), "records dropped on decode errors");
    }
    if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
        materializer.discard();
        return Err(RunError::Cancelled);
    }

    let entries = materializer.flush(&store, date)?;
    summary.files_written = entries.len();
    summary.rows_written = entries.iter().map(|e| e.rows).sum();

    if request.instrument.is_none() {
        let keep: Vec<InstrumentCode> = entries.iter().map(|e| e.instrument_code.clone()).collect();
        let removed = store.remove_stale(date, &keep)?;
        if !removed.is_empty() {
            info!(%date, removed = removed.len(), "removed files no longer in the universe");
        }
    }
    write_manifest(&store, date, entries, &summary)?;
    info!(
        %date,
        files = summary.files_written,
        rows = summary.rows_written,
        failed = summary.failed(),
        "run complete"
    );
    Ok(summary)
}

/// Write the date manifest. A scoped run replaces only its own instrument's
/// entry in an existing manifest.
fn write_manifest(
    store: &InstrumentDayStore,
    date: NaiveDate,
    entries: Vec<quotelab_core::data::ManifestEntry>,
    summary: &RunSummary,
) -> Result<(), RunError> {
    let files = match (&summary.instrument, store.read_manifest(date)?) {
        (Some(code), Some(existing)) => existing
            .files
            .into_iter()
            .filter(|e| &e.instrument_code != code)
            .chain(entries)
            .collect(),
        _ => entries,
    };
    let mut manifest = DateManifest::new(date, files);
    manifest.summary = summary
        .to_json_value()
        .map_err(|e| StoreError::Manifest(e.to_string()))?;
    store.write_manifest(&manifest)?;
    Ok(())
}

/// File sources for `date` from the configured templates, in declaration order.
pub fn sources_for_date(config: &RunConfig, date: NaiveDate) -> Vec<Box<dyn FeedSource>> {
    config
        .sources
        .iter()
        .map(|spec| Box::new(FileSource::from_spec(spec, date)) as Box<dyn FeedSource>)
        .collect()
}

/// Run one date from configuration: load the table, resolve file sources, run.
pub fn run_configured_date(
    config: &RunConfig,
    request: &RunRequest,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary, RunError> {
    let date = request
        .date
        .ok_or_else(|| RunError::Config(ConfigError::Parse("no run date given".into())))?;
    let table = LimitUpTable::load(&config.universe.limit_up_table)?;
    let sources = sources_for_date(config, date);
    run_date(config, &table, request, date, &sources, cancel)
}
