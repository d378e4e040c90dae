//! Multi-date backfill over whatever source files are on disk.
//!
//! Dates run strictly one after another, each as an independent
//! [`run_date`](crate::pipeline::run_date). A failed date is recorded and
//! the backfill moves on.

use chrono::NaiveDate;
use quotelab_core::data::{InstrumentDayStore, LimitUpTable};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::pipeline::{resolve_universe, run_date, sources_for_date, RunError, RunRequest};
use crate::summary::RunSummary;

#[derive(Debug, Clone, Default)]
pub struct BackfillOptions {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Skip dates that already have a manifest.
    pub skip_complete: bool,
    pub max_decode_errors: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DateOutcome {
    Completed(RunSummary),
    Skipped { date: NaiveDate },
    Failed { date: NaiveDate, error: String },
}

impl DateOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            DateOutcome::Completed(s) => s.date,
            DateOutcome::Skipped { date } | DateOutcome::Failed { date, .. } => *date,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BackfillReport {
    pub outcomes: Vec<DateOutcome>,
    /// Set when the backfill stopped before its last date.
    pub cancelled: bool,
}

impl BackfillReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, DateOutcome::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DateOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DateOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.cancelled
    }

    fn count(&self, pred: impl Fn(&DateOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Dates with at least one source file on disk within `[from, to]`.
///
/// Each source template is matched against its directory listing; the
/// result is the union over sources. A date where only some sources are
/// present is still returned and will fail as unavailable when run.
pub fn discover_source_dates(
    config: &RunConfig,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    for spec in &config.sources {
        let dir = spec.directory();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(source = %spec.name, dir = %dir.display(), error = %e, "cannot list source directory");
                continue;
            }
        };
        dates.extend(
            entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().to_str().and_then(|n| spec.match_file_name(n))),
        );
    }
    dates.retain(|d| from.map_or(true, |f| *d >= f) && to.map_or(true, |t| *d <= t));
    dates
}

/// Discovered dates whose universe is non-empty.
pub fn plan_dates(
    config: &RunConfig,
    table: &LimitUpTable,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    discover_source_dates(config, from, to)
        .into_iter()
        .filter(|&date| {
            let (universe, _) =
                resolve_universe(table, date, None, config.universe.lookback_days, None);
            if universe.is_empty() {
                info!(%date, "no instruments selected; skipping date");
            }
            !universe.is_empty()
        })
        .collect()
}

pub fn run_backfill(
    config: &RunConfig,
    table: &LimitUpTable,
    options: &BackfillOptions,
    cancel: Option<&AtomicBool>,
) -> BackfillReport {
    let dates = plan_dates(config, table, options.from, options.to);
    let store = InstrumentDayStore::new(&config.output.root);
    info!(dates = dates.len(), "starting backfill");

    let mut report = BackfillReport::default();
    for date in dates {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            report.cancelled = true;
            break;
        }
        if options.skip_complete && store.has_manifest(date) {
            info!(%date, "manifest present; skipping");
            report.outcomes.push(DateOutcome::Skipped { date });
            continue;
        }

        let request = RunRequest {
            max_decode_errors: options.max_decode_errors,
            ..RunRequest::for_date(date)
        };
        let sources = sources_for_date(config, date);
        match run_date(config, table, &request, date, &sources, cancel) {
            Ok(summary) => report.outcomes.push(DateOutcome::Completed(summary)),
            Err(RunError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            Err(e) => {
                warn!(%date, error = %e, "date failed");
                report.outcomes.push(DateOutcome::Failed {
                    date,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        completed = report.completed(),
        skipped = report.skipped(),
        failed = report.failed(),
        cancelled = report.cancelled,
        "backfill finished"
    );
    report
}
