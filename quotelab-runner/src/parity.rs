//! Parity verification between two output roots.
//!
//! Compares the instrument-day files of one date column by column: integer
//! and string fields exactly, prices within an absolute tolerance, event
//! times within one microsecond, null masks exactly. Findings are collected
//! across every instrument before the report is returned.

use chrono::NaiveDate;
use polars::prelude::*;
use quotelab_core::data::schema::{self, EventSchema};
use quotelab_core::data::{InstrumentDayStore, SchemaError, StoreError};
use quotelab_core::domain::{EventKind, InstrumentCode};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_TIME_TOLERANCE_MICROS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSide {
    Left,
    Right,
}

impl fmt::Display for DataSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataSide::Left => "left",
            DataSide::Right => "right",
        })
    }
}

/// One differing cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub instrument: InstrumentCode,
    pub column: String,
    pub row: usize,
    pub left: String,
    pub right: String,
}

/// A parity finding. None of these abort verification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("{instrument}: file missing on {side} side")]
    MissingFile {
        instrument: InstrumentCode,
        side: DataSide,
    },

    #[error("{instrument}: {side} file unreadable: {reason}")]
    Unreadable {
        instrument: InstrumentCode,
        side: DataSide,
        reason: String,
    },

    #[error("{instrument}: schema mismatch on {side} side: {error}")]
    SchemaMismatch {
        instrument: InstrumentCode,
        side: DataSide,
        error: SchemaError,
    },

    #[error("{instrument}: row count differs (left {left}, right {right})")]
    RowCount {
        instrument: InstrumentCode,
        left: usize,
        right: usize,
    },

    #[error("{instrument}: {kind} count differs (left {left}, right {right})")]
    KindCount {
        instrument: InstrumentCode,
        kind: EventKind,
        left: usize,
        right: usize,
    },

    #[error("{}: {} row {}: left={} right={}", .0.instrument, .0.column, .0.row, .0.left, .0.right)]
    Value(Mismatch),
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Only verify this instrument.
    pub instrument: Option<String>,
    /// Stable-sort both sides by event time before comparing.
    pub align_by_time: bool,
    pub float_tolerance: f64,
    pub time_tolerance_micros: i64,
    /// Cap on reported cell mismatches per column. Counting is unaffected.
    pub max_examples: Option<usize>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            instrument: None,
            align_by_time: false,
            float_tolerance: DEFAULT_FLOAT_TOLERANCE,
            time_tolerance_micros: DEFAULT_TIME_TOLERANCE_MICROS,
            max_examples: None,
        }
    }
}

/// Per-instrument comparison outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstrumentParity {
    pub instrument: InstrumentCode,
    pub left_rows: usize,
    pub right_rows: usize,
    pub left_trades: usize,
    pub right_trades: usize,
    pub left_depths: usize,
    pub right_depths: usize,
    /// Total differing cells, including unreported ones.
    pub value_mismatches: u64,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct ParityReport {
    pub date: NaiveDate,
    pub instruments: Vec<InstrumentParity>,
    pub findings: Vec<VerifyError>,
}

impl ParityReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn failed_instruments(&self) -> usize {
        self.instruments.iter().filter(|i| !i.passed).count()
    }
}

impl fmt::Display for ParityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parity check for {}", self.date)?;
        for i in &self.instruments {
            writeln!(
                f,
                "  {:<8} rows {:>8}/{:<8} trades {:>8}/{:<8} depths {:>8}/{:<8} {}",
                i.instrument.as_str(),
                i.left_rows,
                i.right_rows,
                i.left_trades,
                i.right_trades,
                i.left_depths,
                i.right_depths,
                if i.passed { "ok" } else { "FAIL" }
            )?;
        }
        for finding in &self.findings {
            writeln!(f, "  - {finding}")?;
        }
        if self.passed() {
            write!(f, "PASS: {} instruments match", self.instruments.len())
        } else {
            write!(
                f,
                "FAIL: {} of {} instruments differ, {} findings",
                self.failed_instruments(),
                self.instruments.len(),
                self.findings.len()
            )
        }
    }
}

/// Verify every instrument present on either side for `date`.
pub fn verify_date(
    left: &InstrumentDayStore,
    right: &InstrumentDayStore,
    date: NaiveDate,
    options: &VerifyOptions,
) -> Result<ParityReport, StoreError> {
    let codes: BTreeSet<InstrumentCode> = match &options.instrument {
        Some(code) => BTreeSet::from([InstrumentCode::new(code)]),
        None => left
            .list_instruments(date)?
            .into_iter()
            .chain(right.list_instruments(date)?)
            .collect(),
    };
    info!(%date, instruments = codes.len(), "verifying parity");

    let mut report = ParityReport {
        date,
        instruments: Vec::with_capacity(codes.len()),
        findings: Vec::new(),
    };
    for code in codes {
        let (parity, findings) = verify_instrument(left, right, date, &code, options);
        debug!(instrument = %code, passed = parity.passed, findings = findings.len(), "verified");
        report.instruments.push(parity);
        report.findings.extend(findings);
    }
    info!(
        %date,
        passed = report.passed(),
        findings = report.findings.len(),
        "parity check finished"
    );
    Ok(report)
}

fn load_side(
    store: &InstrumentDayStore,
    date: NaiveDate,
    code: &InstrumentCode,
    side: DataSide,
) -> Result<DataFrame, VerifyError> {
    if !store.exists(date, code.as_str()) {
        return Err(VerifyError::MissingFile {
            instrument: code.clone(),
            side,
        });
    }
    store
        .load(date, code.as_str())
        .map_err(|e| VerifyError::Unreadable {
            instrument: code.clone(),
            side,
            reason: e.to_string(),
        })
}

/// Compare one instrument's files.
pub fn verify_instrument(
    left: &InstrumentDayStore,
    right: &InstrumentDayStore,
    date: NaiveDate,
    code: &InstrumentCode,
    options: &VerifyOptions,
) -> (InstrumentParity, Vec<VerifyError>) {
    let mut parity = InstrumentParity {
        instrument: code.clone(),
        ..Default::default()
    };
    let mut findings = Vec::new();

    let left_df = load_side(left, date, code, DataSide::Left).map_err(|e| findings.push(e));
    let right_df = load_side(right, date, code, DataSide::Right).map_err(|e| findings.push(e));
    let (Ok(left_df), Ok(right_df)) = (left_df, right_df) else {
        return (parity, findings);
    };
    compare_frames(&left_df, &right_df, code, options, &mut parity, &mut findings);
    parity.passed = findings.is_empty();
    (parity, findings)
}

/// Compare two loaded frames for `code`, appending findings.
pub fn compare_frames(
    left: &DataFrame,
    right: &DataFrame,
    code: &InstrumentCode,
    options: &VerifyOptions,
    parity: &mut InstrumentParity,
    findings: &mut Vec<VerifyError>,
) {
    parity.left_rows = left.height();
    parity.right_rows = right.height();
    let (lt, ld) = kind_counts(left);
    let (rt, rd) = kind_counts(right);
    (parity.left_trades, parity.left_depths) = (lt, ld);
    (parity.right_trades, parity.right_depths) = (rt, rd);

    let mut unusable: BTreeSet<String> = BTreeSet::new();
    for (side, df) in [(DataSide::Left, left), (DataSide::Right, right)] {
        for error in EventSchema::diff(df) {
            unusable.insert(error.column().to_string());
            findings.push(VerifyError::SchemaMismatch {
                instrument: code.clone(),
                side,
                error,
            });
        }
    }

    for (kind, l, r) in [(EventKind::Trade, lt, rt), (EventKind::Depth, ld, rd)] {
        if l != r {
            findings.push(VerifyError::KindCount {
                instrument: code.clone(),
                kind,
                left: l,
                right: r,
            });
        }
    }
    if left.height() != right.height() {
        findings.push(VerifyError::RowCount {
            instrument: code.clone(),
            left: left.height(),
            right: right.height(),
        });
        return;
    }

    let (left, right) = if options.align_by_time && !unusable.contains(schema::EVENT_TIME) {
        match (sort_by_time(left), sort_by_time(right)) {
            (Ok(l), Ok(r)) => (l, r),
            _ => (left.clone(), right.clone()),
        }
    } else {
        (left.clone(), right.clone())
    };

    for field in EventSchema::schema().iter_fields() {
        let name = field.name().as_str();
        if unusable.contains(name) {
            continue;
        }
        let (Ok(l), Ok(r)) = (left.column(name), right.column(name)) else {
            continue;
        };
        let mut column = ColumnDiff {
            instrument: code,
            column: name,
            max_examples: options.max_examples,
            count: 0,
            findings: &mut *findings,
        };
        let compared = match field.dtype() {
            DataType::String => column.strings(l, r),
            DataType::Float64 => column.floats(l, r, options.float_tolerance),
            DataType::Datetime(..) => column.times(l, r, options.time_tolerance_micros),
            _ => column.integers(l, r),
        };
        if let Err(e) = compared {
            column.findings.push(VerifyError::Unreadable {
                instrument: code.clone(),
                side: DataSide::Left,
                reason: format!("column {name}: {e}"),
            });
        }
        parity.value_mismatches += column.count;
    }
}

fn sort_by_time(df: &DataFrame) -> PolarsResult<DataFrame> {
    df.sort(
        [schema::EVENT_TIME],
        SortMultipleOptions::default().with_maintain_order(true),
    )
}

/// (trades, depths) by the `kind` column. Unreadable kinds count as neither.
fn kind_counts(df: &DataFrame) -> (usize, usize) {
    let Some(kinds) = df.column(schema::KIND).ok().and_then(|c| c.str().ok()) else {
        return (0, 0);
    };
    kinds.into_iter().fold((0, 0), |(t, d), kind| match kind {
        Some("Trade") => (t + 1, d),
        Some("Depth") => (t, d + 1),
        _ => (t, d),
    })
}

fn show<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

struct ColumnDiff<'a> {
    instrument: &'a InstrumentCode,
    column: &'a str,
    max_examples: Option<usize>,
    count: u64,
    findings: &'a mut Vec<VerifyError>,
}

impl ColumnDiff<'_> {
    /// Walk both columns row by row; `same` sees only non-null pairs.
    fn walk<T, L, R>(&mut self, left: L, right: R, same: impl Fn(&T, &T) -> bool)
    where
        T: fmt::Display,
        L: IntoIterator<Item = Option<T>>,
        R: IntoIterator<Item = Option<T>>,
    {
        for (row, (l, r)) in left.into_iter().zip(right).enumerate() {
            let equal = match (&l, &r) {
                (None, None) => true,
                (Some(a), Some(b)) => same(a, b),
                _ => false,
            };
            if equal {
                continue;
            }
            self.count += 1;
            if self.max_examples.is_some_and(|max| self.count > max as u64) {
                continue;
            }
            self.findings.push(VerifyError::Value(Mismatch {
                instrument: self.instrument.clone(),
                column: self.column.to_string(),
                row,
                left: show(l),
                right: show(r),
            }));
        }
    }

    fn strings(&mut self, left: &Column, right: &Column) -> PolarsResult<()> {
        let (l, r) = (left.str()?, right.str()?);
        self.walk(l, r, |a, b| a == b);
        Ok(())
    }

    fn floats(&mut self, left: &Column, right: &Column, tolerance: f64) -> PolarsResult<()> {
        let (l, r) = (left.f64()?, right.f64()?);
        self.walk(l, r, |a, b| (a - b).abs() <= tolerance);
        Ok(())
    }

    fn times(&mut self, left: &Column, right: &Column, tolerance: i64) -> PolarsResult<()> {
        let l = left.cast(&DataType::Int64)?;
        let r = right.cast(&DataType::Int64)?;
        self.walk(l.i64()?, r.i64()?, |a, b| (a - b).abs() <= tolerance);
        Ok(())
    }

    fn integers(&mut self, left: &Column, right: &Column) -> PolarsResult<()> {
        let l = left.cast(&DataType::UInt64)?;
        let r = right.cast(&DataType::UInt64)?;
        self.walk(l.u64()?, r.u64()?, |a, b| a == b);
        Ok(())
    }
}
