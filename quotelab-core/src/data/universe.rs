//! Limit-up universe: which instruments get decoded on a given date.
//!
//! The reference table lists, per trading date, the instruments that hit
//! their daily price limit. The universe for date D is the union of D's
//! limit-hitters and the previous trading date's. The previous date is an
//! input: no trading calendar lives here.
//!
//! Tables load from CSV (`date,instrument_code,close_price,limit_up_price`)
//! or Parquet with the same columns (`stock_id` is accepted for the code).

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::domain::InstrumentCode;

/// One row of the limit-up reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitUpEntry {
    pub date: NaiveDate,
    pub instrument_code: InstrumentCode,
    pub close_price: f64,
    pub limit_up_price: f64,
}

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("failed to read reference table {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("reference table is missing column '{0}'")]
    MissingColumn(String),

    #[error("row {row}: unparseable date '{value}'")]
    InvalidDate { row: usize, value: String },

    #[error("row {row}: {column} is null")]
    NullValue { row: usize, column: String },

    #[error("unsupported reference table format: {0}")]
    UnsupportedFormat(String),
}

/// CSV row before date parsing and code normalization.
#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    #[serde(alias = "stock_id")]
    instrument_code: String,
    close_price: f64,
    limit_up_price: f64,
}

/// Accepts `YYYYMMDD` and `YYYY-MM-DD`.
pub fn parse_table_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// The immutable limit-up reference table.
#[derive(Debug, Clone, Default)]
pub struct LimitUpTable {
    rows: Vec<LimitUpEntry>,
}

impl LimitUpTable {
    pub fn from_rows(rows: Vec<LimitUpEntry>) -> Self {
        Self { rows }
    }

    /// Load by file extension (`.csv` or `.parquet`).
    pub fn load(path: &Path) -> Result<Self, UniverseError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Self::from_csv_path(path),
            Some("parquet") => Self::from_parquet_path(path),
            _ => Err(UniverseError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, UniverseError> {
        let file = fs::File::open(path).map_err(|e| UniverseError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, UniverseError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut rows = Vec::new();
        for (i, record) in rdr.deserialize::<CsvRow>().enumerate() {
            let raw = record?;
            let date = parse_table_date(&raw.date).ok_or_else(|| UniverseError::InvalidDate {
                row: i,
                value: raw.date.clone(),
            })?;
            rows.push(LimitUpEntry {
                date,
                instrument_code: InstrumentCode::new(&raw.instrument_code),
                close_price: raw.close_price,
                limit_up_price: raw.limit_up_price,
            });
        }
        Ok(Self { rows })
    }

    pub fn from_parquet_path(path: &Path) -> Result<Self, UniverseError> {
        let file = fs::File::open(path).map_err(|e| UniverseError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| UniverseError::Parquet(format!("read: {e}")))?;
        Self::from_dataframe(&df)
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self, UniverseError> {
        let pe = |e: PolarsError| UniverseError::Parquet(e.to_string());

        let code_col = df
            .column("instrument_code")
            .or_else(|_| df.column("stock_id"))
            .map_err(|_| UniverseError::MissingColumn("instrument_code".into()))?
            .cast(&DataType::String)
            .map_err(pe)?;
        let close_col = required(df, "close_price")?.cast(&DataType::Float64).map_err(pe)?;
        let limit_col = required(df, "limit_up_price")?
            .cast(&DataType::Float64)
            .map_err(pe)?;
        let dates = table_dates(required(df, "date")?)?;

        let codes = code_col.str().map_err(pe)?;
        let closes = close_col.f64().map_err(pe)?;
        let limits = limit_col.f64().map_err(pe)?;

        let mut rows = Vec::with_capacity(df.height());
        for (i, date) in dates.into_iter().enumerate() {
            let code = codes.get(i).ok_or_else(|| UniverseError::NullValue {
                row: i,
                column: "instrument_code".into(),
            })?;
            rows.push(LimitUpEntry {
                date,
                instrument_code: InstrumentCode::new(code),
                close_price: closes.get(i).unwrap_or(f64::NAN),
                limit_up_price: limits.get(i).unwrap_or(f64::NAN),
            });
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[LimitUpEntry] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct dates present in the table, ascending.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    /// Most recent table date strictly before `date`, at most `lookback_days` back.
    ///
    /// Stand-in for a trading calendar when the caller has none.
    pub fn previous_listed_date(&self, date: NaiveDate, lookback_days: u32) -> Option<NaiveDate> {
        let dates = self.dates();
        (1..=i64::from(lookback_days))
            .map(|back| date - Duration::days(back))
            .find(|d| dates.contains(d))
    }

    /// Instruments that hit the limit on `date` or on `previous_date`.
    pub fn select(&self, date: NaiveDate, previous_date: Option<NaiveDate>) -> InstrumentUniverse {
        let codes = self
            .rows
            .iter()
            .filter(|r| r.date == date || Some(r.date) == previous_date)
            .map(|r| r.instrument_code.clone())
            .filter(|c| !c.is_empty())
            .collect::<HashSet<_>>();
        tracing::debug!(%date, ?previous_date, instruments = codes.len(), "selected universe");
        InstrumentUniverse { date, codes }
    }
}

fn required<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, UniverseError> {
    df.column(name)
        .map_err(|_| UniverseError::MissingColumn(name.to_string()))
}

fn table_dates(col: &Column) -> Result<Vec<NaiveDate>, UniverseError> {
    let pe = |e: PolarsError| UniverseError::Parquet(e.to_string());

    if col.dtype() == &DataType::String {
        let ca = col.str().map_err(pe)?;
        return (0..ca.len())
            .map(|i| {
                let raw = ca.get(i).ok_or_else(|| UniverseError::NullValue {
                    row: i,
                    column: "date".into(),
                })?;
                parse_table_date(raw).ok_or_else(|| UniverseError::InvalidDate {
                    row: i,
                    value: raw.to_string(),
                })
            })
            .collect();
    }

    let as_date = col.cast(&DataType::Date).map_err(pe)?;
    let ca = as_date.date().map_err(pe)?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (0..ca.len())
        .map(|i| {
            ca.get(i)
                .map(|days| epoch + Duration::days(i64::from(days)))
                .ok_or_else(|| UniverseError::NullValue {
                    row: i,
                    column: "date".into(),
                })
        })
        .collect()
}

/// The set of instruments decoded on one date. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentUniverse {
    date: NaiveDate,
    codes: HashSet<InstrumentCode>,
}

impl InstrumentUniverse {
    pub fn new(date: NaiveDate, codes: impl IntoIterator<Item = InstrumentCode>) -> Self {
        Self {
            date,
            codes: codes.into_iter().collect(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Membership check on an already-normalized code.
    #[inline]
    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &InstrumentCode> {
        self.codes.iter()
    }

    /// Codes in ascending order, for stable output.
    pub fn sorted_codes(&self) -> Vec<&InstrumentCode> {
        let mut codes: Vec<_> = self.codes.iter().collect();
        codes.sort();
        codes
    }

    /// Narrow to a single instrument for a scoped run.
    ///
    /// An instrument outside the universe yields an empty universe.
    pub fn restrict_to(&self, code: &str) -> Self {
        let code = InstrumentCode::normalize(code);
        Self {
            date: self.date,
            codes: self.codes.iter().filter(|c| c.as_str() == code).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(date: NaiveDate, code: &str) -> LimitUpEntry {
        LimitUpEntry {
            date,
            instrument_code: InstrumentCode::new(code),
            close_price: 10.0,
            limit_up_price: 11.0,
        }
    }

    fn table() -> LimitUpTable {
        LimitUpTable::from_rows(vec![
            entry(d(2025, 11, 14), "1101"),
            entry(d(2025, 11, 17), "2355"),
            entry(d(2025, 11, 17), "8043"),
            entry(d(2025, 11, 18), "3167"),
            entry(d(2025, 11, 18), "2355"),
        ])
    }

    #[test]
    fn union_of_today_and_previous() {
        let u = table().select(d(2025, 11, 18), Some(d(2025, 11, 17)));
        let codes: Vec<&str> = u.sorted_codes().into_iter().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["2355", "3167", "8043"]);
    }

    #[test]
    fn without_previous_date_only_today() {
        let u = table().select(d(2025, 11, 18), None);
        assert_eq!(u.len(), 2);
        assert!(!u.contains("8043"));
    }

    #[test]
    fn empty_universe_is_not_an_error() {
        let u = table().select(d(2025, 12, 1), Some(d(2025, 11, 28)));
        assert!(u.is_empty());
    }

    #[test]
    fn previous_listed_date_skips_weekend() {
        // 2025-11-17 is a Monday; the previous table date is Friday the 14th.
        let t = table();
        assert_eq!(t.previous_listed_date(d(2025, 11, 17), 7), Some(d(2025, 11, 14)));
        assert_eq!(t.previous_listed_date(d(2025, 11, 17), 2), None);
        assert_eq!(t.previous_listed_date(d(2025, 11, 14), 7), None);
    }

    #[test]
    fn restrict_to_single_instrument() {
        let u = table().select(d(2025, 11, 18), Some(d(2025, 11, 17)));
        let scoped = u.restrict_to("2355  ");
        assert_eq!(scoped.len(), 1);
        assert!(scoped.contains("2355"));
        assert!(u.restrict_to("9999").is_empty());
    }

    #[test]
    fn csv_accepts_both_date_forms_and_padded_codes() {
        let data = "date,instrument_code,close_price,limit_up_price\n\
                    20251118,2355  ,33.35,33.35\n\
                    2025-11-17,8043,49.2,49.2\n";
        let t = LimitUpTable::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[0].instrument_code.as_str(), "2355");
        assert_eq!(t.rows()[1].date, d(2025, 11, 17));
    }

    #[test]
    fn csv_accepts_stock_id_alias() {
        let data = "date,stock_id,close_price,limit_up_price\n20251118,3167,10.0,11.0\n";
        let t = LimitUpTable::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(t.rows()[0].instrument_code.as_str(), "3167");
    }

    #[test]
    fn csv_rejects_bad_date() {
        let data = "date,instrument_code,close_price,limit_up_price\nnot-a-date,2355,1.0,1.0\n";
        let err = LimitUpTable::from_csv_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, UniverseError::InvalidDate { row: 0, .. }));
    }

    #[test]
    fn dataframe_with_string_dates() {
        let df = DataFrame::new(vec![
            Column::new("date".into(), &["20251118", "20251117"]),
            Column::new("stock_id".into(), &["2355", "8043 "]),
            Column::new("close_price".into(), &[33.35, 49.2]),
            Column::new("limit_up_price".into(), &[33.35, 49.2]),
        ])
        .unwrap();
        let t = LimitUpTable::from_dataframe(&df).unwrap();
        assert_eq!(t.rows()[1].instrument_code.as_str(), "8043");
        assert_eq!(t.rows()[1].date, d(2025, 11, 17));
    }

    #[test]
    fn dataframe_missing_column() {
        let df = DataFrame::new(vec![Column::new("date".into(), &["20251118"])]).unwrap();
        assert!(matches!(
            LimitUpTable::from_dataframe(&df),
            Err(UniverseError::MissingColumn(_))
        ));
    }
}
