//! Per-instrument, per-date Parquet store.
//!
//! Layout:
//! ```text
//! {root}/{YYYYMMDD}/{instrument_code}.parquet
//! {root}/{YYYYMMDD}/_manifest.json
//! ```
//!
//! Every file is encoded in memory, hashed, written to a `.tmp` sibling and
//! renamed into place. A reader never observes a half-written file.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::schema::{self, EventSchema, SchemaError, EVENT_TIME_UNIT};
use crate::domain::{
    epoch_micros, from_epoch_micros, BookSide, CanonicalEvent, DepthFields, EventBody, EventKind,
    InstrumentCode, PriceLevel, TradeFields, TradeFlag, MAX_DEPTH_LEVELS,
};

pub const MANIFEST_FILE: &str = "_manifest.json";

const DATE_DIR_FORMAT: &str = "%Y%m%d";

/// `YYYYMMDD` directory key for a trading date.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_DIR_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    if key.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(key, DATE_DIR_FORMAT).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("No file for {instrument} on {date}")]
    NotFound { date: NaiveDate, instrument: String },

    #[error("Refusing to write an empty file for {0}")]
    Empty(String),

    #[error("Instrument code '{0}' is not a valid file name")]
    InvalidCode(String),

    #[error("Manifest error: {0}")]
    Manifest(String),
}

impl StoreError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

/// One row of the date manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub instrument_code: InstrumentCode,
    pub rows: usize,
    pub trades: usize,
    pub depths: usize,
    /// BLAKE3 of the Parquet file bytes.
    pub blake3: String,
}

/// `_manifest.json` for one output date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateManifest {
    pub date: NaiveDate,
    pub files: Vec<ManifestEntry>,
    /// Run summary of the run that produced the files.
    #[serde(default)]
    pub summary: serde_json::Value,
}

impl DateManifest {
    pub fn new(date: NaiveDate, mut files: Vec<ManifestEntry>) -> Self {
        files.sort_by(|a, b| a.instrument_code.cmp(&b.instrument_code));
        Self {
            date,
            files,
            summary: serde_json::Value::Null,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.files.iter().map(|f| f.rows).sum()
    }

    pub fn entry(&self, code: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|f| f.instrument_code.as_str() == code)
    }
}

/// Root of an output tree.
#[derive(Debug, Clone)]
pub struct InstrumentDayStore {
    root: PathBuf,
}

impl InstrumentDayStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn date_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date_key(date))
    }

    pub fn file_path(&self, date: NaiveDate, code: &str) -> PathBuf {
        self.date_dir(date).join(format!("{code}.parquet"))
    }

    pub fn manifest_path(&self, date: NaiveDate) -> PathBuf {
        self.date_dir(date).join(MANIFEST_FILE)
    }

    /// Write one instrument-day file.
    ///
    /// Events are written in the order given. All events must belong to
    /// `code`.
    pub fn write(
        &self,
        date: NaiveDate,
        code: &InstrumentCode,
        events: &[CanonicalEvent],
    ) -> Result<ManifestEntry, StoreError> {
        if !is_valid_file_stem(code.as_str()) {
            return Err(StoreError::InvalidCode(code.to_string()));
        }
        if events.is_empty() {
            return Err(StoreError::Empty(code.to_string()));
        }
        if let Some(stray) = events.iter().find(|e| &e.instrument_code != code) {
            return Err(StoreError::InvalidRow {
                row: 0,
                reason: format!(
                    "event for {} routed to file for {code}",
                    stray.instrument_code
                ),
            });
        }

        let mut df = events_to_dataframe(events)?;
        let mut bytes = Vec::new();
        ParquetWriter::new(&mut bytes)
            .finish(&mut df)
            .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;

        let dir = self.date_dir(date);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        write_atomic(&self.file_path(date, code.as_str()), &bytes)?;

        let trades = events.iter().filter(|e| e.kind() == EventKind::Trade).count();
        debug!(
            instrument = code.as_str(),
            rows = events.len(),
            bytes = bytes.len(),
            "wrote instrument-day file"
        );
        Ok(ManifestEntry {
            instrument_code: code.clone(),
            rows: events.len(),
            trades,
            depths: events.len() - trades,
            blake3: blake3::hash(&bytes).to_hex().to_string(),
        })
    }

    pub fn exists(&self, date: NaiveDate, code: &str) -> bool {
        self.file_path(date, code).is_file()
    }

    /// Load one instrument-day file as a DataFrame.
    pub fn load(&self, date: NaiveDate, code: &str) -> Result<DataFrame, StoreError> {
        let path = self.file_path(date, code);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                date,
                instrument: code.to_string(),
            });
        }
        read_parquet(&path)
    }

    pub fn load_events(
        &self,
        date: NaiveDate,
        code: &str,
    ) -> Result<Vec<CanonicalEvent>, StoreError> {
        dataframe_to_events(&self.load(date, code)?)
    }

    /// Instruments with a file for `date`, sorted. A missing date directory
    /// yields an empty list.
    pub fn list_instruments(&self, date: NaiveDate) -> Result<Vec<InstrumentCode>, StoreError> {
        let dir = self.date_dir(date);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut codes = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                codes.push(InstrumentCode::new(stem));
            }
        }
        codes.sort();
        Ok(codes)
    }

    /// Delete instrument files for `date` whose code is not in `keep`.
    /// Returns the removed codes, sorted.
    pub fn remove_stale(
        &self,
        date: NaiveDate,
        keep: &[InstrumentCode],
    ) -> Result<Vec<InstrumentCode>, StoreError> {
        let mut removed = Vec::new();
        for code in self.list_instruments(date)? {
            if keep.contains(&code) {
                continue;
            }
            let path = self.file_path(date, code.as_str());
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            debug!(instrument = code.as_str(), %date, "removed stale file");
            removed.push(code);
        }
        Ok(removed)
    }

    /// Dates that have an output directory, ascending.
    pub fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut dates = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(date) = entry.file_name().to_str().and_then(parse_date_key) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn write_manifest(&self, manifest: &DateManifest) -> Result<(), StoreError> {
        let dir = self.date_dir(manifest.date);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| StoreError::Manifest(format!("serialize: {e}")))?;
        write_atomic(&self.manifest_path(manifest.date), json.as_bytes())
    }

    /// `Ok(None)` when no manifest exists for `date`.
    pub fn read_manifest(&self, date: NaiveDate) -> Result<Option<DateManifest>, StoreError> {
        let path = self.manifest_path(date);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Manifest(format!("{}: {e}", path.display())))
    }

    pub fn has_manifest(&self, date: NaiveDate) -> bool {
        self.manifest_path(date).is_file()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// A code must name a single file inside the date directory.
fn is_valid_file_stem(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with('.')
        && !code.contains(['/', '\\', '\0'])
}

/// Write `bytes` to `path` via a `.tmp` sibling and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    if let Err(e) = fs::write(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, e));
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read {}: {e}", path.display())))
}

/// Build the fixed-order output frame for a batch of events.
pub fn events_to_dataframe(events: &[CanonicalEvent]) -> Result<DataFrame, StoreError> {
    let kinds: Vec<&str> = events.iter().map(|e| e.kind().as_str()).collect();
    let codes: Vec<&str> = events.iter().map(|e| e.instrument_code.as_str()).collect();
    let times: Vec<i64> = events.iter().map(|e| epoch_micros(e.event_time)).collect();

    let trades: Vec<Option<&TradeFields>> = events.iter().map(CanonicalEvent::trade).collect();
    let depths: Vec<Option<&DepthFields>> = events.iter().map(CanonicalEvent::depth).collect();

    let flag: Vec<Option<u32>> = trades.iter().map(|t| t.map(|t| t.flag.code())).collect();
    let price: Vec<Option<f64>> = trades.iter().map(|t| t.map(|t| t.price)).collect();
    let last_volume: Vec<Option<u64>> = trades.iter().map(|t| t.map(|t| t.last_volume)).collect();
    let cumulative_volume: Vec<Option<u64>> = trades
        .iter()
        .map(|t| t.map(|t| t.cumulative_volume))
        .collect();
    let bid_count: Vec<Option<u32>> = depths
        .iter()
        .map(|d| d.map(|d| u32::from(d.bids.count)))
        .collect();
    let ask_count: Vec<Option<u32>> = depths
        .iter()
        .map(|d| d.map(|d| u32::from(d.asks.count)))
        .collect();

    let mut columns = vec![
        Column::new(schema::KIND.into(), kinds),
        Column::new(schema::INSTRUMENT_CODE.into(), codes),
        Column::new(schema::EVENT_TIME.into(), times)
            .cast(&DataType::Datetime(EVENT_TIME_UNIT, None))
            .map_err(|e| StoreError::Parquet(format!("event_time cast: {e}")))?,
        Column::new(schema::FLAG.into(), flag),
        Column::new(schema::PRICE.into(), price),
        Column::new(schema::LAST_VOLUME.into(), last_volume),
        Column::new(schema::CUMULATIVE_VOLUME.into(), cumulative_volume),
        Column::new(schema::BID_COUNT.into(), bid_count),
        Column::new(schema::ASK_COUNT.into(), ask_count),
    ];

    let sides: [(&str, fn(&DepthFields) -> &BookSide); 2] =
        [("bid", |d| &d.bids), ("ask", |d| &d.asks)];
    for (side, pick) in sides {
        for index in 0..MAX_DEPTH_LEVELS {
            let levels: Vec<Option<PriceLevel>> = depths
                .iter()
                .map(|d| d.and_then(|d| pick(d).level(index)))
                .collect();
            let prices: Vec<Option<f64>> = levels.iter().map(|l| l.map(|l| l.price)).collect();
            let volumes: Vec<Option<u64>> = levels.iter().map(|l| l.map(|l| l.volume)).collect();
            columns.push(Column::new(
                schema::level_price_column(side, index + 1).into(),
                prices,
            ));
            columns.push(Column::new(
                schema::level_volume_column(side, index + 1).into(),
                volumes,
            ));
        }
    }

    DataFrame::new(columns).map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

/// Convert a stored frame back to events.
pub fn dataframe_to_events(df: &DataFrame) -> Result<Vec<CanonicalEvent>, StoreError> {
    EventSchema::validate(df)?;

    let polars_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));
    let column = |name: &str| df.column(name).map_err(polars_err);

    let kinds = column(schema::KIND)?.str().map_err(polars_err)?;
    let codes = column(schema::INSTRUMENT_CODE)?.str().map_err(polars_err)?;
    let times_col = column(schema::EVENT_TIME)?
        .cast(&DataType::Int64)
        .map_err(polars_err)?;
    let times = times_col.i64().map_err(polars_err)?;
    let flags = column(schema::FLAG)?.u32().map_err(polars_err)?;
    let prices = column(schema::PRICE)?.f64().map_err(polars_err)?;
    let last_volumes = column(schema::LAST_VOLUME)?.u64().map_err(polars_err)?;
    let cumulative = column(schema::CUMULATIVE_VOLUME)?.u64().map_err(polars_err)?;
    let bid_counts = column(schema::BID_COUNT)?.u32().map_err(polars_err)?;
    let ask_counts = column(schema::ASK_COUNT)?.u32().map_err(polars_err)?;

    let mut level_columns = Vec::with_capacity(2 * MAX_DEPTH_LEVELS);
    for side in ["bid", "ask"] {
        for level in 1..=MAX_DEPTH_LEVELS {
            let p = column(&schema::level_price_column(side, level))?
                .f64()
                .map_err(polars_err)?;
            let v = column(&schema::level_volume_column(side, level))?
                .u64()
                .map_err(polars_err)?;
            level_columns.push((p, v));
        }
    }

    let mut events = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let invalid = |reason: &str| StoreError::InvalidRow {
            row,
            reason: reason.to_string(),
        };

        let kind: EventKind = kinds
            .get(row)
            .ok_or_else(|| invalid("null kind"))?
            .parse()
            .map_err(|k| invalid(&format!("unknown kind '{k}'")))?;
        let code = codes.get(row).ok_or_else(|| invalid("null instrument_code"))?;
        let event_time = times
            .get(row)
            .and_then(from_epoch_micros)
            .ok_or_else(|| invalid("null or out-of-range event_time"))?;

        let body = match kind {
            EventKind::Trade => EventBody::Trade(TradeFields {
                flag: flags
                    .get(row)
                    .and_then(|f| TradeFlag::from_code(u64::from(f)))
                    .ok_or_else(|| invalid("trade flag"))?,
                price: prices.get(row).ok_or_else(|| invalid("trade price"))?,
                last_volume: last_volumes
                    .get(row)
                    .ok_or_else(|| invalid("trade last_volume"))?,
                cumulative_volume: cumulative
                    .get(row)
                    .ok_or_else(|| invalid("trade cumulative_volume"))?,
            }),
            EventKind::Depth => {
                let mut depth = DepthFields::default();
                for (side_index, (counts, book)) in [
                    (bid_counts, &mut depth.bids),
                    (ask_counts, &mut depth.asks),
                ]
                .into_iter()
                .enumerate()
                {
                    let count = counts.get(row).ok_or_else(|| invalid("depth count"))?;
                    book.count = u8::try_from(count).map_err(|_| invalid("depth count"))?;
                    for level in 0..MAX_DEPTH_LEVELS {
                        let (p, v) = level_columns[side_index * MAX_DEPTH_LEVELS + level];
                        book.levels[level] = match (p.get(row), v.get(row)) {
                            (Some(price), Some(volume)) => Some(PriceLevel { price, volume }),
                            (None, None) => None,
                            _ => return Err(invalid("half-null depth level")),
                        };
                    }
                }
                EventBody::Depth(depth)
            }
        };

        events.push(CanonicalEvent {
            instrument_code: InstrumentCode::new(code),
            event_time,
            body,
        });
    }
    Ok(events)
}
