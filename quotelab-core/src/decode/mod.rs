//! Record decoder: raw feed records to [`CanonicalEvent`]s.
//!
//! Two wire encodings feed the same canonical shape:
//! - **Delimited**: positional comma-separated lines
//!   (`Trade,2355  ,131219825776,0,333500,1,1530,1234`)
//! - **Structured**: one JSON object per record with named, typed fields
//!
//! Encoding details stop at this module. Everything downstream sees only
//! [`DecodedRecord`].
//!
//! Decoding is stateless. The universe filter runs right after the
//! instrument code is extracted, before any other field is touched, so
//! records for instruments outside the universe cost one split (or one
//! header read) and one hash lookup.
//!
//! Delimited lines whose leading field is neither `Trade` nor `Depth` are
//! not events at all: [`Decoder::is_event_line`] reports them so scans can
//! skip them without counting a failure.

pub mod delimited;
pub mod structured;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::data::universe::InstrumentUniverse;
use crate::domain::{CanonicalEvent, TimeError};

pub use structured::{RecordHeader, StructuredLevel, StructuredRecord};

/// Book side, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Delimited-format marker prefix (`BID:` / `ASK:`).
    pub fn marker(self) -> &'static str {
        match self {
            Side::Bid => "BID:",
            Side::Ask => "ASK:",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => f.write_str("bid"),
            Side::Ask => f.write_str("ask"),
        }
    }
}

/// Per-record decode failure. Always local: the caller counts it, drops
/// the record, and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("trade flag '{0}' is not 0 or 1")]
    MalformedFlag(String),

    #[error("{side} level {level}: '{token}' is not price*volume")]
    MalformedLevel {
        side: Side,
        level: usize,
        token: String,
    },

    #[error("expected {side} marker with count 0-5, found '{found}'")]
    MalformedMarker { side: Side, found: String },

    #[error("unknown record kind '{0}'")]
    UnknownKind(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a non-negative integer: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid event time: {0}")]
    InvalidTime(#[from] TimeError),

    #[error("malformed structured record: {0}")]
    MalformedRecord(String),
}

/// Counting key for [`DecodeError`]s in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    MalformedFlag,
    MalformedLevel,
    MalformedMarker,
    UnknownKind,
    MissingField,
    InvalidField,
    InvalidTime,
    MalformedRecord,
}

impl DecodeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeErrorKind::MalformedFlag => "malformed_flag",
            DecodeErrorKind::MalformedLevel => "malformed_level",
            DecodeErrorKind::MalformedMarker => "malformed_marker",
            DecodeErrorKind::UnknownKind => "unknown_kind",
            DecodeErrorKind::MissingField => "missing_field",
            DecodeErrorKind::InvalidField => "invalid_field",
            DecodeErrorKind::InvalidTime => "invalid_time",
            DecodeErrorKind::MalformedRecord => "malformed_record",
        }
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DecodeError {
    pub fn kind(&self) -> DecodeErrorKind {
        match self {
            DecodeError::MalformedFlag(_) => DecodeErrorKind::MalformedFlag,
            DecodeError::MalformedLevel { .. } => DecodeErrorKind::MalformedLevel,
            DecodeError::MalformedMarker { .. } => DecodeErrorKind::MalformedMarker,
            DecodeError::UnknownKind(_) => DecodeErrorKind::UnknownKind,
            DecodeError::MissingField(_) => DecodeErrorKind::MissingField,
            DecodeError::InvalidField { .. } => DecodeErrorKind::InvalidField,
            DecodeError::InvalidTime(_) => DecodeErrorKind::InvalidTime,
            DecodeError::MalformedRecord(_) => DecodeErrorKind::MalformedRecord,
        }
    }
}

/// Wire encoding of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEncoding {
    #[default]
    Delimited,
    Structured,
}

impl WireEncoding {
    /// Frame one source line as a raw record.
    pub fn frame(self, line: &str) -> RawRecord<'_> {
        match self {
            WireEncoding::Delimited => RawRecord::Delimited(line),
            WireEncoding::Structured => RawRecord::Structured(line),
        }
    }
}

/// One undecoded record. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord<'a> {
    Delimited(&'a str),
    Structured(&'a str),
}

/// A decoded event plus the feed's trailing sequence number, which is
/// only used to check stream ordering and is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub event: CanonicalEvent,
    pub sequence: Option<u64>,
}

/// Decode one raw record for `date`.
///
/// Returns `Ok(None)` when the record's instrument is outside `universe`,
/// or when a delimited line carries no event kind.
pub fn decode(
    raw: &RawRecord<'_>,
    universe: &InstrumentUniverse,
    date: NaiveDate,
) -> Result<Option<DecodedRecord>, DecodeError> {
    match raw {
        RawRecord::Delimited(line) => delimited::decode_line(line, universe, date),
        RawRecord::Structured(line) => structured::decode_json(line, universe, date),
    }
}

/// Decoder bound to one date and one universe.
///
/// Holds only shared references, so one decoder can serve every source
/// scan of a run concurrently.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'u> {
    date: NaiveDate,
    universe: &'u InstrumentUniverse,
}

impl<'u> Decoder<'u> {
    pub fn new(date: NaiveDate, universe: &'u InstrumentUniverse) -> Self {
        Self { date, universe }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn universe(&self) -> &'u InstrumentUniverse {
        self.universe
    }

    pub fn decode(&self, raw: &RawRecord<'_>) -> Result<Option<DecodedRecord>, DecodeError> {
        decode(raw, self.universe, self.date)
    }

    /// Frame and decode one source line.
    pub fn decode_line(
        &self,
        encoding: WireEncoding,
        line: &str,
    ) -> Result<Option<DecodedRecord>, DecodeError> {
        self.decode(&encoding.frame(line))
    }

    /// `false` for delimited lines that are neither Trade nor Depth records.
    /// Structured records always count; an unknown `kind` there is an error.
    pub fn is_event_line(&self, encoding: WireEncoding, line: &str) -> bool {
        match encoding {
            WireEncoding::Delimited => delimited::line_kind(line).is_some(),
            WireEncoding::Structured => true,
        }
    }
}

/// Parse a required non-negative integer field.
pub(crate) fn int_field(field: &'static str, value: Option<&str>) -> Result<u64, DecodeError> {
    let value = value.ok_or(DecodeError::MissingField(field))?.trim();
    value.parse().map_err(|_| DecodeError::InvalidField {
        field,
        value: value.to_string(),
    })
}
