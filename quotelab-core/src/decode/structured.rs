//! Structured (JSON-per-line) record format.
//!
//! Field names are fixed; levels are `[price, volume]` integer pairs in raw
//! feed units. `bid_count` / `ask_count` default to the array length.
//!
//! A line is read twice: first only `kind` and `code` through
//! [`RecordHeader`], then, for instruments in the universe, the typed body.
//! Body fields of filtered records are never type-checked.

use std::borrow::Cow;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{DecodeError, DecodedRecord, Side};
use crate::data::universe::InstrumentUniverse;
use crate::domain::{
    scale_price, BookSide, CanonicalEvent, DepthFields, EventBody, EventKind, InstrumentCode,
    PackedTime, PriceLevel, TradeFields, TradeFlag, MAX_DEPTH_LEVELS,
};

/// One `[price, volume]` pair as it appears on the wire. Kept signed so a
/// negative value surfaces as a level error instead of a framing error.
pub type StructuredLevel = Vec<i64>;

/// Routing fields of a structured record. Every other field is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordHeader<'a> {
    #[serde(borrow)]
    pub kind: Cow<'a, str>,
    #[serde(borrow, default)]
    pub code: Cow<'a, str>,
}

impl<'a> RecordHeader<'a> {
    pub fn from_json(line: &'a str) -> Result<Self, DecodeError> {
        serde_json::from_str(line.trim()).map_err(|e| DecodeError::MalformedRecord(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord<'a> {
    #[serde(borrow)]
    pub kind: Cow<'a, str>,
    #[serde(borrow)]
    pub code: Cow<'a, str>,
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bids: Vec<StructuredLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asks: Vec<StructuredLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl<'a> StructuredRecord<'a> {
    pub fn from_json(line: &'a str) -> Result<Self, DecodeError> {
        serde_json::from_str(line.trim()).map_err(|e| DecodeError::MalformedRecord(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|e| DecodeError::MalformedRecord(e.to_string()))
    }
}

/// Decode one JSON line, checking the universe before the body is parsed.
pub fn decode_json(
    line: &str,
    universe: &InstrumentUniverse,
    date: NaiveDate,
) -> Result<Option<DecodedRecord>, DecodeError> {
    let header = RecordHeader::from_json(line)?;
    let Some((kind, code)) = route(&header.kind, &header.code, universe)? else {
        return Ok(None);
    };
    let record = StructuredRecord::from_json(line)?;
    decode_body(kind, code, &record, date).map(Some)
}

/// Decode an already deserialized record.
pub fn decode_record(
    record: &StructuredRecord<'_>,
    universe: &InstrumentUniverse,
    date: NaiveDate,
) -> Result<Option<DecodedRecord>, DecodeError> {
    match route(&record.kind, &record.code, universe)? {
        Some((kind, code)) => decode_body(kind, code, record, date).map(Some),
        None => Ok(None),
    }
}

/// `None` when the instrument is outside the universe.
fn route<'c>(
    kind: &str,
    code: &'c str,
    universe: &InstrumentUniverse,
) -> Result<Option<(EventKind, &'c str)>, DecodeError> {
    let kind: EventKind = kind.parse().map_err(DecodeError::UnknownKind)?;
    let code = InstrumentCode::normalize(code);
    if code.is_empty() {
        return Err(DecodeError::MissingField("instrument_code"));
    }
    Ok(universe.contains(code).then_some((kind, code)))
}

fn decode_body(
    kind: EventKind,
    code: &str,
    record: &StructuredRecord<'_>,
    date: NaiveDate,
) -> Result<DecodedRecord, DecodeError> {
    let event_time = PackedTime::new(record.time)?.on(date)?;

    let body = match kind {
        EventKind::Trade => {
            let flag_code = record.flag.ok_or(DecodeError::MissingField("flag"))?;
            let flag = TradeFlag::from_code(flag_code)
                .ok_or_else(|| DecodeError::MalformedFlag(flag_code.to_string()))?;
            EventBody::Trade(TradeFields {
                flag,
                price: scale_price(record.price.ok_or(DecodeError::MissingField("price"))?),
                last_volume: record.volume.ok_or(DecodeError::MissingField("last_volume"))?,
                cumulative_volume: record
                    .total_volume
                    .ok_or(DecodeError::MissingField("cumulative_volume"))?,
            })
        }
        EventKind::Depth => EventBody::Depth(DepthFields {
            bids: structured_side(&record.bids, record.bid_count, Side::Bid)?,
            asks: structured_side(&record.asks, record.ask_count, Side::Ask)?,
        }),
    };

    Ok(DecodedRecord {
        event: CanonicalEvent {
            instrument_code: InstrumentCode::new(code),
            event_time,
            body,
        },
        sequence: record.seq,
    })
}

fn structured_side(
    levels: &[StructuredLevel],
    count: Option<u64>,
    side: Side,
) -> Result<BookSide, DecodeError> {
    let count = count.unwrap_or(levels.len() as u64);
    let count = u8::try_from(count)
        .ok()
        .filter(|&c| usize::from(c) <= MAX_DEPTH_LEVELS)
        .ok_or_else(|| DecodeError::MalformedMarker {
            side,
            found: count.to_string(),
        })?;

    let mut book = BookSide {
        count,
        ..BookSide::default()
    };
    for (i, pair) in levels.iter().take(usize::from(count)).enumerate() {
        book.levels[i] = Some(structured_level(pair, side, i)?);
    }
    Ok(book)
}

fn structured_level(pair: &[i64], side: Side, index: usize) -> Result<PriceLevel, DecodeError> {
    match *pair {
        [price, volume] if price >= 0 && volume >= 0 => Ok(PriceLevel {
            price: scale_price(price as u64),
            volume: volume as u64,
        }),
        _ => Err(DecodeError::MalformedLevel {
            side,
            level: index + 1,
            token: format!("{pair:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::delimited::decode_line;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
    }

    fn universe() -> InstrumentUniverse {
        InstrumentUniverse::new(date(), [InstrumentCode::new("1234")])
    }

    fn decode(json: &str) -> Result<Option<DecodedRecord>, DecodeError> {
        decode_json(json, &universe(), date())
    }

    #[test]
    fn depth_matches_delimited_form() {
        let json = r#"{"kind":"Depth","code":"1234","time":91814838927,
            "bids":[[193000,60],[192500,48],[192000,59]],
            "asks":[[193500,26],[194000,40],[194500,9]],"seq":1234}"#;
        let line = "Depth,1234  ,91814838927,BID:3,193000*60,192500*48,192000*59,ASK:3,193500*26,194000*40,194500*9,1234";

        let structured = decode(json).unwrap().unwrap();
        let delimited = decode_line(line, &universe(), date()).unwrap().unwrap();
        assert_eq!(structured, delimited);
    }

    #[test]
    fn explicit_count_below_array_length_truncates() {
        let json = r#"{"kind":"Depth","code":"1234","time":91814838927,
            "bids":[[193000,60],[192500,48]],"bid_count":1,"asks":[]}"#;
        let depth = *decode(json).unwrap().unwrap().event.depth().unwrap();
        assert_eq!(depth.bids.count, 1);
        assert_eq!(depth.bids.populated(), 1);
        assert_eq!(depth.asks.count, 0);
    }

    #[test]
    fn count_above_five_is_rejected() {
        let json = r#"{"kind":"Depth","code":"1234","time":91814838927,"bid_count":6}"#;
        assert!(matches!(
            decode(json),
            Err(DecodeError::MalformedMarker { side: Side::Bid, .. })
        ));
    }

    #[test]
    fn bad_level_pairs() {
        let three = r#"{"kind":"Depth","code":"1234","time":91814838927,"bids":[[1,2,3]]}"#;
        assert!(matches!(
            decode(three),
            Err(DecodeError::MalformedLevel { side: Side::Bid, level: 1, .. })
        ));
        let negative = r#"{"kind":"Depth","code":"1234","time":91814838927,"asks":[[1,2],[-1,2]]}"#;
        assert!(matches!(
            decode(negative),
            Err(DecodeError::MalformedLevel { side: Side::Ask, level: 2, .. })
        ));
    }

    #[test]
    fn trade_requires_all_fields() {
        let json = r#"{"kind":"Trade","code":"1234","time":131219825776,"flag":1,"price":333500}"#;
        assert_eq!(decode(json), Err(DecodeError::MissingField("last_volume")));
    }

    #[test]
    fn trade_flag_validated() {
        let json = r#"{"kind":"Trade","code":"1234","time":131219825776,"flag":3,"price":1,"volume":1,"total_volume":1}"#;
        assert_eq!(decode(json), Err(DecodeError::MalformedFlag("3".into())));
    }

    #[test]
    fn filtered_before_time_is_checked() {
        let json = r#"{"kind":"Trade","code":"9999","time":999999999999999}"#;
        assert_eq!(decode(json), Ok(None));
    }

    #[test]
    fn filtered_body_is_never_type_checked() {
        assert_eq!(decode(r#"{"kind":"Trade","code":"9999","time":"09:00"}"#), Ok(None));
        assert_eq!(decode(r#"{"kind":"Depth","code":"9999"}"#), Ok(None));
        assert_eq!(
            decode(r#"{"kind":"Depth","code":"9999 ","time":1,"bids":"none","asks":[[1]]}"#),
            Ok(None)
        );
    }

    #[test]
    fn header_errors_still_count() {
        assert_eq!(
            decode(r#"{"kind":"Trade","time":1}"#),
            Err(DecodeError::MissingField("instrument_code"))
        );
        assert!(matches!(
            decode(r#"{"code":"9999"}"#),
            Err(DecodeError::MalformedRecord(_))
        ));
    }

    #[test]
    fn unknown_kind_and_framing_errors() {
        assert_eq!(
            decode(r#"{"kind":"Quote","code":"1234","time":1}"#),
            Err(DecodeError::UnknownKind("Quote".into()))
        );
        assert!(matches!(
            decode(r#"{"kind":"Trade","code":"1234"}"#),
            Err(DecodeError::MalformedRecord(_))
        ));
        assert!(matches!(
            decode(r#"{"kind":"Trade","code":"1234","time":"09:00"}"#),
            Err(DecodeError::MalformedRecord(_))
        ));
    }

    #[test]
    fn json_round_trip_keeps_decoded_event() {
        let json = r#"{"kind":"Trade","code":"1234","time":131219825776,"flag":0,"price":333500,"volume":1,"total_volume":1530}"#;
        let record = StructuredRecord::from_json(json).unwrap();
        let text = record.to_json().unwrap();
        let again = StructuredRecord::from_json(&text).unwrap();
        assert_eq!(
            decode_record(&record, &universe(), date()),
            decode_record(&again, &universe(), date())
        );
    }
}
