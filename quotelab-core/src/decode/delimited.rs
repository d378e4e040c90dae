//! Delimited positional-field line format.
//!
//! ```text
//! Trade,<code>,<time>,<flag>,<price>,<last_volume>,<cumulative_volume>[,<seq>]
//! Depth,<code>,<time>,BID:<n>,<p*v>...,ASK:<m>,<p*v>...[,<seq>]
//! ```
//!
//! Lines with any other leading field are not records and decode to
//! `Ok(None)`.

use chrono::NaiveDate;

use super::{int_field, DecodeError, DecodedRecord, Side};
use crate::data::universe::InstrumentUniverse;
use crate::domain::{
    scale_price, BookSide, CanonicalEvent, DepthFields, EventBody, EventKind, InstrumentCode,
    PackedTime, PriceLevel, TradeFields, TradeFlag, MAX_DEPTH_LEVELS,
};

/// Event kind named by the leading field, if any.
pub fn line_kind(line: &str) -> Option<EventKind> {
    match line.split(',').next().map(str::trim) {
        Some("Trade") => Some(EventKind::Trade),
        Some("Depth") => Some(EventKind::Depth),
        _ => None,
    }
}

pub fn decode_line(
    line: &str,
    universe: &InstrumentUniverse,
    date: NaiveDate,
) -> Result<Option<DecodedRecord>, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.split(',');

    let Some(kind) = line_kind(line) else {
        return Ok(None);
    };
    fields.next();

    let code = fields
        .next()
        .map(InstrumentCode::normalize)
        .filter(|c| !c.is_empty())
        .ok_or(DecodeError::MissingField("instrument_code"))?;
    if !universe.contains(code) {
        return Ok(None);
    }

    let time = fields.next().ok_or(DecodeError::MissingField("time"))?;
    let event_time = PackedTime::parse(time)?.on(date)?;

    let (body, sequence) = match kind {
        EventKind::Trade => parse_trade(&mut fields)?,
        EventKind::Depth => {
            let rest: Vec<&str> = fields.map(str::trim).collect();
            parse_depth(&rest)?
        }
    };

    Ok(Some(DecodedRecord {
        event: CanonicalEvent {
            instrument_code: InstrumentCode::new(code),
            event_time,
            body,
        },
        sequence,
    }))
}

fn parse_trade<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
) -> Result<(EventBody, Option<u64>), DecodeError> {
    let flag_raw = fields.next().ok_or(DecodeError::MissingField("flag"))?.trim();
    let flag = flag_raw
        .parse::<u64>()
        .ok()
        .and_then(TradeFlag::from_code)
        .ok_or_else(|| DecodeError::MalformedFlag(flag_raw.to_string()))?;

    let price = int_field("price", fields.next())?;
    let last_volume = int_field("last_volume", fields.next())?;
    let cumulative_volume = int_field("cumulative_volume", fields.next())?;
    let sequence = parse_sequence(fields.next())?;

    Ok((
        EventBody::Trade(TradeFields {
            flag,
            price: scale_price(price),
            last_volume,
            cumulative_volume,
        }),
        sequence,
    ))
}

/// `fields` starts at the bid marker.
fn parse_depth(fields: &[&str]) -> Result<(EventBody, Option<u64>), DecodeError> {
    let mut pos = 0;
    let bids = parse_side(fields, &mut pos, Side::Bid)?;
    skip_surplus_levels(fields, &mut pos);
    let asks = parse_side(fields, &mut pos, Side::Ask)?;
    skip_surplus_levels(fields, &mut pos);
    let sequence = parse_sequence(fields.get(pos).copied())?;

    Ok((EventBody::Depth(DepthFields { bids, asks }), sequence))
}

fn parse_side(fields: &[&str], pos: &mut usize, side: Side) -> Result<BookSide, DecodeError> {
    let marker = fields.get(*pos).copied().unwrap_or("");
    let count = marker
        .strip_prefix(side.marker())
        .and_then(|c| c.trim().parse::<u8>().ok())
        .filter(|&c| usize::from(c) <= MAX_DEPTH_LEVELS)
        .ok_or_else(|| DecodeError::MalformedMarker {
            side,
            found: marker.to_string(),
        })?;
    *pos += 1;

    let mut book = BookSide {
        count,
        ..BookSide::default()
    };
    for level in 0..usize::from(count) {
        let Some(&token) = fields.get(*pos) else {
            break;
        };
        if is_marker(token) || is_trailing_sequence(fields, *pos) {
            break;
        }
        book.levels[level] = Some(parse_level(token, side, level)?);
        *pos += 1;
    }
    Ok(book)
}

/// Levels past the announced count are skipped without being parsed.
fn skip_surplus_levels(fields: &[&str], pos: &mut usize) {
    while let Some(&token) = fields.get(*pos) {
        if is_marker(token) || is_trailing_sequence(fields, *pos) {
            break;
        }
        *pos += 1;
    }
}

fn parse_level(token: &str, side: Side, level: usize) -> Result<PriceLevel, DecodeError> {
    let malformed = || DecodeError::MalformedLevel {
        side,
        level: level + 1,
        token: token.to_string(),
    };
    let (price, volume) = token.split_once('*').ok_or_else(malformed)?;
    let price: u64 = price.trim().parse().map_err(|_| malformed())?;
    let volume: u64 = volume.trim().parse().map_err(|_| malformed())?;
    Ok(PriceLevel {
        price: scale_price(price),
        volume,
    })
}

fn is_marker(token: &str) -> bool {
    token.starts_with(Side::Bid.marker()) || token.starts_with(Side::Ask.marker())
}

/// The last field of a depth line is the sequence number when it is a
/// bare token rather than a `price*volume` pair. This holds even while
/// announced levels are still outstanding: feeds truncate level lists and
/// keep the trailing sequence, so `ASK:2,193500*26,9` is one ask level
/// plus sequence 9, never a malformed second level.
fn is_trailing_sequence(fields: &[&str], pos: usize) -> bool {
    pos + 1 == fields.len() && !fields[pos].contains('*')
}

fn parse_sequence(field: Option<&str>) -> Result<Option<u64>, DecodeError> {
    match field.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| DecodeError::InvalidField {
                field: "sequence",
                value: value.to_string(),
            }),
    }
}
