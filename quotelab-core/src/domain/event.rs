//! CanonicalEvent: the single decoded shape shared by both wire encodings.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::instrument::InstrumentCode;

/// Number of book levels carried per side.
pub const MAX_DEPTH_LEVELS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Trade,
    Depth,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Trade => "Trade",
            EventKind::Depth => "Depth",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Trade" => Ok(EventKind::Trade),
            "Depth" => Ok(EventKind::Depth),
            other => Err(other.to_string()),
        }
    }
}

/// Trade match flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeFlag {
    /// Pre-open auction / trial match disclosure (`0`).
    Auction,
    /// Continuous trading (`1`).
    Continuous,
}

impl TradeFlag {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(TradeFlag::Auction),
            1 => Some(TradeFlag::Continuous),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            TradeFlag::Auction => 0,
            TradeFlag::Continuous => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: u64,
}

/// One side of a five-level book snapshot.
///
/// `count` is the level count announced by the feed. Levels at or beyond
/// `count`, or missing from the record, stay `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BookSide {
    pub count: u8,
    pub levels: [Option<PriceLevel>; MAX_DEPTH_LEVELS],
}

impl BookSide {
    pub fn level(&self, index: usize) -> Option<PriceLevel> {
        self.levels.get(index).copied().flatten()
    }

    /// Best (first) level, if present.
    pub fn best(&self) -> Option<PriceLevel> {
        self.level(0)
    }

    pub fn populated(&self) -> usize {
        self.levels.iter().filter(|l| l.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeFields {
    pub flag: TradeFlag,
    pub price: f64,
    pub last_volume: u64,
    pub cumulative_volume: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthFields {
    pub bids: BookSide,
    pub asks: BookSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventBody {
    Trade(TradeFields),
    Depth(DepthFields),
}

/// A decoded feed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub instrument_code: InstrumentCode,
    pub event_time: NaiveDateTime,
    pub body: EventBody,
}

impl CanonicalEvent {
    pub fn kind(&self) -> EventKind {
        match self.body {
            EventBody::Trade(_) => EventKind::Trade,
            EventBody::Depth(_) => EventKind::Depth,
        }
    }

    pub fn trade(&self) -> Option<&TradeFields> {
        match &self.body {
            EventBody::Trade(t) => Some(t),
            EventBody::Depth(_) => None,
        }
    }

    pub fn depth(&self) -> Option<&DepthFields> {
        match &self.body {
            EventBody::Depth(d) => Some(d),
            EventBody::Trade(_) => None,
        }
    }
}
