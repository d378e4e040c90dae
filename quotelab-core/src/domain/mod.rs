//! Domain types for QuoteLab

pub mod event;
pub mod instrument;
pub mod price;
pub mod time;

pub use event::{
    BookSide, CanonicalEvent, DepthFields, EventBody, EventKind, PriceLevel, TradeFields,
    TradeFlag, MAX_DEPTH_LEVELS,
};
pub use instrument::InstrumentCode;
pub use price::{scale_price, PRICE_SCALE};
pub use time::{epoch_micros, from_epoch_micros, PackedTime, TimeError};
