//! QuoteLab Core: domain types, record decoding, universe selection and the
//! per-instrument Parquet store.
//!
//! - Domain types (canonical events, instrument codes, packed feed times)
//! - Stateless record decoder for the delimited and structured encodings
//! - Limit-up reference table and per-date instrument universe
//! - Fixed-schema instrument-day files with a per-date manifest

pub mod data;
pub mod decode;
pub mod domain;

pub use data::{store, universe};
