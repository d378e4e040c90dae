//! QuoteLab Runner: date runs, backfill and parity checks.
//!
//! This crate builds on `quotelab-core` to provide:
//! - TOML run configuration with dated source templates
//! - Feed sources (files on disk, in-memory replay)
//! - The feed multiplexer and per-instrument materializer
//! - One-date runs with an error budget and a run manifest
//! - Multi-date backfill over discovered source files
//! - Parity verification between two output roots

pub mod backfill;
pub mod config;
pub mod materializer;
pub mod multiplexer;
pub mod parity;
pub mod pipeline;
pub mod source;
pub mod summary;

pub use backfill::{
    discover_source_dates, plan_dates, run_backfill, BackfillOptions, BackfillReport, DateOutcome,
};
pub use config::{ConfigError, OutputConfig, RunConfig, RunOptions, SourceSpec, UniverseConfig};
pub use materializer::{Materializer, Routed};
pub use multiplexer::{Multiplexer, ScanError, SourceStats};
pub use parity::{
    verify_date, DataSide, InstrumentParity, Mismatch, ParityReport, VerifyError, VerifyOptions,
};
pub use pipeline::{
    resolve_universe, run_configured_date, run_date, sources_for_date, RunError, RunRequest,
};
pub use source::{FeedSource, FileSource, MemorySource, SourceError, SourceReader};
pub use summary::{BudgetExceeded, RunSummary};
