//! Feed multiplexer: drive every source for a date through the decoder.
//!
//! All sources are opened before any is read, so a missing source fails the
//! date before work is done. Each source is then scanned once, sequentially,
//! in its native order; sources may run in parallel on rayon. Decoded events
//! go to the [`Materializer`] under the source's index.

use chrono::NaiveDateTime;
use quotelab_core::decode::{DecodeError, DecodeErrorKind, Decoder, WireEncoding};
use quotelab_core::domain::InstrumentCode;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::materializer::{Materializer, Routed};
use crate::source::{FeedSource, SourceError, SourceReader};

/// Decode failures logged at `warn` per source before dropping to `debug`.
const WARN_LIMIT: u64 = 5;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Unavailable(#[from] SourceError),

    #[error("scan cancelled")]
    Cancelled,

    #[error("failed to build scan thread pool: {0}")]
    ThreadPool(String),
}

/// Per-source counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub name: String,
    pub encoding: WireEncoding,
    /// Non-blank lines read.
    pub records_seen: u64,
    /// Records for instruments outside the universe.
    pub filtered: u64,
    /// Delimited lines that are neither Trade nor Depth records.
    #[serde(default)]
    pub skipped: u64,
    pub decoded: u64,
    pub failed: u64,
    pub failed_by_kind: BTreeMap<DecodeErrorKind, u64>,
    pub sequence_regressions: u64,
    pub time_regressions: u64,
}

impl SourceStats {
    pub fn new(name: &str, encoding: WireEncoding) -> Self {
        Self {
            name: name.to_string(),
            encoding,
            ..Default::default()
        }
    }

    fn record_failure(&mut self, err: &DecodeError) {
        self.failed += 1;
        *self.failed_by_kind.entry(err.kind()).or_default() += 1;
    }

    pub fn ordering_warnings(&self) -> u64 {
        self.sequence_regressions + self.time_regressions
    }
}

/// Ordering state carried across one source's records.
#[derive(Default)]
struct OrderingCheck {
    last_sequence: Option<u64>,
    last_time: HashMap<InstrumentCode, NaiveDateTime>,
}

impl OrderingCheck {
    fn sequence(&mut self, seq: Option<u64>) -> bool {
        let Some(seq) = seq else {
            return true;
        };
        let in_order = self.last_sequence.map_or(true, |last| seq > last);
        self.last_sequence = Some(seq);
        in_order
    }

    fn time(&mut self, code: &InstrumentCode, time: NaiveDateTime) -> bool {
        match self.last_time.get_mut(code.as_str()) {
            Some(last) => {
                let in_order = time >= *last;
                *last = time;
                in_order
            }
            None => {
                self.last_time.insert(code.clone(), time);
                true
            }
        }
    }
}

pub struct Multiplexer<'a> {
    decoder: Decoder<'a>,
    materializer: &'a Materializer,
    cancel: Option<&'a AtomicBool>,
    concurrent: bool,
    threads: Option<usize>,
}

impl<'a> Multiplexer<'a> {
    pub fn new(decoder: Decoder<'a>, materializer: &'a Materializer) -> Self {
        Self {
            decoder,
            materializer,
            cancel: None,
            concurrent: true,
            threads: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Scan every source once. Stats come back in source order.
    pub fn run(&self, sources: &[Box<dyn FeedSource>]) -> Result<Vec<SourceStats>, ScanError> {
        let readers = sources
            .iter()
            .map(|s| s.open())
            .collect::<Result<Vec<SourceReader>, SourceError>>()?;
        info!(
            date = %self.decoder.date(),
            sources = sources.len(),
            instruments = self.decoder.universe().len(),
            "opened sources"
        );

        // Set by whichever scan fails first so the others stop early.
        let abort = AtomicBool::new(false);
        let jobs: Vec<(usize, &dyn FeedSource, SourceReader)> = sources
            .iter()
            .zip(readers)
            .enumerate()
            .map(|(i, (s, r))| (i, s.as_ref(), r))
            .collect();

        let results: Vec<Result<SourceStats, ScanError>> = if self.concurrent && jobs.len() > 1 {
            let scan_all = || -> Vec<Result<SourceStats, ScanError>> {
                jobs.into_par_iter()
                    .map(|(i, source, reader)| self.scan_one(i, source, reader, &abort))
                    .collect()
            };
            match self.threads {
                Some(n) => rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ScanError::ThreadPool(e.to_string()))?
                    .install(scan_all),
                None => scan_all(),
            }
        } else {
            jobs.into_iter()
                .map(|(i, source, reader)| self.scan_one(i, source, reader, &abort))
                .collect()
        };

        let mut stats = Vec::with_capacity(results.len());
        let mut cancelled = false;
        for result in results {
            match result {
                Ok(s) => stats.push(s),
                Err(ScanError::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
            }
        }
        if cancelled {
            return Err(ScanError::Cancelled);
        }
        Ok(stats)
    }

    fn is_cancelled(&self, abort: &AtomicBool) -> bool {
        abort.load(Ordering::Relaxed) || self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn scan_one(
        &self,
        index: usize,
        source: &dyn FeedSource,
        mut reader: SourceReader,
        abort: &AtomicBool,
    ) -> Result<SourceStats, ScanError> {
        let name = source.name();
        let encoding = source.encoding();
        let mut stats = SourceStats::new(name, encoding);
        let mut ordering = OrderingCheck::default();
        let mut buf = Vec::with_capacity(512);
        let mut line_no: u64 = 0;

        loop {
            if self.is_cancelled(abort) {
                debug!(source = name, line = line_no, "scan stopped");
                return Err(ScanError::Cancelled);
            }

            buf.clear();
            let n = match reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    return Err(ScanError::Unavailable(SourceError::Read {
                        name: name.to_string(),
                        line: line_no + 1,
                        reason: e.to_string(),
                    }));
                }
            };
            if n == 0 {
                break;
            }
            line_no += 1;

            let decoded = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    stats.records_seen += 1;
                    if !self.decoder.is_event_line(encoding, line) {
                        stats.skipped += 1;
                        continue;
                    }
                    self.decoder.decode_line(encoding, line)
                }
                Err(e) => {
                    stats.records_seen += 1;
                    Err(DecodeError::MalformedRecord(format!("not UTF-8: {e}")))
                }
            };

            match decoded {
                Ok(None) => stats.filtered += 1,
                Ok(Some(record)) => {
                    if !ordering.sequence(record.sequence) {
                        stats.sequence_regressions += 1;
                        if stats.sequence_regressions <= WARN_LIMIT {
                            warn!(source = name, line = line_no, seq = ?record.sequence, "sequence number did not increase");
                        }
                    }
                    let event = record.event;
                    if !ordering.time(&event.instrument_code, event.event_time) {
                        stats.time_regressions += 1;
                        if stats.time_regressions <= WARN_LIMIT {
                            warn!(
                                source = name,
                                line = line_no,
                                instrument = event.instrument_code.as_str(),
                                "event time went backwards"
                            );
                        }
                    }
                    match self.materializer.push(index, event) {
                        Routed::Buffered => stats.decoded += 1,
                        Routed::Unrouted => {
                            stats.filtered += 1;
                        }
                    }
                }
                Err(err) => {
                    stats.record_failure(&err);
                    if stats.failed <= WARN_LIMIT {
                        warn!(source = name, line = line_no, kind = %err.kind(), "decode failed: {err}");
                    } else {
                        debug!(source = name, line = line_no, kind = %err.kind(), "decode failed: {err}");
                    }
                }
            }
        }

        info!(
            source = name,
            records = stats.records_seen,
            decoded = stats.decoded,
            filtered = stats.filtered,
            skipped = stats.skipped,
            failed = stats.failed,
            "source exhausted"
        );
        Ok(stats)
    }
}
