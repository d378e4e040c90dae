//! Per-instrument event buffers and the flush to the instrument-day store.
//!
//! The arena is built once per run from the universe: one independently
//! locked buffer per instrument, each holding one segment per source. Scans
//! push into their own segment, so concurrent sources never interleave and
//! the flushed order is "arrival order per source, sources in declaration
//! order" regardless of thread scheduling.

use chrono::NaiveDate;
use quotelab_core::data::{InstrumentDayStore, InstrumentUniverse, ManifestEntry, StoreError};
use quotelab_core::domain::{CanonicalEvent, InstrumentCode};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct InstrumentBuffer {
    segments: Vec<Vec<CanonicalEvent>>,
}

impl InstrumentBuffer {
    fn with_sources(source_count: usize) -> Self {
        Self {
            segments: vec![Vec::new(); source_count],
        }
    }

    fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    fn drain_ordered(&mut self) -> Vec<CanonicalEvent> {
        let mut events = Vec::with_capacity(self.len());
        for segment in &mut self.segments {
            events.append(segment);
        }
        events
    }
}

/// Result of pushing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Buffered,
    /// The instrument has no buffer. Cannot happen for events decoded
    /// against the same universe the arena was built from.
    Unrouted,
}

#[derive(Debug)]
pub struct Materializer {
    buffers: HashMap<InstrumentCode, Mutex<InstrumentBuffer>>,
    source_count: usize,
}

fn lock(buffer: &Mutex<InstrumentBuffer>) -> MutexGuard<'_, InstrumentBuffer> {
    // A panicking scan only ever leaves a fully pushed event behind.
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Materializer {
    pub fn new(universe: &InstrumentUniverse, source_count: usize) -> Self {
        let buffers = universe
            .codes()
            .map(|code| {
                (
                    code.clone(),
                    Mutex::new(InstrumentBuffer::with_sources(source_count)),
                )
            })
            .collect();
        Self {
            buffers,
            source_count,
        }
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    /// Append `event` to its instrument's segment for `source_index`.
    pub fn push(&self, source_index: usize, event: CanonicalEvent) -> Routed {
        match self.buffers.get(event.instrument_code.as_str()) {
            Some(buffer) if source_index < self.source_count => {
                lock(buffer).segments[source_index].push(event);
                Routed::Buffered
            }
            _ => Routed::Unrouted,
        }
    }

    /// Buffered event count for one instrument.
    pub fn buffered(&self, code: &str) -> usize {
        self.buffers.get(code).map_or(0, |b| lock(b).len())
    }

    pub fn total_buffered(&self) -> usize {
        self.buffers.values().map(|b| lock(b).len()).sum()
    }

    /// Instruments with at least one buffered event, sorted.
    pub fn populated_instruments(&self) -> Vec<InstrumentCode> {
        let mut codes: Vec<InstrumentCode> = self
            .buffers
            .iter()
            .filter(|(_, b)| lock(b).len() > 0)
            .map(|(code, _)| code.clone())
            .collect();
        codes.sort();
        codes
    }

    /// Snapshot of one instrument's events in flush order.
    pub fn events(&self, code: &str) -> Vec<CanonicalEvent> {
        self.buffers.get(code).map_or_else(Vec::new, |b| {
            lock(b).segments.iter().flatten().cloned().collect()
        })
    }

    /// Write one file per non-empty instrument, in code order.
    ///
    /// Instruments with no events produce no file. Each file is published
    /// atomically; on error the files already written stay in place and the
    /// rest of the arena is dropped with `self`.
    pub fn flush(
        self,
        store: &InstrumentDayStore,
        date: NaiveDate,
    ) -> Result<Vec<ManifestEntry>, StoreError> {
        let mut buffers: Vec<(InstrumentCode, InstrumentBuffer)> = self
            .buffers
            .into_iter()
            .map(|(code, buffer)| (code, buffer.into_inner().unwrap_or_else(PoisonError::into_inner)))
            .filter(|(_, buffer)| buffer.len() > 0)
            .collect();
        buffers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut written = Vec::with_capacity(buffers.len());
        for (code, mut buffer) in buffers {
            let events = buffer.drain_ordered();
            written.push(store.write(date, &code, &events)?);
        }
        info!(%date, files = written.len(), "flushed instrument-day files");
        Ok(written)
    }

    /// Drop every buffered event without writing anything.
    pub fn discard(self) -> usize {
        let dropped = self.total_buffered();
        debug!(events = dropped, "discarded unflushed buffers");
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use quotelab_core::domain::{EventBody, TradeFields, TradeFlag};
    use rayon::prelude::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
    }

    fn at(second: u32) -> NaiveDateTime {
        date().and_hms_opt(9, 0, second).unwrap()
    }

    fn trade(code: &str, second: u32, volume: u64) -> CanonicalEvent {
        CanonicalEvent {
            instrument_code: InstrumentCode::new(code),
            event_time: at(second),
            body: EventBody::Trade(TradeFields {
                flag: TradeFlag::Continuous,
                price: 10.0,
                last_volume: volume,
                cumulative_volume: volume,
            }),
        }
    }

    fn universe() -> InstrumentUniverse {
        InstrumentUniverse::new(date(), ["2355", "1234", "6598"].map(InstrumentCode::new))
    }

    #[test]
    fn arrival_order_is_kept_without_sorting() {
        let m = Materializer::new(&universe(), 1);
        m.push(0, trade("2355", 30, 1));
        m.push(0, trade("2355", 10, 2));
        m.push(0, trade("2355", 20, 3));
        let volumes: Vec<u64> = m
            .events("2355")
            .iter()
            .map(|e| e.trade().unwrap().last_volume)
            .collect();
        assert_eq!(volumes, vec![1, 2, 3]);
    }

    #[test]
    fn segments_concatenate_in_source_order() {
        let m = Materializer::new(&universe(), 2);
        m.push(1, trade("2355", 1, 100));
        m.push(0, trade("2355", 5, 1));
        m.push(1, trade("2355", 2, 101));
        m.push(0, trade("2355", 6, 2));
        let volumes: Vec<u64> = m
            .events("2355")
            .iter()
            .map(|e| e.trade().unwrap().last_volume)
            .collect();
        assert_eq!(volumes, vec![1, 2, 100, 101]);
    }

    #[test]
    fn concurrent_pushes_are_deterministic() {
        let m = Materializer::new(&universe(), 4);
        (0..4usize).into_par_iter().for_each(|source| {
            for i in 0..500u64 {
                let code = ["2355", "1234", "6598"][i as usize % 3];
                m.push(source, trade(code, 0, source as u64 * 1000 + i));
            }
        });
        let volumes: Vec<u64> = m
            .events("1234")
            .iter()
            .map(|e| e.trade().unwrap().last_volume)
            .collect();
        let expected: Vec<u64> = (0..4u64)
            .flat_map(|s| (0..500u64).filter(|i| i % 3 == 1).map(move |i| s * 1000 + i))
            .collect();
        assert_eq!(volumes, expected);
    }

    #[test]
    fn unknown_instrument_is_unrouted() {
        let m = Materializer::new(&universe(), 1);
        assert_eq!(m.push(0, trade("9999", 0, 1)), Routed::Unrouted);
        assert_eq!(m.push(3, trade("2355", 0, 1)), Routed::Unrouted);
        assert_eq!(m.total_buffered(), 0);
    }

    #[test]
    fn flush_skips_empty_instruments() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentDayStore::new(dir.path());
        let m = Materializer::new(&universe(), 1);
        m.push(0, trade("2355", 0, 1));
        m.push(0, trade("6598", 0, 1));
        m.push(0, trade("2355", 1, 2));
        assert_eq!(
            m.populated_instruments(),
            vec![InstrumentCode::new("2355"), InstrumentCode::new("6598")]
        );

        let written = m.flush(&store, date()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].instrument_code.as_str(), "2355");
        assert_eq!(written[0].rows, 2);
        assert!(!store.exists(date(), "1234"));
    }

    #[test]
    fn discard_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = InstrumentDayStore::new(dir.path());
        let m = Materializer::new(&universe(), 1);
        m.push(0, trade("2355", 0, 1));
        assert_eq!(m.discard(), 1);
        assert!(store.list_instruments(date()).unwrap().is_empty());
    }
}
