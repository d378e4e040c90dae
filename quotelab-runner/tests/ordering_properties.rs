//! Property tests for run-level invariants.
//!
//! 1. Flushed order is "arrival order per source, sources in declaration
//!    order" for any interleaving of scans
//! 2. Sequential and concurrent multiplexing buffer identical events
//! 3. The error budget fails a run iff failures exceed it

use chrono::NaiveDate;
use proptest::prelude::*;
use quotelab_core::data::InstrumentUniverse;
use quotelab_core::decode::{Decoder, WireEncoding};
use quotelab_core::domain::{CanonicalEvent, EventBody, InstrumentCode, TradeFields, TradeFlag};
use quotelab_runner::{FeedSource, Materializer, MemorySource, Multiplexer, RunSummary, SourceStats};

const CODES: [&str; 3] = ["2355", "1234", "6598"];

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
}

fn universe() -> InstrumentUniverse {
    InstrumentUniverse::new(date(), CODES.map(InstrumentCode::new))
}

fn trade(code: &str, volume: u64) -> CanonicalEvent {
    CanonicalEvent {
        instrument_code: InstrumentCode::new(code),
        event_time: date().and_hms_opt(9, 0, 0).unwrap(),
        body: EventBody::Trade(TradeFields {
            flag: TradeFlag::Continuous,
            price: 1.0,
            last_volume: volume,
            cumulative_volume: volume,
        }),
    }
}

fn volumes(events: &[CanonicalEvent]) -> Vec<u64> {
    events.iter().filter_map(|e| e.trade()).map(|t| t.last_volume).collect()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// A push schedule: (source index, instrument index) per step.
fn arb_schedule() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0usize..3, 0usize..CODES.len()), 0..200)
}

fn arb_feed() -> impl Strategy<Value = Vec<(usize, u32)>> {
    prop::collection::vec((0usize..CODES.len(), 0u32..1_000_000), 0..100)
}

fn feed_lines(feed: &[(usize, u32)], offset: u64) -> Vec<String> {
    feed.iter()
        .enumerate()
        .map(|(i, (code, micros))| {
            format!(
                "Trade,{},{},1,100000,{},1",
                CODES[*code],
                90_000_000_000u64 + u64::from(*micros),
                offset + i as u64
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn flush_order_is_source_major(schedule in arb_schedule()) {
        let m = Materializer::new(&universe(), 3);
        for (step, (source, code)) in schedule.iter().enumerate() {
            m.push(*source, trade(CODES[*code], step as u64));
        }
        for (ci, code) in CODES.iter().enumerate() {
            let expected: Vec<u64> = (0..3)
                .flat_map(|source| {
                    schedule
                        .iter()
                        .enumerate()
                        .filter(move |(_, (s, c))| *s == source && *c == ci)
                        .map(|(step, _)| step as u64)
                })
                .collect();
            prop_assert_eq!(volumes(&m.events(code)), expected);
        }
    }

    #[test]
    fn concurrency_does_not_change_buffers(a in arb_feed(), b in arb_feed()) {
        let lines_a = feed_lines(&a, 0);
        let lines_b = feed_lines(&b, 10_000);
        let refs_a: Vec<&str> = lines_a.iter().map(String::as_str).collect();
        let refs_b: Vec<&str> = lines_b.iter().map(String::as_str).collect();
        let sources: Vec<Box<dyn FeedSource>> = vec![
            Box::new(MemorySource::from_lines("otc", WireEncoding::Delimited, &refs_a)),
            Box::new(MemorySource::from_lines("tse", WireEncoding::Delimited, &refs_b)),
        ];
        let u = universe();
        let scan = |concurrent: bool| {
            let m = Materializer::new(&u, 2);
            let stats = Multiplexer::new(Decoder::new(date(), &u), &m)
                .concurrent(concurrent)
                .run(&sources)
                .unwrap();
            let events: Vec<Vec<CanonicalEvent>> = CODES.iter().map(|c| m.events(c)).collect();
            (stats, events)
        };
        let (seq_stats, seq_events) = scan(false);
        let (par_stats, par_events) = scan(true);
        prop_assert_eq!(seq_stats, par_stats);
        prop_assert_eq!(seq_events, par_events);
    }

    #[test]
    fn budget_fails_iff_exceeded(failed in 0u64..50, budget in prop::option::of(0u64..50)) {
        let mut stats = SourceStats::new("otc", WireEncoding::Delimited);
        stats.failed = failed;
        let summary = RunSummary {
            date: date(),
            previous_date: None,
            universe_size: 0,
            instrument: None,
            sources: vec![stats],
            max_decode_errors: budget,
            files_written: 0,
            rows_written: 0,
        };
        let exceeded = budget.is_some_and(|b| failed > b);
        prop_assert_eq!(summary.check_budget().is_err(), exceeded);
    }
}
