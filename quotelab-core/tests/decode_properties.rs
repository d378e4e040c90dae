//! Property tests for the record decoder.
//!
//! Uses proptest to verify:
//! 1. Determinism: the same line decodes to the same value every time
//! 2. Price scaling: raw / 10000 within 1e-6
//! 3. Code normalization: padding never reaches the event
//! 4. Time reconstruction: packed HHMMSSffffff round-trips
//! 5. Encoding parity: delimited and structured forms decode equal
//! 6. Universe filter: out-of-universe records are dropped in both encodings
//!    whatever their remaining fields hold

use chrono::{NaiveDate, Timelike};
use proptest::prelude::*;
use quotelab_core::data::InstrumentUniverse;
use quotelab_core::decode::{Decoder, WireEncoding};
use quotelab_core::domain::{InstrumentCode, PackedTime, MAX_DEPTH_LEVELS};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
}

fn universe() -> InstrumentUniverse {
    InstrumentUniverse::new(date(), ["2355", "1234", "6598"].map(InstrumentCode::new))
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_code() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["2355", "1234", "6598"])
}

fn arb_padding() -> impl Strategy<Value = String> {
    (0usize..4).prop_map(|n| " ".repeat(n))
}

fn arb_packed_time() -> impl Strategy<Value = (u32, u32, u32, u32)> {
    (0u32..24, 0u32..60, 0u32..60, 0u32..1_000_000)
}

fn pack((h, m, s, us): (u32, u32, u32, u32)) -> u64 {
    u64::from(h) * 10_000_000_000 + u64::from(m) * 100_000_000 + u64::from(s) * 1_000_000 + u64::from(us)
}

fn arb_levels() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((1u64..10_000_000, 0u64..100_000), 0..=MAX_DEPTH_LEVELS)
}

fn delimited_depth(code: &str, time: u64, bids: &[(u64, u64)], asks: &[(u64, u64)], seq: u64) -> String {
    let side = |marker: &str, levels: &[(u64, u64)]| {
        let mut parts = vec![format!("{marker}{}", levels.len())];
        parts.extend(levels.iter().map(|(p, v)| format!("{p}*{v}")));
        parts.join(",")
    };
    format!(
        "Depth,{code},{time},{},{},{seq}",
        side("BID:", bids),
        side("ASK:", asks)
    )
}

fn structured_depth(code: &str, time: u64, bids: &[(u64, u64)], asks: &[(u64, u64)], seq: u64) -> String {
    let pairs = |levels: &[(u64, u64)]| {
        levels
            .iter()
            .map(|(p, v)| format!("[{p},{v}]"))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"kind":"Depth","code":"{code}","time":{time},"bids":[{}],"asks":[{}],"seq":{seq}}}"#,
        pairs(bids),
        pairs(asks)
    )
}

proptest! {
    #[test]
    fn decoding_is_deterministic(
        code in arb_code(),
        pad in arb_padding(),
        t in arb_packed_time(),
        bids in arb_levels(),
        asks in arb_levels(),
        seq in any::<u32>(),
    ) {
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let line = delimited_depth(&format!("{code}{pad}"), pack(t), &bids, &asks, u64::from(seq));
        let first = decoder.decode_line(WireEncoding::Delimited, &line);
        let second = decoder.decode_line(WireEncoding::Delimited, &line);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn trade_price_is_raw_over_scale(raw in 0u64..100_000_000, volume in 0u64..1_000_000) {
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let line = format!("Trade,2355,90000000000,1,{raw},{volume},{volume}");
        let rec = decoder.decode_line(WireEncoding::Delimited, &line).unwrap().unwrap();
        let trade = rec.event.trade().unwrap();
        prop_assert!((trade.price - raw as f64 / 10_000.0).abs() < 1e-6);
        prop_assert_eq!(trade.last_volume, volume);
    }

    #[test]
    fn padded_codes_normalize(code in arb_code(), left in arb_padding(), right in arb_padding()) {
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let line = format!("Trade,{left}{code}{right},90000000000,0,1,1,1");
        let rec = decoder.decode_line(WireEncoding::Delimited, &line).unwrap().unwrap();
        prop_assert_eq!(rec.event.instrument_code.as_str(), code);
    }

    #[test]
    fn packed_time_reconstructs(t in arb_packed_time()) {
        let (h, m, s, us) = t;
        let instant = PackedTime::new(pack(t)).unwrap().on(date()).unwrap();
        prop_assert_eq!(instant.date(), date());
        prop_assert_eq!(
            (instant.hour(), instant.minute(), instant.second(), instant.nanosecond() / 1_000),
            (h, m, s, us)
        );
    }

    #[test]
    fn out_of_range_hours_are_rejected(h in 24u64..100, rest in 0u64..10_000_000_000) {
        prop_assert!(PackedTime::new(h * 10_000_000_000 + rest).is_err());
    }

    #[test]
    fn encodings_agree_on_depth(
        code in arb_code(),
        t in arb_packed_time(),
        bids in arb_levels(),
        asks in arb_levels(),
        seq in any::<u32>(),
    ) {
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let time = pack(t);
        let line = delimited_depth(code, time, &bids, &asks, u64::from(seq));
        let json = structured_depth(code, time, &bids, &asks, u64::from(seq));

        let a = decoder.decode_line(WireEncoding::Delimited, &line).unwrap().unwrap();
        let b = decoder.decode_line(WireEncoding::Structured, &json).unwrap().unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn codes_outside_universe_are_filtered(code in "[0-9]{4}", tail in "[ -~]{0,40}") {
        prop_assume!(!["2355", "1234", "6598"].contains(&code.as_str()));
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let line = format!("Trade,{code},{tail}");
        prop_assert_eq!(decoder.decode_line(WireEncoding::Delimited, &line), Ok(None));
    }

    #[test]
    fn structured_codes_outside_universe_are_filtered(
        code in "[0-9]{4}",
        time in "[a-z0-9:]{0,12}",
        bids in "[a-z]{0,8}",
    ) {
        prop_assume!(!["2355", "1234", "6598"].contains(&code.as_str()));
        let u = universe();
        let decoder = Decoder::new(date(), &u);
        let json = format!(r#"{{"kind":"Depth","code":"{code}","time":"{time}","bids":"{bids}"}}"#);
        prop_assert_eq!(decoder.decode_line(WireEncoding::Structured, &json), Ok(None));
    }
}
