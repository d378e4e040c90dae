//! Run summary: per-source counters, error budget, JSON and CSV export.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use quotelab_core::decode::DecodeErrorKind;
use quotelab_core::domain::InstrumentCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::multiplexer::SourceStats;

/// Decode errors exceeded the configured budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExceeded {
    pub failed: u64,
    pub budget: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub previous_date: Option<NaiveDate>,
    pub universe_size: usize,
    /// Set when the run was restricted to one instrument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentCode>,
    pub sources: Vec<SourceStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_decode_errors: Option<u64>,
    pub files_written: usize,
    pub rows_written: usize,
}

impl RunSummary {
    pub fn records_seen(&self) -> u64 {
        self.sources.iter().map(|s| s.records_seen).sum()
    }

    pub fn decoded(&self) -> u64 {
        self.sources.iter().map(|s| s.decoded).sum()
    }

    pub fn filtered(&self) -> u64 {
        self.sources.iter().map(|s| s.filtered).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.sources.iter().map(|s| s.skipped).sum()
    }

    pub fn failed(&self) -> u64 {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn ordering_warnings(&self) -> u64 {
        self.sources.iter().map(SourceStats::ordering_warnings).sum()
    }

    /// Decode failures by kind, summed across sources.
    pub fn failed_by_kind(&self) -> BTreeMap<DecodeErrorKind, u64> {
        let mut totals = BTreeMap::new();
        for source in &self.sources {
            for (kind, n) in &source.failed_by_kind {
                *totals.entry(*kind).or_insert(0) += n;
            }
        }
        totals
    }

    /// `Err` when the total decode failures exceed the budget.
    pub fn check_budget(&self) -> Result<(), BudgetExceeded> {
        match self.max_decode_errors {
            Some(budget) if self.failed() > budget => Err(BudgetExceeded {
                failed: self.failed(),
                budget,
            }),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize RunSummary to JSON")
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("failed to serialize RunSummary")
    }

    /// Per-source counters as CSV, one row per source plus a `total` row.
    ///
    /// Columns: source, encoding, records_seen, filtered, decoded, failed,
    /// sequence_regressions, time_regressions, skipped, then one `failed_<kind>`
    /// column per decode error kind that occurred.
    pub fn export_sources_csv(&self) -> Result<String> {
        let kinds: Vec<DecodeErrorKind> = self.failed_by_kind().into_keys().collect();
        let mut wtr = csv::Writer::from_writer(vec![]);

        let mut header: Vec<String> = [
            "source",
            "encoding",
            "records_seen",
            "filtered",
            "decoded",
            "failed",
            "sequence_regressions",
            "time_regressions",
            "skipped",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();
        header.extend(kinds.iter().map(|k| format!("failed_{k}")));
        wtr.write_record(&header)?;

        let row = |name: &str, encoding: &str, s: &SourceStats, by_kind: &BTreeMap<DecodeErrorKind, u64>| {
            let mut record = vec![
                name.to_string(),
                encoding.to_string(),
                s.records_seen.to_string(),
                s.filtered.to_string(),
                s.decoded.to_string(),
                s.failed.to_string(),
                s.sequence_regressions.to_string(),
                s.time_regressions.to_string(),
                s.skipped.to_string(),
            ];
            record.extend(
                kinds
                    .iter()
                    .map(|k| by_kind.get(k).copied().unwrap_or(0).to_string()),
            );
            record
        };

        for s in &self.sources {
            let encoding = serde_json::to_value(s.encoding)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            wtr.write_record(row(&s.name, &encoding, s, &s.failed_by_kind))?;
        }
        let total = SourceStats {
            records_seen: self.records_seen(),
            filtered: self.filtered(),
            skipped: self.skipped(),
            decoded: self.decoded(),
            failed: self.failed(),
            sequence_regressions: self.sources.iter().map(|s| s.sequence_regressions).sum(),
            time_regressions: self.sources.iter().map(|s| s.time_regressions).sum(),
            ..Default::default()
        };
        wtr.write_record(row("total", "", &total, &self.failed_by_kind()))?;

        let data = wtr.into_inner().context("failed to flush CSV writer")?;
        String::from_utf8(data).context("CSV output is not valid UTF-8")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Date:        {}", self.date)?;
        match self.previous_date {
            Some(prev) => writeln!(f, "Previous:    {prev}")?,
            None => writeln!(f, "Previous:    (none)")?,
        }
        writeln!(f, "Universe:    {} instruments", self.universe_size)?;
        if let Some(code) = &self.instrument {
            writeln!(f, "Restricted:  {code}")?;
        }
        for s in &self.sources {
            writeln!(
                f,
                "  {:<10} seen {:>10}  decoded {:>10}  filtered {:>10}  failed {:>6}  seq-regr {:>4}  time-regr {:>4}",
                s.name,
                s.records_seen,
                s.decoded,
                s.filtered,
                s.failed,
                s.sequence_regressions,
                s.time_regressions
            )?;
        }
        if self.skipped() > 0 {
            writeln!(f, "  skipped {} non-event lines", self.skipped())?;
        }
        for (kind, n) in self.failed_by_kind() {
            writeln!(f, "  failed {kind}: {n}")?;
        }
        write!(
            f,
            "Wrote {} files, {} rows",
            self.files_written, self.rows_written
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotelab_core::decode::WireEncoding;

    fn stats(name: &str, failed: u64) -> SourceStats {
        let mut s = SourceStats::new(name, WireEncoding::Delimited);
        s.records_seen = 100;
        s.decoded = 90 - failed;
        s.filtered = 10;
        s.failed = failed;
        if failed > 0 {
            s.failed_by_kind.insert(DecodeErrorKind::MalformedLevel, failed);
        }
        s
    }

    fn summary(budget: Option<u64>) -> RunSummary {
        RunSummary {
            date: NaiveDate::from_ymd_opt(2025, 11, 19).unwrap(),
            previous_date: NaiveDate::from_ymd_opt(2025, 11, 18),
            universe_size: 12,
            instrument: None,
            sources: vec![stats("otc", 3), stats("tse", 2)],
            max_decode_errors: budget,
            files_written: 0,
            rows_written: 0,
        }
    }

    #[test]
    fn totals_sum_sources() {
        let s = summary(None);
        assert_eq!(s.records_seen(), 200);
        assert_eq!(s.failed(), 5);
        assert_eq!(s.failed_by_kind().get(&DecodeErrorKind::MalformedLevel), Some(&5));
    }

    #[test]
    fn budget_is_inclusive() {
        assert!(summary(None).check_budget().is_ok());
        assert!(summary(Some(5)).check_budget().is_ok());
        assert_eq!(
            summary(Some(4)).check_budget(),
            Err(BudgetExceeded { failed: 5, budget: 4 })
        );
    }

    #[test]
    fn csv_has_a_row_per_source_and_a_total() {
        let csv = summary(None).export_sources_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("failed_malformed_level"));
        assert!(lines[1].starts_with("otc,delimited,100,10,87,3"));
        assert!(lines[3].starts_with("total,,200,20,175,5"));
    }

    #[test]
    fn json_roundtrip() {
        let s = summary(Some(10));
        let parsed: RunSummary = serde_json::from_str(&s.to_json().unwrap()).unwrap();
        assert_eq!(parsed, s);
    }
}
