// 📜 Calculation History - newest first, capped at 10
//
// Entries are immutable values. History operations never mutate their
// input; the returned History is the authoritative one.

use crate::error::Result;
use crate::pricing::{compute_breakdown, Breakdown, PurityTier};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of entries kept
pub const HISTORY_CAP: usize = 10;

// ============================================================================
// PROVENANCE
// ============================================================================

/// Where the rate used for a calculation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Cached,
    Fixed,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::Cached => "cached",
            Provenance::Fixed => "fixed",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provenance {
    type Err = crate::error::CalculatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(Provenance::Live),
            "cached" => Ok(Provenance::Cached),
            "fixed" => Ok(Provenance::Fixed),
            other => Err(crate::error::CalculatorError::invalid_input(format!(
                "unknown provenance '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// CALCULATION ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationEntry {
    /// Stable identity, also the remote document id
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tier: PurityTier,
    pub grams: Decimal,
    pub rate: Decimal,
    pub base: Decimal,
    pub tax: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
    pub provenance: Provenance,
}

impl CalculationEntry {
    /// Run the pricing formula and capture the result as a new entry.
    pub fn compute(
        tier: PurityTier,
        grams: Decimal,
        rate: Decimal,
        provenance: Provenance,
        timestamp: DateTime<Utc>,
    ) -> Result<(CalculationEntry, Breakdown)> {
        let breakdown = compute_breakdown(rate, grams)?;

        let entry = CalculationEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            tier,
            grams,
            rate,
            base: breakdown.base,
            tax: breakdown.tax,
            fee: breakdown.fee,
            total: breakdown.total,
            provenance,
        };

        Ok((entry, breakdown))
    }

    pub fn breakdown(&self) -> Breakdown {
        Breakdown {
            base: self.base,
            tax: self.tax,
            fee: self.fee,
            total: self.total,
        }
    }
}

// ============================================================================
// HISTORY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<CalculationEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries: newest first, at most HISTORY_CAP.
    pub fn from_entries(mut entries: Vec<CalculationEntry>) -> Self {
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(HISTORY_CAP);
        Self { entries }
    }

    pub fn entries(&self) -> &[CalculationEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&CalculationEntry> {
        self.entries.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&CalculationEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// New history with `entry` in front, oldest evicted past the cap
    pub fn with_entry(&self, entry: CalculationEntry) -> History {
        let mut entries = Vec::with_capacity(HISTORY_CAP);
        entries.push(entry);
        entries.extend(self.entries.iter().take(HISTORY_CAP - 1).cloned());
        History { entries }
    }

    /// New history without the entry `id`
    pub fn without(&self, id: &str) -> History {
        History {
            entries: self.entries.iter().filter(|e| e.id != id).cloned().collect(),
        }
    }

    pub fn into_entries(self) -> Vec<CalculationEntry> {
        self.entries
    }
}

pub fn append_history(history: &History, entry: CalculationEntry) -> History {
    history.with_entry(entry)
}

pub fn clear_history() -> History {
    History::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn entry_at(minutes: i64) -> CalculationEntry {
        let ts = DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes);
        CalculationEntry::compute(
            PurityTier::Karat24,
            dec!(1),
            dec!(11615.24),
            Provenance::Fixed,
            ts,
        )
        .unwrap()
        .0
    }

    #[test]
    fn test_compute_entry_carries_breakdown() {
        let (entry, breakdown) = CalculationEntry::compute(
            PurityTier::Karat24,
            dec!(10),
            dec!(11615.24),
            Provenance::Live,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(entry.total, dec!(131252.212));
        assert_eq!(entry.breakdown(), breakdown);
        assert_eq!(entry.provenance, Provenance::Live);
        assert_eq!(entry.id.len(), 36);
    }

    #[test]
    fn test_compute_entry_rejects_zero_grams() {
        let result = CalculationEntry::compute(
            PurityTier::Karat22,
            Decimal::ZERO,
            dec!(10647.30),
            Provenance::Fixed,
            Utc::now(),
        );
        assert!(result.unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_append_eleven_evicts_oldest() {
        let all: Vec<CalculationEntry> = (0..11).map(entry_at).collect();

        let mut history = History::new();
        for entry in &all {
            history = append_history(&history, entry.clone());
        }

        assert_eq!(history.len(), HISTORY_CAP);
        // Newest first: entries 10, 9, ..., 1
        let expected: Vec<&str> = all.iter().rev().take(10).map(|e| e.id.as_str()).collect();
        let actual: Vec<&str> = history.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(actual, expected);
        assert!(history.find(&all[0].id).is_none());
    }

    #[test]
    fn test_append_does_not_mutate_input() {
        let first = History::new().with_entry(entry_at(0));
        let second = append_history(&first, entry_at(1));

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_clear_history_is_empty() {
        assert!(clear_history().is_empty());
    }

    #[test]
    fn test_without_removes_only_target() {
        let a = entry_at(0);
        let b = entry_at(1);
        let history = History::new().with_entry(a.clone()).with_entry(b.clone());

        let trimmed = history.without(&a.id);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed.entries()[0].id, b.id);

        let unchanged = history.without("no-such-id");
        assert_eq!(unchanged, history);
    }

    #[test]
    fn test_from_entries_sorts_and_caps() {
        let entries: Vec<CalculationEntry> = (0..14).map(entry_at).collect();
        let history = History::from_entries(entries.clone());

        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history.entries()[0].id, entries[13].id);
        assert_eq!(history.entries()[9].id, entries[4].id);
    }

    #[test]
    fn test_history_json_is_array() {
        let history = History::new().with_entry(entry_at(0));
        let json = serde_json::to_value(&history).unwrap();

        assert!(json.is_array());
        assert_eq!(json[0]["tier"], "24K");
        assert_eq!(json[0]["provenance"], "fixed");
    }
}
