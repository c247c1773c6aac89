// 💰 Pricing Engine - rate × grams + GST + making charges
//
// Everything in here is pure. Amounts are rust_decimal so the breakdown
// keeps full precision; only the display values are rounded.

use crate::error::{CalculatorError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// GST on the base price
pub const TAX_RATE: Decimal = dec!(0.03);

/// Making charges on the base price
pub const MAKING_RATE: Decimal = dec!(0.10);

/// Grams in one troy ounce
pub const GRAMS_PER_TROY_OUNCE: Decimal = dec!(31.1035);

/// Decimal places used for display and for derived per-gram rates
pub const DISPLAY_DP: u32 = 2;

// ============================================================================
// PURITY TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PurityTier {
    #[serde(rename = "24K")]
    Karat24,
    #[serde(rename = "22K")]
    Karat22,
    #[serde(rename = "18K")]
    Karat18,
}

impl PurityTier {
    pub const ALL: [PurityTier; 3] = [PurityTier::Karat24, PurityTier::Karat22, PurityTier::Karat18];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurityTier::Karat24 => "24K",
            PurityTier::Karat22 => "22K",
            PurityTier::Karat18 => "18K",
        }
    }

    /// Fraction of pure gold by weight
    pub fn purity(&self) -> Decimal {
        match self {
            PurityTier::Karat24 => dec!(0.999),
            PurityTier::Karat22 => dec!(0.916),
            PurityTier::Karat18 => dec!(0.750),
        }
    }

    pub fn next(&self) -> Self {
        match self {
            PurityTier::Karat24 => PurityTier::Karat22,
            PurityTier::Karat22 => PurityTier::Karat18,
            PurityTier::Karat18 => PurityTier::Karat24,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            PurityTier::Karat24 => PurityTier::Karat18,
            PurityTier::Karat22 => PurityTier::Karat24,
            PurityTier::Karat18 => PurityTier::Karat22,
        }
    }
}

impl Default for PurityTier {
    fn default() -> Self {
        PurityTier::Karat24
    }
}

impl fmt::Display for PurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurityTier {
    type Err = CalculatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "24K" | "24" => Ok(PurityTier::Karat24),
            "22K" | "22" => Ok(PurityTier::Karat22),
            "18K" | "18" => Ok(PurityTier::Karat18),
            other => Err(CalculatorError::invalid_input(format!(
                "unknown purity tier '{}' (expected 24K, 22K or 18K)",
                other
            ))),
        }
    }
}

// ============================================================================
// RATE TABLE
// ============================================================================

/// Per-gram INR rates by tier. Every rate present is strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<PurityTier, Decimal>", into = "BTreeMap<PurityTier, Decimal>")]
pub struct RateTable {
    rates: BTreeMap<PurityTier, Decimal>,
}

impl RateTable {
    pub fn new(rates: BTreeMap<PurityTier, Decimal>) -> Result<Self> {
        for (tier, rate) in &rates {
            if *rate <= Decimal::ZERO {
                return Err(CalculatorError::invalid_input(format!(
                    "rate for {} must be positive, got {}",
                    tier, rate
                )));
            }
        }
        Ok(Self { rates })
    }

    /// Hardcoded last-resort table
    pub fn fixed() -> Self {
        let rates = BTreeMap::from([
            (PurityTier::Karat24, dec!(11615.24)),
            (PurityTier::Karat22, dec!(10647.30)),
            (PurityTier::Karat18, dec!(8713.65)),
        ]);
        Self { rates }
    }

    /// Derive every tier from a spot price quoted per troy ounce of pure gold.
    pub fn from_ounce_price(price_per_ounce: Decimal) -> Result<Self> {
        if price_per_ounce <= Decimal::ZERO {
            return Err(CalculatorError::invalid_input(format!(
                "ounce price must be positive, got {}",
                price_per_ounce
            )));
        }

        let per_gram = price_per_ounce / GRAMS_PER_TROY_OUNCE;
        let rates = PurityTier::ALL
            .iter()
            .map(|tier| (*tier, round_display(per_gram * tier.purity())))
            .collect();

        Self::new(rates)
    }

    pub fn rate(&self, tier: PurityTier) -> Option<Decimal> {
        self.rates.get(&tier).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PurityTier, Decimal)> + '_ {
        self.rates.iter().map(|(tier, rate)| (*tier, *rate))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl TryFrom<BTreeMap<PurityTier, Decimal>> for RateTable {
    type Error = CalculatorError;

    fn try_from(rates: BTreeMap<PurityTier, Decimal>) -> Result<Self> {
        RateTable::new(rates)
    }
}

impl From<RateTable> for BTreeMap<PurityTier, Decimal> {
    fn from(table: RateTable) -> Self {
        table.rates
    }
}

// ============================================================================
// BREAKDOWN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub base: Decimal,
    pub tax: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
}

impl Breakdown {
    /// Display values, 2 decimal places
    pub fn rounded(&self) -> Breakdown {
        Breakdown {
            base: round_display(self.base),
            tax: round_display(self.tax),
            fee: round_display(self.fee),
            total: round_display(self.total),
        }
    }
}

/// base = rate × grams, tax = 3% of base, fee = 10% of base.
pub fn compute_breakdown(rate: Decimal, grams: Decimal) -> Result<Breakdown> {
    if rate <= Decimal::ZERO {
        return Err(CalculatorError::invalid_input(format!(
            "rate must be positive, got {}",
            rate
        )));
    }
    if grams <= Decimal::ZERO {
        return Err(CalculatorError::invalid_input(
            "please enter a valid gold weight",
        ));
    }

    let too_large = || CalculatorError::invalid_input("gold weight is too large");
    let base = rate.checked_mul(grams).ok_or_else(too_large)?;
    let tax = base.checked_mul(TAX_RATE).ok_or_else(too_large)?;
    let fee = base.checked_mul(MAKING_RATE).ok_or_else(too_large)?;
    let total = base
        .checked_add(tax)
        .and_then(|sum| sum.checked_add(fee))
        .ok_or_else(too_large)?;

    Ok(Breakdown { base, tax, fee, total })
}

/// Parse a user-entered weight in grams.
pub fn parse_grams(input: &str) -> Result<Decimal> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CalculatorError::invalid_input(
            "please enter gold weight in grams",
        ));
    }

    let grams = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| CalculatorError::invalid_input("please enter a valid gold weight"))?;

    if grams <= Decimal::ZERO {
        return Err(CalculatorError::invalid_input(
            "please enter a valid gold weight",
        ));
    }

    Ok(grams)
}

pub fn round_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Render an amount with two decimals and Indian digit grouping (12,34,567.89).
pub fn format_inr(amount: Decimal) -> String {
    let rounded = round_display(amount);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let grouped = if int_part.len() <= 3 {
        int_part.to_string()
    } else {
        let (head, last_three) = int_part.split_at(int_part.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 0 {
            let start = end.saturating_sub(2);
            groups.push(&head[start..end]);
            end = start;
        }
        groups.reverse();
        format!("{},{}", groups.join(","), last_three)
    };

    if negative {
        format!("-{}.{}", grouped, frac_part)
    } else {
        format!("{}.{}", grouped, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_breakdown_24k_ten_grams() {
        let breakdown = compute_breakdown(dec!(11615.24), dec!(10)).unwrap();

        assert_eq!(breakdown.base, dec!(116152.40));
        assert_eq!(breakdown.tax, dec!(3484.572));
        assert_eq!(breakdown.fee, dec!(11615.24));
        assert_eq!(breakdown.total, dec!(131252.212));

        let shown = breakdown.rounded();
        assert_eq!(shown.total, dec!(131252.21));
        assert_eq!(shown.tax, dec!(3484.57));
    }

    #[test]
    fn test_breakdown_rejects_bad_inputs() {
        assert!(compute_breakdown(dec!(11615.24), Decimal::ZERO).unwrap_err().is_invalid_input());
        assert!(compute_breakdown(dec!(11615.24), dec!(-2)).unwrap_err().is_invalid_input());
        assert!(compute_breakdown(Decimal::ZERO, dec!(5)).unwrap_err().is_invalid_input());
        assert!(compute_breakdown(dec!(-1), dec!(5)).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_breakdown_overflowing_total_is_invalid_input() {
        // base fits in a Decimal, base × 1.13 does not
        let grams = parse_grams("6500000000000000000000000").unwrap();
        let err = compute_breakdown(dec!(11615.24), grams).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("too large"));

        let err = compute_breakdown(Decimal::MAX, dec!(2)).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_parse_grams() {
        assert_eq!(parse_grams("10").unwrap(), dec!(10));
        assert_eq!(parse_grams("  2.5 ").unwrap(), dec!(2.5));

        for bad in ["", "   ", "0", "0.00", "-3", "abc", "5g"] {
            let err = parse_grams(bad).unwrap_err();
            assert!(err.is_invalid_input(), "{:?} should be invalid", bad);
        }
    }

    #[test]
    fn test_parse_grams_empty_message() {
        let err = parse_grams("").unwrap_err();
        assert!(err.to_string().contains("enter gold weight in grams"));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("24K".parse::<PurityTier>().unwrap(), PurityTier::Karat24);
        assert_eq!("22k".parse::<PurityTier>().unwrap(), PurityTier::Karat22);
        assert_eq!(" 18 ".parse::<PurityTier>().unwrap(), PurityTier::Karat18);
        assert!("14K".parse::<PurityTier>().is_err());
    }

    #[test]
    fn test_tier_cycle() {
        let mut tier = PurityTier::Karat24;
        for _ in 0..3 {
            tier = tier.next();
        }
        assert_eq!(tier, PurityTier::Karat24);
        assert_eq!(PurityTier::Karat24.previous(), PurityTier::Karat18);
    }

    #[test]
    fn test_fixed_table() {
        let table = RateTable::fixed();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rate(PurityTier::Karat22), Some(dec!(10647.30)));
    }

    #[test]
    fn test_rate_table_rejects_non_positive() {
        let rates = BTreeMap::from([(PurityTier::Karat24, Decimal::ZERO)]);
        assert!(RateTable::new(rates).is_err());
        assert!(RateTable::from_ounce_price(dec!(-5)).is_err());
    }

    #[test]
    fn test_from_ounce_price() {
        // 31.1035 INR per ounce -> 1 INR per gram of pure gold
        let table = RateTable::from_ounce_price(dec!(311035)).unwrap();
        assert_eq!(table.rate(PurityTier::Karat24), Some(dec!(9990.00)));
        assert_eq!(table.rate(PurityTier::Karat22), Some(dec!(9160.00)));
        assert_eq!(table.rate(PurityTier::Karat18), Some(dec!(7500.00)));
    }

    #[test]
    fn test_rate_table_json_shape() {
        let json = serde_json::to_value(RateTable::fixed()).unwrap();
        assert_eq!(json["24K"], "11615.24");
        assert_eq!(json["18K"], "8713.65");

        let back: RateTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, RateTable::fixed());

        let bad = serde_json::json!({"24K": "-1"});
        assert!(serde_json::from_value::<RateTable>(bad).is_err());
    }

    #[test]
    fn test_format_inr() {
        assert_eq!(format_inr(dec!(131252.212)), "1,31,252.21");
        assert_eq!(format_inr(dec!(999)), "999.00");
        assert_eq!(format_inr(dec!(1000)), "1,000.00");
        assert_eq!(format_inr(dec!(11615.24)), "11,615.24");
        assert_eq!(format_inr(dec!(12345678.9)), "1,23,45,678.90");
        assert_eq!(format_inr(dec!(-4500.5)), "-4,500.50");
        assert_eq!(format_inr(Decimal::ZERO), "0.00");
    }

    fn decimal_in(min_units: i64, max_units: i64, scale: u32) -> impl Strategy<Value = Decimal> {
        (min_units..max_units).prop_map(move |units| Decimal::new(units, scale))
    }

    proptest! {
        #[test]
        fn prop_total_is_sum_of_parts(
            rate in decimal_in(1, 5_000_000, 2),
            grams in decimal_in(1, 1_000_000, 3),
        ) {
            let b = compute_breakdown(rate, grams).unwrap();
            prop_assert_eq!(b.total, b.base + b.tax + b.fee);
            prop_assert_eq!(b.tax, b.base * dec!(0.03));
            prop_assert_eq!(b.fee, b.base * dec!(0.10));

            let shown = b.rounded();
            let tolerance = dec!(0.01);
            prop_assert!((shown.tax - dec!(0.03) * b.base).abs() <= tolerance);
            prop_assert!((shown.fee - dec!(0.10) * b.base).abs() <= tolerance);
        }

        #[test]
        fn prop_derived_tiers_are_ordered(price in decimal_in(100_000, 1_000_000_000, 2)) {
            let table = RateTable::from_ounce_price(price).unwrap();
            let r24 = table.rate(PurityTier::Karat24).unwrap_or_default();
            let r22 = table.rate(PurityTier::Karat22).unwrap_or_default();
            let r18 = table.rate(PurityTier::Karat18).unwrap_or_default();
            prop_assert!(r24 >= r22);
            prop_assert!(r22 >= r18);
        }
    }
}
