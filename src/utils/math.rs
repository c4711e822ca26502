use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds to two decimals using the exact binary value and half-to-even,
/// so that report percentages are stable across platforms.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    Decimal::from_f64_retain(value)
        .or_else(|| Decimal::from_f64(value))
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
}

/// `numerator / denominator * 100`, rounded; `0.0` for an empty denominator.
pub fn pct(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_two_places() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(50.0), 50.0);
    }

    #[test]
    fn uses_exact_binary_value_for_ties() {
        // 1.005 is stored as 1.00499999999999989...
        assert_eq!(round2(1.005), 1.0);
        // 0.125 is exact, so half-to-even applies.
        assert_eq!(round2(0.125), 0.12);
    }

    #[test]
    fn pct_handles_empty_denominator() {
        assert_eq!(pct(3, 0), 0.0);
        assert_eq!(pct(2, 6), 33.33);
        assert_eq!(pct(1, 1), 100.0);
    }
}
