// src/services/mod.rs

pub mod attendance;
pub mod bonuses;
pub mod config;
pub mod payroll;

use rust_decimal::{Decimal, RoundingStrategy};

/// Two-decimal rounding, half away from zero. Every hour or currency figure
/// that leaves a computation goes through this.
pub(crate) fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round2_is_half_away_from_zero() {
        assert_eq!(round2(dec!(1.005)), dec!(1.01));
        assert_eq!(round2(dec!(-1.005)), dec!(-1.01));
        assert_eq!(round2(dec!(7.333333)), dec!(7.33));
        assert_eq!(round2(dec!(2.675)), dec!(2.68));
    }
}
