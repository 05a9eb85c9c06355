//! Fee rate arithmetic.
//!
//! Fee rates are expressed in grains per 1000 virtual bytes. All math
//! uses u128 intermediates to prevent overflow for large fees.

use std::fmt;
use std::ops::Add;

/// Precision denominator: rates are per 1000 virtual bytes.
const KVB: u128 = 1000;

/// A non-negative fee rate in grains per 1000 virtual bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: Self = Self(0);

    /// Rate from an explicit grains-per-kvB value.
    pub fn per_kvb(grains: u64) -> Self {
        Self(grains)
    }

    /// Rate implied by paying `fee` grains for `vsize` virtual bytes.
    pub fn from_fee(fee: u64, vsize: u64) -> Self {
        if vsize == 0 {
            return Self(0);
        }
        let rate = (fee as u128) * KVB / (vsize as u128);
        Self(rate.min(u64::MAX as u128) as u64)
    }

    /// The raw grains-per-kvB value.
    pub fn as_per_kvb(&self) -> u64 {
        self.0
    }

    /// Fee in grains this rate charges for `vsize` virtual bytes.
    ///
    /// Truncates, but never returns zero for a non-zero rate and size, so
    /// a positive floor cannot be met by paying nothing.
    pub fn fee_for(&self, vsize: u64) -> u64 {
        let fee = (self.0 as u128) * (vsize as u128) / KVB;
        let fee = fee.min(u64::MAX as u128) as u64;
        if fee == 0 && vsize != 0 && self.0 != 0 {
            1
        } else {
            fee
        }
    }
}

impl Add for FeeRate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} grains/kvB", self.0)
    }
}

/// Signed score in milli-grains per virtual byte, used as an ordering key.
///
/// Modified fees can go negative through prioritisation, so scores are
/// signed. The extra factor of 1000 over [`FeeRate`] keeps sub-grain
/// differences distinguishable in the orderings.
pub fn score_per_vbyte(fee: i64, vsize: u64) -> i64 {
    if vsize == 0 {
        return i64::MAX;
    }
    let score = (fee as i128) * 1000 / (vsize as i128);
    score.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Exact feerate comparison: is `a_fee / a_vsize` strictly greater than
/// `b_fee / b_vsize`? Cross-multiplies to avoid truncation artifacts.
pub fn rate_greater(a_fee: i64, a_vsize: u64, b_fee: i64, b_vsize: u64) -> bool {
    (a_fee as i128) * (b_vsize as i128) > (b_fee as i128) * (a_vsize as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fee_basic() {
        assert_eq!(FeeRate::from_fee(1000, 200).as_per_kvb(), 5000);
        assert_eq!(FeeRate::from_fee(0, 200), FeeRate::ZERO);
        assert_eq!(FeeRate::from_fee(1000, 0), FeeRate::ZERO);
    }

    #[test]
    fn fee_for_round_trip() {
        let rate = FeeRate::per_kvb(1000);
        assert_eq!(rate.fee_for(1000), 1000);
        assert_eq!(rate.fee_for(250), 250);
    }

    #[test]
    fn fee_for_never_zero_for_positive_rate() {
        let rate = FeeRate::per_kvb(1);
        assert_eq!(rate.fee_for(100), 1);
        assert_eq!(rate.fee_for(0), 0);
        assert_eq!(FeeRate::ZERO.fee_for(1000), 0);
    }

    #[test]
    fn fee_for_large_values_no_overflow() {
        let rate = FeeRate::per_kvb(u64::MAX);
        assert_eq!(rate.fee_for(u64::MAX), u64::MAX);
    }

    #[test]
    fn add_saturates() {
        let sum = FeeRate::per_kvb(u64::MAX) + FeeRate::per_kvb(1);
        assert_eq!(sum.as_per_kvb(), u64::MAX);
        assert_eq!(
            (FeeRate::per_kvb(2000) + FeeRate::per_kvb(500)).as_per_kvb(),
            2500
        );
    }

    #[test]
    fn ordering() {
        assert!(FeeRate::per_kvb(100) < FeeRate::per_kvb(200));
        assert!(FeeRate::per_kvb(100) > FeeRate::ZERO);
    }

    #[test]
    fn score_precision() {
        // 999 grains over 1000 vbytes: sub-grain rate survives scaling.
        assert_eq!(score_per_vbyte(999, 1000), 999);
        assert_eq!(score_per_vbyte(-1000, 500), -2000);
        assert_eq!(score_per_vbyte(1, 0), i64::MAX);
    }

    #[test]
    fn rate_greater_exact() {
        // 1001/1000 > 1/1 is false; 1001/1000 > 999/1000 is true.
        assert!(!rate_greater(1001, 1000, 1001, 1000));
        assert!(rate_greater(1001, 1000, 999, 1000));
        // Cross-size comparison without truncation: 3/2 > 1499/1000.
        assert!(rate_greater(3, 2, 1499, 1000));
        assert!(!rate_greater(3, 2, 1501, 1000));
    }

    #[test]
    fn display_format() {
        assert_eq!(FeeRate::per_kvb(1000).to_string(), "1000 grains/kvB");
    }
}
