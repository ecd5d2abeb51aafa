//! Fixed-point game currency
//!
//! Amounts are held in minor units (1 point = 1000 minor units) so that
//! contribution pools, shares and punishment reductions are exact integer
//! arithmetic. Fractional factors are given in basis points.

use serde::{Deserialize, Serialize};

/// Basis points in one whole (100%)
pub const BASIS_POINTS: u32 = 10_000;

/// An amount of game currency in minor units
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Points(pub i64);

impl Points {
    /// Minor units per whole point
    pub const SCALE: i64 = 1_000;

    pub fn from_points(points: i64) -> Self {
        Self(points.saturating_mul(Self::SCALE))
    }

    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamp negative amounts to zero
    pub fn floor_zero(self) -> Self {
        Self(self.0.max(0))
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply by a whole number
    pub fn times(self, n: i64) -> Self {
        Self(self.0.saturating_mul(n))
    }

    /// Multiply by `bps / 10_000`, truncating toward zero
    pub fn scale_bps(self, bps: u32) -> Self {
        self.scale_ratio(i64::from(bps), i64::from(BASIS_POINTS))
    }

    /// Multiply by `numerator / denominator`, truncating toward zero.
    /// A zero denominator yields zero.
    pub fn scale_ratio(self, numerator: i64, denominator: i64) -> Self {
        if denominator == 0 {
            return Self::zero();
        }
        let scaled = i128::from(self.0) * i128::from(numerator) / i128::from(denominator);
        Self(scaled.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }
}

impl std::fmt::Display for Points {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        let whole = abs / scale;
        let frac = abs % scale;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

impl std::ops::Add for Points {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Points {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Points {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Points {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Neg for Points {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl std::iter::Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, p| acc + p)
    }
}

impl<'a> std::iter::Sum<&'a Points> for Points {
    fn sum<I: Iterator<Item = &'a Points>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, p| acc + *p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Points::from_points(20).to_string(), "20");
        assert_eq!(Points::from_minor(22_500).to_string(), "22.5");
        assert_eq!(Points::from_minor(125).to_string(), "0.125");
        assert_eq!(Points::from_minor(-3_000).to_string(), "-3");
        assert_eq!(Points::from_minor(-1_050).to_string(), "-1.05");
    }

    #[test]
    fn test_scale_bps_efficiency_factor() {
        // 0.375 * 60 = 22.5
        let pool = Points::from_points(60);
        assert_eq!(pool.scale_bps(3_750), Points::from_minor(22_500));
        // 0.375 * 40 = 15
        assert_eq!(Points::from_points(40).scale_bps(3_750), Points::from_points(15));
    }

    #[test]
    fn test_scale_ratio_zero_denominator() {
        assert_eq!(Points::from_points(5).scale_ratio(1, 0), Points::zero());
    }

    #[test]
    fn test_floor_zero() {
        assert_eq!(Points::from_points(-4).floor_zero(), Points::zero());
        assert_eq!(Points::from_points(4).floor_zero(), Points::from_points(4));
    }

    #[test]
    fn test_sum() {
        let values = vec![Points::from_points(1), Points::from_minor(500)];
        let total: Points = values.iter().sum();
        assert_eq!(total, Points::from_minor(1_500));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn scale_bps_never_exceeds_input(minor in 0i64..1_000_000_000, bps in 0u32..=10_000) {
                let scaled = Points::from_minor(minor).scale_bps(bps);
                prop_assert!(scaled >= Points::zero());
                prop_assert!(scaled <= Points::from_minor(minor));
            }

            #[test]
            fn display_round_trips_whole_points(points in -1_000_000i64..1_000_000) {
                prop_assert_eq!(Points::from_points(points).to_string(), points.to_string());
            }
        }
    }
}
