//! Conversion of final points into a real-world payout

use commons_types::{Payout, PayoutConfig, Points};

/// `max(min_payout, points * minor_units_per_point + participation_fee)`,
/// truncating fractional minor units
pub fn compute_payout(config: &PayoutConfig, points: Points) -> Payout {
    let earned = i128::from(points.minor()) * i128::from(config.minor_units_per_point)
        / i128::from(Points::SCALE);
    let total = earned + i128::from(config.participation_fee_minor);
    let total = total.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;

    Payout {
        currency_code: config.currency_code.clone(),
        amount_minor: total.max(config.min_payout_minor),
    }
}
