//! Signal strength to distance/accuracy conversion
//!
//! distance = round(sqrt(10 ^ ((reference_power - rssi) / 10)))
//!
//! accuracy is an empirical curve fit over ratio = rssi / reference_power:
//! - ratio < 1.0  -> ratio^10
//! - otherwise    -> 0.89976 * ratio^7.7095 + 0.111
//!
//! Neither value is clamped. A very weak signal yields a very large distance.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroI32;

/// Accuracy reported for a zero reading, which marks "no measurement".
pub const UNDETERMINED_ACCURACY: f64 = -1.0;

/// Expected signal strength at the reference distance of 1 unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct ReferencePower(NonZeroI32);

impl ReferencePower {
    /// Measured power at 1m commonly calibrated into iBeacon-style devices.
    pub const DEFAULT: ReferencePower = match NonZeroI32::new(-59) {
        Some(p) => ReferencePower(p),
        None => unreachable!(),
    };

    pub fn new(dbm: i32) -> Result<Self> {
        NonZeroI32::new(dbm)
            .map(ReferencePower)
            .ok_or(Error::InvalidReferencePower)
    }

    pub fn get(self) -> i32 {
        self.0.get()
    }
}

impl Default for ReferencePower {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i32> for ReferencePower {
    type Error = Error;

    fn try_from(dbm: i32) -> Result<Self> {
        ReferencePower::new(dbm)
    }
}

impl From<ReferencePower> for i32 {
    fn from(power: ReferencePower) -> i32 {
        power.get()
    }
}

impl fmt::Display for ReferencePower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}dBm", self.get())
    }
}

/// Estimate distance from a signal reading
///
/// # Arguments
/// * `rssi` - Received signal strength (dBm-like units)
/// * `reference` - Expected strength at 1 unit of distance
///
/// # Returns
/// Non-negative distance in reference units. Saturates at `u64::MAX` when the
/// strength deficit is too large to represent.
pub fn distance(rssi: i32, reference: ReferencePower) -> u64 {
    // i64 so that extreme i32 inputs cannot overflow the subtraction
    let deficit_db = i64::from(reference.get()) - i64::from(rssi);
    let ratio = 10.0_f64.powf(deficit_db as f64 / 10.0);

    // float -> int casts saturate; +inf becomes u64::MAX
    ratio.sqrt().round() as u64
}

/// Estimate the accuracy score of a signal reading
///
/// Returns [`UNDETERMINED_ACCURACY`] when `rssi` is exactly zero. The value is
/// an unnormalized confidence scale, not a probability.
pub fn accuracy(rssi: i32, reference: ReferencePower) -> f64 {
    if rssi == 0 {
        return UNDETERMINED_ACCURACY;
    }

    let ratio = f64::from(rssi) / f64::from(reference.get());
    if ratio < 1.0 {
        return ratio.powi(10);
    }

    0.89976 * ratio.powf(7.7095) + 0.111
}

/// Coarse bucket for a distance estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Proximity {
    Immediate,
    Touching,
    Near,
    Room,
    Hall,
    Out,
}

impl Proximity {
    pub fn from_distance(distance: u64) -> Self {
        match distance {
            0 => Proximity::Immediate,
            1..=2 => Proximity::Touching,
            3..=9 => Proximity::Near,
            10..=19 => Proximity::Room,
            20..=39 => Proximity::Hall,
            _ => Proximity::Out,
        }
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Proximity::Immediate => "on top of it",
            Proximity::Touching => "within reach",
            Proximity::Near => "near",
            Proximity::Room => "same room",
            Proximity::Hall => "down the hall",
            Proximity::Out => "out of range",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn power(dbm: i32) -> ReferencePower {
        ReferencePower::new(dbm).unwrap()
    }

    #[test]
    fn test_distance() {
        // At reference power, distance is 1
        assert_eq!(distance(-59, power(-59)), 1);

        // 20dB deficit -> sqrt(100) = 10
        assert_eq!(distance(-79, power(-59)), 10);

        // Stronger than reference rounds down to 0
        assert_eq!(distance(-40, power(-59)), 0);

        // 5dB deficit -> sqrt(3.162..) = 1.778.. rounds to 2
        assert_eq!(distance(-64, power(-59)), 2);
    }

    #[test]
    fn test_distance_saturates() {
        assert_eq!(distance(i32::MIN, power(i32::MAX)), u64::MAX);
        assert_eq!(distance(i32::MAX, power(i32::MIN)), 0);
    }

    #[test]
    fn test_accuracy_branches() {
        assert_eq!(accuracy(0, power(-59)), UNDETERMINED_ACCURACY);

        // ratio 0.5
        let a = accuracy(-30, power(-60));
        assert!((a - 0.5_f64.powi(10)).abs() < 1e-12);

        // ratio exactly 1.0 takes the curve-fit branch
        let a = accuracy(-59, power(-59));
        assert!((a - (0.89976 + 0.111)).abs() < 1e-12);

        // ratio 2.0
        let a = accuracy(-120, power(-60));
        assert!((a - (0.89976 * 2.0_f64.powf(7.7095) + 0.111)).abs() < 1e-9);
    }

    #[test]
    fn test_reference_power_rejects_zero() {
        assert!(matches!(
            ReferencePower::new(0),
            Err(Error::InvalidReferencePower)
        ));
        assert_eq!(power(-59), ReferencePower::default());
    }

    #[test]
    fn test_reference_power_serde() {
        let p: ReferencePower = serde_json::from_str("-65").unwrap();
        assert_eq!(p.get(), -65);
        assert!(serde_json::from_str::<ReferencePower>("0").is_err());
        assert_eq!(serde_json::to_string(&p).unwrap(), "-65");
    }

    #[test]
    fn test_proximity_buckets() {
        let p = ReferencePower::DEFAULT;
        assert_eq!(Proximity::from_distance(distance(-59, p)), Proximity::Touching);
        assert_eq!(Proximity::from_distance(distance(-79, p)), Proximity::Room);
        assert_eq!(Proximity::from_distance(distance(-99, p)), Proximity::Out);
        assert_eq!(Proximity::from_distance(0), Proximity::Immediate);
        assert_eq!(Proximity::from_distance(39).to_string(), "down the hall");
        assert!(Proximity::Near < Proximity::Hall);
    }

    fn nonzero_power() -> impl Strategy<Value = ReferencePower> {
        prop_oneof![-120i32..=-1, 1i32..=20].prop_map(|p| ReferencePower::new(p).unwrap())
    }

    proptest! {
        #[test]
        fn prop_zero_reading_is_undetermined(p in nonzero_power()) {
            prop_assert_eq!(accuracy(0, p), -1.0);
        }

        #[test]
        fn prop_accuracy_matches_curve(s in -130i32..=30, p in nonzero_power()) {
            prop_assume!(s != 0);
            let ratio = f64::from(s) / f64::from(p.get());
            let expected = if ratio < 1.0 {
                ratio.powi(10)
            } else {
                0.89976 * ratio.powf(7.7095) + 0.111
            };
            let got = accuracy(s, p);
            prop_assert!((got - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }

        #[test]
        fn prop_distance_monotonic_in_weaker_signal(s in -150i32..=50, p in nonzero_power()) {
            prop_assert!(distance(s - 1, p) >= distance(s, p));
        }
    }
}
