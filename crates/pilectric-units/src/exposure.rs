//! Camera exposure conversions.
//!
//! Gain is expressed in decibels relative to the ISO at which the sensor has
//! no amplification. Every stop (doubling of ISO) adds `20 log10 2` dB.

use libm::{floor, fabs, log2, pow};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::UnitsError;

/// ISO with zero gain.
pub const ZERO_GAIN_ISO: f64 = 100.0;

/// Decibels of gain per stop, `20 log10 2`.
pub const DECIBELS_PER_STOP: f64 = 6.020_599_913_279_624;

/// Parameters of the ISO to gain relationship of a sensor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainModel {
    /// ISO at which the gain is zero.
    pub zero_gain_iso: f64,
    /// Decibels it takes to double the ISO.
    pub decibels_per_stop: f64,
}

impl Default for GainModel {
    fn default() -> Self {
        GainModel {
            zero_gain_iso: ZERO_GAIN_ISO,
            decibels_per_stop: DECIBELS_PER_STOP,
        }
    }
}

impl GainModel {
    /// Convert an ISO to gain in decibels.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidExposure)` if `iso` is not positive.
    pub fn iso_to_gain(&self, iso: f64) -> Result<f64, UnitsError> {
        if !(iso > 0.0 && iso.is_finite()) {
            return Err(UnitsError::InvalidExposure("ISO must be positive"));
        }
        Ok(self.decibels_per_stop * log2(iso / self.zero_gain_iso))
    }

    /// Convert a gain in decibels to the equivalent ISO.
    pub fn gain_to_iso(&self, gain: f64) -> f64 {
        self.zero_gain_iso * pow(2.0, gain / self.decibels_per_stop)
    }
}

/// Convert an ISO to gain with the default model.
pub fn iso_to_gain(iso: f64) -> Result<f64, UnitsError> {
    GainModel::default().iso_to_gain(iso)
}

/// Convert a gain to ISO with the default model.
pub fn gain_to_iso(gain: f64) -> f64 {
    GainModel::default().gain_to_iso(gain)
}

/// Closest fraction `numerator / denominator` to `value` with a denominator no
/// larger than `max_denominator`.
///
/// Walks the continued fraction expansion of `value` and, once the next
/// convergent's denominator is too large, picks the closer of the last
/// convergent and the best semiconvergent. Negative values are approximated
/// by magnitude.
pub fn approximate_fraction(value: f64, max_denominator: u64) -> (u64, u64) {
    let value = fabs(value);
    let max_denominator = max_denominator.max(1);

    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut x = value;
    loop {
        let a = floor(x);
        if a > u64::MAX as f64 {
            break;
        }
        let a = a as u64;
        let q2 = match a.checked_mul(q1).and_then(|aq| aq.checked_add(q0)) {
            Some(q2) if q2 <= max_denominator => q2,
            _ => break,
        };
        let p2 = a.saturating_mul(p1).saturating_add(p0);
        (p0, q0, p1, q1) = (p1, q1, p2, q2);

        let remainder = x - a as f64;
        if remainder < 1e-12 || fabs(p1 as f64 / q1 as f64 - value) < f64::EPSILON * value {
            return (p1, q1);
        }
        x = 1.0 / remainder;
    }

    if q1 == 0 {
        // value too large to start the expansion
        return (u64::MAX, 1);
    }

    let k = (max_denominator - q0) / q1;
    let semi = (p0 + k * p1, q0 + k * q1);
    let semi_error = fabs(semi.0 as f64 / semi.1 as f64 - value);
    let convergent_error = fabs(p1 as f64 / q1 as f64 - value);
    if semi_error < convergent_error { semi } else { (p1, q1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_zero_gain_at_base_iso() {
        assert!(iso_to_gain(100.0).unwrap().abs() < EPSILON);
        assert!((gain_to_iso(0.0) - 100.0).abs() < EPSILON);
    }

    #[test]
    fn test_one_stop_is_twenty_log_two_decibels() {
        assert!((iso_to_gain(200.0).unwrap() - DECIBELS_PER_STOP).abs() < EPSILON);
        assert!((iso_to_gain(50.0).unwrap() + DECIBELS_PER_STOP).abs() < EPSILON);
        assert!((gain_to_iso(3.0 * DECIBELS_PER_STOP) - 800.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_iso_is_rejected() {
        assert!(matches!(iso_to_gain(0.0), Err(UnitsError::InvalidExposure(_))));
        assert!(matches!(iso_to_gain(-100.0), Err(UnitsError::InvalidExposure(_))));
    }

    #[test]
    fn test_custom_model() {
        let model = GainModel { zero_gain_iso: 160.0, decibels_per_stop: 6.0 };
        assert!((model.iso_to_gain(320.0).unwrap() - 6.0).abs() < EPSILON);
        assert!((model.gain_to_iso(-6.0) - 80.0).abs() < EPSILON);
    }

    #[test]
    fn test_approximate_fraction_shutter_speeds() {
        assert_eq!(approximate_fraction(0.004, 1_000_000), (1, 250));
        assert_eq!(approximate_fraction(1.0 / 3.0, 1_000_000), (1, 3));
        assert_eq!(approximate_fraction(0.5, 1_000_000), (1, 2));
        assert_eq!(approximate_fraction(0.3, 1_000_000), (3, 10));
        assert_eq!(approximate_fraction(2.0, 1_000_000), (2, 1));
    }

    #[test]
    fn test_approximate_fraction_respects_max_denominator() {
        // pi with denominators up to 100 is 311/99
        assert_eq!(approximate_fraction(core::f64::consts::PI, 100), (311, 99));
        assert_eq!(approximate_fraction(core::f64::consts::PI, 10), (22, 7));
    }

    proptest! {
        #[test]
        fn prop_gain_to_iso_inverts_iso_to_gain(iso in 25.0f64..409_600.0) {
            let round_trip = gain_to_iso(iso_to_gain(iso).unwrap());
            prop_assert!((round_trip - iso).abs() <= iso * 1e-12);
        }
    }
}
