//! PWM pulse windows and servo pulse-width mapping.

use libm::round;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::UnitsError;

/// Microseconds in one second.
pub const MICROS_PER_SECOND: f64 = 1e6;

/// Convert a frequency in Hz to a period in microseconds.
///
/// # Errors
///
/// Returns `Err(UnitsError::InvalidFrequency)` if `frequency` is not positive and finite.
pub fn frequency_to_period(frequency: f64) -> Result<f64, UnitsError> {
    if !(frequency > 0.0 && frequency.is_finite()) {
        return Err(UnitsError::InvalidFrequency("frequency must be positive"));
    }
    Ok(MICROS_PER_SECOND / frequency)
}

/// Convert a period in microseconds to a frequency in Hz.
///
/// # Errors
///
/// Returns `Err(UnitsError::InvalidFrequency)` if `period` is not positive and finite.
pub fn period_to_frequency(period: f64) -> Result<f64, UnitsError> {
    if !(period > 0.0 && period.is_finite()) {
        return Err(UnitsError::InvalidFrequency("period must be positive"));
    }
    Ok(MICROS_PER_SECOND / period)
}

fn check_fraction(fraction: f64, what: &'static str) -> Result<f64, UnitsError> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(fraction)
    } else {
        Err(UnitsError::InvalidPulse(what))
    }
}

fn check_micros(value: f64, period: f64, what: &'static str) -> Result<f64, UnitsError> {
    if value >= 0.0 && value <= period {
        Ok(value)
    } else {
        Err(UnitsError::InvalidPulse(what))
    }
}

/// Where the high part of a PWM period sits, as fractions of the period.
///
/// Fractions are stored rather than microseconds so the window survives a
/// frequency change.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PulseWindow {
    start: f64,
    length: f64,
}

impl PulseWindow {
    /// A window that keeps the pin low.
    pub const OFF: PulseWindow = PulseWindow { start: 0.0, length: 0.0 };

    /// Construct a window from fractions of the period.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidPulse)` if either fraction is outside `[0, 1]`.
    pub fn new(start: f64, length: f64) -> Result<Self, UnitsError> {
        Ok(PulseWindow {
            start: check_fraction(start, "pulse start must be within [0, 1] of the period")?,
            length: check_fraction(length, "duty cycle must be within [0, 1]")?,
        })
    }

    /// Fraction of the period before the pin goes high.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Fraction of the period the pin is high (the duty cycle).
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Replace the duty cycle.
    pub fn with_duty_cycle(self, fraction: f64) -> Result<Self, UnitsError> {
        PulseWindow::new(self.start, fraction)
    }

    /// Replace the pulse start with a fraction of the period.
    pub fn with_start_fraction(self, fraction: f64) -> Result<Self, UnitsError> {
        PulseWindow::new(fraction, self.length)
    }

    /// Replace the pulse length with an absolute time.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidPulse)` if `length` is negative or longer than `period`.
    pub fn with_length_micros(self, length: f64, period: f64) -> Result<Self, UnitsError> {
        let length = check_micros(length, period, "pulse length must be within [0, period]")?;
        PulseWindow::new(self.start, length / period)
    }

    /// Replace the pulse start with an absolute time.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidPulse)` if `start` is negative or later than `period`.
    pub fn with_start_micros(self, start: f64, period: f64) -> Result<Self, UnitsError> {
        let start = check_micros(start, period, "pulse start must be within [0, period]")?;
        PulseWindow::new(start / period, self.length)
    }

    /// Pulse start in microseconds for `period`.
    pub fn start_micros(&self, period: f64) -> f64 {
        self.start * period
    }

    /// Pulse length in microseconds for `period`.
    pub fn length_micros(&self, period: f64) -> f64 {
        self.length * period
    }

    /// Lay the window out over one period, rounded to whole microseconds.
    pub fn shape(&self, period: f64) -> PulseShape {
        let period = round(period) as u32;
        let on = round(self.start * period as f64) as u32;
        let length = round(self.length * period as f64) as u32;

        if length == 0 {
            return PulseShape::Low { period };
        }
        if length >= period {
            return PulseShape::High { period };
        }

        let on = on.min(period);
        let off = (on + length) % period;
        if on < off {
            PulseShape::Inner {
                low_before: on,
                high: off - on,
                low_after: period - off,
            }
        } else {
            PulseShape::Wrapped {
                high_before: off,
                low: on - off,
                high_after: period - on,
            }
        }
    }
}

/// One PWM period as consecutive levels, in whole microseconds.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseShape {
    /// Low for the whole period.
    Low {
        /// Period length (µs).
        period: u32,
    },
    /// High for the whole period.
    High {
        /// Period length (µs).
        period: u32,
    },
    /// Low, then high, then low.
    Inner {
        /// Low time before the pulse (µs).
        low_before: u32,
        /// Pulse length (µs).
        high: u32,
        /// Low time after the pulse (µs).
        low_after: u32,
    },
    /// The pulse crosses the period boundary: high, then low, then high.
    Wrapped {
        /// High time carried over from the previous period (µs).
        high_before: u32,
        /// Low time (µs).
        low: u32,
        /// High time until the end of the period (µs).
        high_after: u32,
    },
}

impl PulseShape {
    /// Levels and durations in order; zero-length segments included.
    pub fn segments(&self) -> [(bool, u32); 3] {
        match *self {
            PulseShape::Low { period } => [(false, period), (false, 0), (false, 0)],
            PulseShape::High { period } => [(true, period), (true, 0), (true, 0)],
            PulseShape::Inner { low_before, high, low_after } => {
                [(false, low_before), (true, high), (false, low_after)]
            }
            PulseShape::Wrapped { high_before, low, high_after } => {
                [(true, high_before), (false, low), (true, high_after)]
            }
        }
    }

    /// Total length of the shape in microseconds.
    pub fn period(&self) -> u32 {
        self.segments().iter().map(|(_, us)| us).sum()
    }
}

/// Linear mapping between a servo's angle range and its pulse-width range.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoRange {
    min_angle: f64,
    max_angle: f64,
    min_pulse_width: f64,
    max_pulse_width: f64,
}

impl ServoRange {
    /// Construct a servo range.
    ///
    /// # Arguments
    ///
    /// * `min_angle`, `max_angle`: Angle limits in degrees.
    /// * `min_pulse_width`, `max_pulse_width`: Pulse widths in microseconds at those limits.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidPulse)` if either range is empty or a pulse width is not positive.
    pub fn new(
        min_angle: f64,
        max_angle: f64,
        min_pulse_width: f64,
        max_pulse_width: f64,
    ) -> Result<Self, UnitsError> {
        if !(min_angle < max_angle) {
            return Err(UnitsError::InvalidPulse("min angle must be below max angle"));
        }
        if !(min_pulse_width > 0.0 && min_pulse_width < max_pulse_width) {
            return Err(UnitsError::InvalidPulse(
                "pulse widths must be positive with min below max",
            ));
        }
        Ok(ServoRange {
            min_angle,
            max_angle,
            min_pulse_width,
            max_pulse_width,
        })
    }

    /// Returns the minimum angle.
    pub fn min_angle(&self) -> f64 {
        self.min_angle
    }

    /// Returns the maximum angle.
    pub fn max_angle(&self) -> f64 {
        self.max_angle
    }

    /// Returns the pulse width at the minimum angle.
    pub fn min_pulse_width(&self) -> f64 {
        self.min_pulse_width
    }

    /// Returns the pulse width at the maximum angle.
    pub fn max_pulse_width(&self) -> f64 {
        self.max_pulse_width
    }

    /// The angle half way between the limits.
    pub fn mid_angle(&self) -> f64 {
        self.min_angle + (self.max_angle - self.min_angle) / 2.0
    }

    /// Pulse width in microseconds that holds `angle`.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::AngleOutOfRange)` outside `[min_angle, max_angle]`.
    pub fn angle_to_pulse_width(&self, angle: f64) -> Result<f64, UnitsError> {
        if !(angle >= self.min_angle && angle <= self.max_angle) {
            return Err(UnitsError::AngleOutOfRange("servo angle outside of its range"));
        }
        Ok((self.max_pulse_width - self.min_pulse_width) / (self.max_angle - self.min_angle)
            * (angle - self.min_angle)
            + self.min_pulse_width)
    }

    /// Angle held by a pulse width, without range checking.
    pub fn pulse_width_to_angle(&self, pulse_width: f64) -> f64 {
        (self.max_angle - self.min_angle) / (self.max_pulse_width - self.min_pulse_width)
            * (pulse_width - self.min_pulse_width)
            + self.min_angle
    }

    /// Pulse width at `fraction` of the way from the minimum to the maximum pulse width.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidPulse)` if `fraction` is outside `[0, 1]`.
    pub fn fraction_to_pulse_width(&self, fraction: f64) -> Result<f64, UnitsError> {
        let fraction = check_fraction(fraction, "pulse fraction must be within [0, 1]")?;
        Ok(fraction * (self.max_pulse_width - self.min_pulse_width) + self.min_pulse_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_frequency_period_conversions() {
        assert!((frequency_to_period(1e3).unwrap() - 1000.0).abs() < EPSILON);
        assert!((period_to_frequency(20_000.0).unwrap() - 50.0).abs() < EPSILON);
        assert!(matches!(frequency_to_period(0.0), Err(UnitsError::InvalidFrequency(_))));
        assert!(matches!(period_to_frequency(-1.0), Err(UnitsError::InvalidFrequency(_))));
    }

    #[test]
    fn test_window_rejects_out_of_range_values() {
        let window = PulseWindow::OFF;
        assert!(matches!(window.with_duty_cycle(-0.1), Err(UnitsError::InvalidPulse(_))));
        assert!(matches!(window.with_duty_cycle(1.1), Err(UnitsError::InvalidPulse(_))));
        assert!(matches!(window.with_length_micros(-1.0, 1000.0), Err(UnitsError::InvalidPulse(_))));
        assert!(matches!(window.with_length_micros(1000.5, 1000.0), Err(UnitsError::InvalidPulse(_))));
        assert!(matches!(window.with_start_micros(2000.0, 1000.0), Err(UnitsError::InvalidPulse(_))));
    }

    #[test]
    fn test_window_micros_round_trip_through_fractions() {
        let window = PulseWindow::OFF
            .with_length_micros(250.0, 1000.0)
            .unwrap()
            .with_start_micros(100.0, 1000.0)
            .unwrap();
        assert!((window.length() - 0.25).abs() < EPSILON);
        assert!((window.start() - 0.1).abs() < EPSILON);
        // Halving the frequency keeps the fractions.
        assert!((window.length_micros(2000.0) - 500.0).abs() < EPSILON);
    }

    #[test]
    fn test_shape_inner_pulse() {
        let window = PulseWindow::new(0.25, 0.5).unwrap();
        assert_eq!(
            window.shape(1000.0),
            PulseShape::Inner { low_before: 250, high: 500, low_after: 250 }
        );
    }

    #[test]
    fn test_shape_wrapped_pulse() {
        let window = PulseWindow::new(0.75, 0.5).unwrap();
        assert_eq!(
            window.shape(1000.0),
            PulseShape::Wrapped { high_before: 250, low: 500, high_after: 250 }
        );
    }

    #[test]
    fn test_shape_extremes() {
        assert_eq!(PulseWindow::OFF.shape(1000.0), PulseShape::Low { period: 1000 });
        let full = PulseWindow::new(0.3, 1.0).unwrap();
        assert_eq!(full.shape(1000.0), PulseShape::High { period: 1000 });
    }

    #[test]
    fn test_servo_mapping() {
        let range = ServoRange::new(-90.0, 90.0, 500.0, 2500.0).unwrap();
        assert!((range.angle_to_pulse_width(0.0).unwrap() - 1500.0).abs() < EPSILON);
        assert!((range.angle_to_pulse_width(-90.0).unwrap() - 500.0).abs() < EPSILON);
        assert!((range.pulse_width_to_angle(2000.0) - 45.0).abs() < EPSILON);
        assert!((range.mid_angle() - 0.0).abs() < EPSILON);
        assert!(matches!(range.angle_to_pulse_width(91.0), Err(UnitsError::AngleOutOfRange(_))));
        assert!((range.fraction_to_pulse_width(0.25).unwrap() - 1000.0).abs() < EPSILON);
    }

    #[test]
    fn test_servo_range_rejects_inverted_limits() {
        assert!(ServoRange::new(30.0, -30.0, 1000.0, 2000.0).is_err());
        assert!(ServoRange::new(-30.0, 30.0, 2000.0, 1000.0).is_err());
        assert!(ServoRange::new(-30.0, 30.0, 0.0, 1000.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_duty_cycle_is_fraction_of_period(fraction in 0.0f64..=1.0, frequency in 1.0f64..50_000.0) {
            let period = frequency_to_period(frequency).unwrap();
            let window = PulseWindow::OFF.with_duty_cycle(fraction).unwrap();
            prop_assert!((window.length_micros(period) - fraction * period).abs() < 1e-6);
        }

        #[test]
        fn prop_shape_spans_one_period(start in 0.0f64..=1.0, length in 0.0f64..=1.0) {
            let window = PulseWindow::new(start, length).unwrap();
            prop_assert_eq!(window.shape(1000.0).period(), 1000);
        }
    }
}
