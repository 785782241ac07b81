#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library of unit conversions for Raspberry Pi motion and camera control."]
#![doc = ""]
#![doc = "This crate converts stepper moves into step counts and step periods, lays PWM"]
#![doc = "pulse windows out over a period, maps servo angles to pulse widths, and converts"]
#![doc = "camera ISO values to sensor gain."]

pub mod error;
pub mod exposure;
pub mod pulse;
pub mod stepper;

pub use error::UnitsError;
pub use exposure::{DECIBELS_PER_STOP, GainModel, ZERO_GAIN_ISO, approximate_fraction, gain_to_iso, iso_to_gain};
pub use pulse::{MICROS_PER_SECOND, PulseShape, PulseWindow, ServoRange, frequency_to_period, period_to_frequency};
pub use stepper::{DEGREES_PER_TURN, MoveCommand, Rotation, StepPlan, StepperGeometry};
