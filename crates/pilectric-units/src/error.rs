//! Error types for the unit conversion library.
//!
//! This module defines the errors returned when a conversion is given a value
//! outside of its physical domain.

use core::fmt;

/// Errors that can occur in unit conversions.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitsError {
    /// Error for invalid stepper geometry.
    /// This variant is returned when steps per turn, microsteps, gear ratio or pitch are not positive.
    InvalidGeometry(&'static str),
    /// Error for a negative speed.
    /// Speeds are magnitudes; direction is carried by the sign of an angle.
    NegativeSpeed(&'static str),
    /// Error for a non-positive or non-finite duration.
    InvalidDuration(&'static str),
    /// Error for a pulse start or length outside of `[0, period]`.
    InvalidPulse(&'static str),
    /// Error for an invalid frequency or period.
    InvalidFrequency(&'static str),
    /// Error for an angle outside of a configured range.
    AngleOutOfRange(&'static str),
    /// Error for an invalid ISO or gain value.
    InvalidExposure(&'static str),
    /// Error for a move with more steps than a signed position can count.
    MoveTooLarge(&'static str),
}

impl fmt::Display for UnitsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitsError::InvalidGeometry(msg) => write!(f, "Invalid stepper geometry: {}", msg),
            UnitsError::NegativeSpeed(msg) => write!(f, "Negative speed: {}", msg),
            UnitsError::InvalidDuration(msg) => write!(f, "Invalid duration: {}", msg),
            UnitsError::InvalidPulse(msg) => write!(f, "Invalid pulse: {}", msg),
            UnitsError::InvalidFrequency(msg) => write!(f, "Invalid frequency: {}", msg),
            UnitsError::AngleOutOfRange(msg) => write!(f, "Angle out of range: {}", msg),
            UnitsError::InvalidExposure(msg) => write!(f, "Invalid exposure: {}", msg),
            UnitsError::MoveTooLarge(msg) => write!(f, "Move too large: {}", msg),
        }
    }
}

impl core::error::Error for UnitsError {}
