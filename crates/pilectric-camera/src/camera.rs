//! The camera capability trait and shutter speeds.

use std::fmt;
use std::str::FromStr;

use pilectric_units::{GainModel, approximate_fraction};

use crate::error::{CameraError, Result};
use crate::sensor::Sensor;

/// Shutter speeds shorter than this are written as fractions.
pub const FRACTION_LIMIT: f64 = 0.4;

/// Exposure time of one picture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShutterSpeed {
    /// Fixed exposure in seconds.
    Seconds(f64),
    /// Open for as long as the shutter button is held.
    Bulb,
}

impl ShutterSpeed {
    /// Fixed exposure of `seconds`, which must be positive.
    pub fn seconds(seconds: f64) -> Result<Self> {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(CameraError::InvalidParameter(format!(
                "shutter speed {seconds} s is not positive"
            )));
        }
        Ok(ShutterSpeed::Seconds(seconds))
    }

    /// Exposure in seconds, `None` for bulb.
    pub fn as_secs(&self) -> Option<f64> {
        match *self {
            ShutterSpeed::Seconds(seconds) => Some(seconds),
            ShutterSpeed::Bulb => None,
        }
    }
}

/// Camera notation: `BULB`, `1/250` below 0.4 s, `2.5"` from there on.
impl fmt::Display for ShutterSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ShutterSpeed::Bulb => write!(f, "BULB"),
            ShutterSpeed::Seconds(seconds) if seconds < FRACTION_LIMIT => {
                let (numerator, denominator) = approximate_fraction(seconds, 1_000_000);
                write!(f, "{numerator}/{denominator}")
            }
            ShutterSpeed::Seconds(seconds) => write!(f, "{seconds}\""),
        }
    }
}

/// Accepts camera notation as well as plain seconds (`0.004`, `30`).
impl FromStr for ShutterSpeed {
    type Err = CameraError;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("bulb") {
            return Ok(ShutterSpeed::Bulb);
        }
        let invalid = || CameraError::InvalidParameter(format!("'{text}' is not a shutter speed"));
        let seconds = match text.split_once('/') {
            Some((numerator, denominator)) => {
                let numerator: f64 = numerator.trim().parse().map_err(|_| invalid())?;
                let denominator: f64 = denominator.trim().parse().map_err(|_| invalid())?;
                numerator / denominator
            }
            None => text.trim_end_matches('"').parse().map_err(|_| invalid())?,
        };
        ShutterSpeed::seconds(seconds).map_err(|_| invalid())
    }
}

/// What a remotely controlled still camera can do.
///
/// Calls block on the camera and take `&mut self`; share a camera between
/// threads behind a lock.
pub trait Camera: Send {
    fn iso(&mut self) -> Result<u32>;

    fn set_iso(&mut self, iso: u32) -> Result<()>;

    fn shutter_speed(&mut self) -> Result<ShutterSpeed>;

    fn set_shutter_speed(&mut self, shutter_speed: ShutterSpeed) -> Result<()>;

    /// Take one picture. Returns the URL of the image when the camera offers one.
    fn take_picture(&mut self) -> Result<Option<String>>;

    fn sensor(&self) -> Sensor;

    /// ISO to gain relationship of the sensor.
    fn gain_model(&self) -> GainModel {
        GainModel::default()
    }

    /// Current sensor gain in decibels.
    fn gain(&mut self) -> Result<f64> {
        let iso = self.iso()?;
        Ok(self.gain_model().iso_to_gain(iso as f64)?)
    }

    /// Set the ISO closest to `gain` decibels.
    fn set_gain(&mut self, gain: f64) -> Result<()> {
        let iso = self.gain_model().gain_to_iso(gain).round();
        if !(iso >= 1.0 && iso <= u32::MAX as f64) {
            return Err(CameraError::InvalidParameter(format!("gain {gain} dB is out of range")));
        }
        self.set_iso(iso as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;
    use pilectric_units::DECIBELS_PER_STOP;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_shutter_speed_formatting() {
        assert_eq!(ShutterSpeed::Seconds(1.0 / 250.0).to_string(), "1/250");
        assert_eq!(ShutterSpeed::Seconds(0.3).to_string(), "3/10");
        assert_eq!(ShutterSpeed::Seconds(0.4).to_string(), "0.4\"");
        assert_eq!(ShutterSpeed::Seconds(2.5).to_string(), "2.5\"");
        assert_eq!(ShutterSpeed::Seconds(30.0).to_string(), "30\"");
        assert_eq!(ShutterSpeed::Bulb.to_string(), "BULB");
    }

    #[test]
    fn test_shutter_speed_parsing() {
        assert_eq!("1/250".parse::<ShutterSpeed>().unwrap(), ShutterSpeed::Seconds(0.004));
        assert_eq!("2.5\"".parse::<ShutterSpeed>().unwrap(), ShutterSpeed::Seconds(2.5));
        assert_eq!("30".parse::<ShutterSpeed>().unwrap(), ShutterSpeed::Seconds(30.0));
        assert_eq!("BULB".parse::<ShutterSpeed>().unwrap(), ShutterSpeed::Bulb);
        assert!("fast".parse::<ShutterSpeed>().is_err());
        assert!("0".parse::<ShutterSpeed>().is_err());
        assert!("1/0".parse::<ShutterSpeed>().is_err());
    }

    #[test]
    fn test_gain_round_trip_through_iso() {
        let mut camera = MockCamera::new(400, ShutterSpeed::Seconds(0.01));
        assert!((camera.gain().unwrap() - 2.0 * DECIBELS_PER_STOP).abs() < EPSILON);

        camera.set_gain(3.0 * DECIBELS_PER_STOP).unwrap();
        assert_eq!(camera.iso().unwrap(), 800);

        // 6 dB is just under one stop: ISO 199.5 rounds to 200.
        camera.set_gain(6.0).unwrap();
        assert_eq!(camera.iso().unwrap(), 200);
    }

    #[test]
    fn test_set_gain_rejects_out_of_range() {
        let mut camera = MockCamera::new(100, ShutterSpeed::Seconds(0.01));
        assert!(camera.set_gain(-1000.0).is_err());
        assert!(camera.set_gain(f64::INFINITY).is_err());
    }
}
