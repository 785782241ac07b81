//! Hobby servos driven by the daemon's 50 Hz servo pulses.

use pilectric_units::ServoRange;
use tracing::debug;

use crate::daemon::{DaemonHandle, Pin, PinMode, check_disjoint_pins, check_pin};
use crate::error::{GpioError, Result};
use crate::traits::{MotorControl, MotorState};

/// Servo models with known angle and pulse-width ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoModel {
    /// TowerPro SG90 micro servo: -90°..90°, 500..2500 µs.
    Sg90,
    /// HobbyKing HK15148B: -30°..30°, 1000..2000 µs.
    Hk15148b,
}

impl ServoModel {
    pub fn range(self) -> Result<ServoRange> {
        let range = match self {
            ServoModel::Sg90 => ServoRange::new(-90.0, 90.0, 500.0, 2500.0)?,
            ServoModel::Hk15148b => ServoRange::new(-30.0, 30.0, 1000.0, 2000.0)?,
        };
        Ok(range)
    }
}

/// One servo on one pin.
pub struct Servo {
    daemon: DaemonHandle,
    pin: Pin,
    range: ServoRange,
    pulse_width: Option<u32>,
}

impl Servo {
    /// Set `pin` up as a servo output. No pulses are sent until a position is set.
    pub fn new(daemon: DaemonHandle, pin: Pin, range: ServoRange) -> Result<Self> {
        check_pin(pin)?;
        daemon.set_mode(pin, PinMode::Output)?;
        daemon.set_servo_pulse_width(pin, 0)?;
        Ok(Servo { daemon, pin, range, pulse_width: None })
    }

    /// Set up a servo of a known model.
    pub fn from_model(daemon: DaemonHandle, pin: Pin, model: ServoModel) -> Result<Self> {
        Servo::new(daemon, pin, model.range()?)
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn range(&self) -> &ServoRange {
        &self.range
    }

    /// Pulse width being sent, in microseconds.
    pub fn pulse_width(&self) -> Option<u32> {
        self.pulse_width
    }

    /// Angle held by the current pulse width.
    pub fn angle(&self) -> Option<f64> {
        self.pulse_width
            .map(|pulse_width| self.range.pulse_width_to_angle(pulse_width as f64))
    }

    /// Pulse width for `angle`, rejecting angles outside the servo's range.
    pub fn pulse_width_for_angle(&self, angle: f64) -> Result<u32> {
        self.range
            .angle_to_pulse_width(angle)
            .map(|pulse_width| pulse_width.round() as u32)
            .map_err(|_| {
                GpioError::InvalidParameter(format!(
                    "angle {angle} is outside of [{}, {}]",
                    self.range.min_angle(),
                    self.range.max_angle()
                ))
            })
    }

    /// Pulse width at `fraction` of the way from the minimum to the maximum pulse width.
    pub fn pulse_width_for_fraction(&self, fraction: f64) -> Result<u32> {
        Ok(self.range.fraction_to_pulse_width(fraction)?.round() as u32)
    }

    fn send(&mut self, pulse_width: u32) -> Result<()> {
        self.daemon.set_servo_pulse_width(self.pin, pulse_width)?;
        self.pulse_width = Some(pulse_width);
        debug!(pin = self.pin, pulse_width, "Servo pulse width set");
        Ok(())
    }

    pub fn go_to_angle(&mut self, angle: f64) -> Result<()> {
        let pulse_width = self.pulse_width_for_angle(angle)?;
        self.send(pulse_width)
    }

    pub fn min(&mut self) -> Result<()> {
        self.send(self.range.min_pulse_width().round() as u32)
    }

    pub fn max(&mut self) -> Result<()> {
        self.send(self.range.max_pulse_width().round() as u32)
    }

    pub fn mid(&mut self) -> Result<()> {
        self.go_to_angle(self.range.mid_angle())
    }

    pub fn run_at_percentage(&mut self, fraction: f64) -> Result<()> {
        let pulse_width = self.pulse_width_for_fraction(fraction)?;
        self.send(pulse_width)
    }
}

impl MotorControl for Servo {
    /// Stop sending pulses; the servo goes limp.
    fn stop(&mut self) -> Result<()> {
        self.daemon.set_servo_pulse_width(self.pin, 0)?;
        self.pulse_width = None;
        Ok(())
    }

    fn state(&self) -> MotorState {
        MotorState {
            enabled: self.pulse_width.is_some(),
            rotation: None,
            position: self.angle(),
            pulse_width: self.pulse_width,
        }
    }
}

/// An ordered group of servos.
///
/// Methods taking one value per servo check every value before any pulse
/// width is sent.
pub struct ServoController {
    servos: Vec<Servo>,
}

impl ServoController {
    pub fn new(servos: Vec<Servo>) -> Result<Self> {
        check_disjoint_pins(servos.iter().map(Servo::pin))?;
        Ok(ServoController { servos })
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }

    pub fn servos(&self) -> &[Servo] {
        &self.servos
    }

    fn servo_mut(&mut self, index: usize) -> Result<&mut Servo> {
        let len = self.servos.len();
        self.servos
            .get_mut(index)
            .ok_or_else(|| GpioError::InvalidParameter(format!("no servo {index}, there are {len}")))
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.servos.len() {
            return Err(GpioError::SizeMismatch { expected: self.servos.len(), actual });
        }
        Ok(())
    }

    fn send_all(&mut self, pulse_widths: Vec<u32>) -> Result<()> {
        for (servo, pulse_width) in self.servos.iter_mut().zip(pulse_widths) {
            servo.send(pulse_width)?;
        }
        Ok(())
    }

    pub fn go_to_angle(&mut self, index: usize, angle: f64) -> Result<()> {
        self.servo_mut(index)?.go_to_angle(angle)
    }

    pub fn go_to_angles(&mut self, angles: &[f64]) -> Result<()> {
        self.check_len(angles.len())?;
        let pulse_widths = self
            .servos
            .iter()
            .zip(angles)
            .map(|(servo, &angle)| servo.pulse_width_for_angle(angle))
            .collect::<Result<Vec<_>>>()?;
        self.send_all(pulse_widths)
    }

    /// Run each servo at a fraction of its pulse-width range.
    pub fn run_at_percentages(&mut self, fractions: &[f64]) -> Result<()> {
        self.check_len(fractions.len())?;
        let pulse_widths = self
            .servos
            .iter()
            .zip(fractions)
            .map(|(servo, &fraction)| servo.pulse_width_for_fraction(fraction))
            .collect::<Result<Vec<_>>>()?;
        self.send_all(pulse_widths)
    }

    /// Send servo `index` to its minimum, or every servo when `index` is `None`.
    pub fn min(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            Some(index) => self.servo_mut(index)?.min(),
            None => self.servos.iter_mut().try_for_each(Servo::min),
        }
    }

    /// Send servo `index` to its maximum, or every servo when `index` is `None`.
    pub fn max(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            Some(index) => self.servo_mut(index)?.max(),
            None => self.servos.iter_mut().try_for_each(Servo::max),
        }
    }

    /// Centre servo `index`, or every servo when `index` is `None`.
    pub fn mid(&mut self, index: Option<usize>) -> Result<()> {
        match index {
            Some(index) => self.servo_mut(index)?.mid(),
            None => self.servos.iter_mut().try_for_each(Servo::mid),
        }
    }

    /// Stop pulses to every servo.
    pub fn stop(&mut self) -> Result<()> {
        self.servos.iter_mut().try_for_each(MotorControl::stop)
    }
}
