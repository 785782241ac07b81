//! Brushless motor electronic speed controllers (ESCs).
//!
//! An ESC reads the same 50 Hz pulses as a servo; the pulse width sets the
//! throttle. Arming and calibration need the operator to connect or
//! disconnect the battery, so those sequences ask a caller-supplied
//! confirmation callback before each step.

use std::time::Duration;

use spin_sleep::SpinSleeper;
use tracing::{info, warn};

use crate::daemon::{DaemonHandle, Pin, PinMode, check_pin};
use crate::error::{GpioError, Result};
use crate::traits::{MotorControl, MotorState};

pub const DEFAULT_MIN_PULSE_WIDTH: u32 = 700;
pub const DEFAULT_MAX_PULSE_WIDTH: u32 = 2000;

/// Operator actions requested during [`ElectronicSpeedController::arm`] and
/// [`ElectronicSpeedController::calibrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscPrompt {
    /// Disconnect the battery, then confirm.
    DisconnectBattery,
    /// Connect the battery, then confirm.
    ConnectBattery,
    /// Confirm after the two beeps and the falling tone.
    CalibrationTones,
}

/// Pauses used by the arming and calibration sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscTimings {
    /// Low throttle hold while the ESC stores the calibrated range.
    pub calibration_hold: Duration,
    /// Pulses off after calibration.
    pub settle: Duration,
    /// Pause between steps of a sequence.
    pub step: Duration,
}

impl Default for EscTimings {
    fn default() -> Self {
        EscTimings {
            calibration_hold: Duration::from_secs(12),
            settle: Duration::from_secs(2),
            step: Duration::from_secs(1),
        }
    }
}

/// One ESC on one pin.
pub struct ElectronicSpeedController {
    daemon: DaemonHandle,
    pin: Pin,
    min_pulse_width: u32,
    max_pulse_width: u32,
    timings: EscTimings,
    pulse_width: Option<u32>,
    sleeper: SpinSleeper,
}

impl ElectronicSpeedController {
    /// Set `pin` up for an ESC with the default 700..2000 µs throttle range.
    pub fn new(daemon: DaemonHandle, pin: Pin) -> Result<Self> {
        ElectronicSpeedController::with_pulse_widths(daemon, pin, DEFAULT_MIN_PULSE_WIDTH, DEFAULT_MAX_PULSE_WIDTH)
    }

    /// Set `pin` up for an ESC with a custom throttle range in microseconds.
    pub fn with_pulse_widths(daemon: DaemonHandle, pin: Pin, min_pulse_width: u32, max_pulse_width: u32) -> Result<Self> {
        check_pin(pin)?;
        if !(min_pulse_width > 0 && min_pulse_width < max_pulse_width) {
            return Err(GpioError::InvalidParameter(format!(
                "ESC pulse widths {min_pulse_width}..{max_pulse_width} µs are not a range"
            )));
        }
        daemon.set_mode(pin, PinMode::Output)?;
        daemon.set_servo_pulse_width(pin, 0)?;
        Ok(ElectronicSpeedController {
            daemon,
            pin,
            min_pulse_width,
            max_pulse_width,
            timings: EscTimings::default(),
            pulse_width: None,
            sleeper: SpinSleeper::default(),
        })
    }

    pub fn with_timings(mut self, timings: EscTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn pulse_width(&self) -> Option<u32> {
        self.pulse_width
    }

    fn send(&mut self, pulse_width: u32) -> Result<()> {
        self.daemon.set_servo_pulse_width(self.pin, pulse_width)?;
        self.pulse_width = (pulse_width > 0).then_some(pulse_width);
        Ok(())
    }

    /// Pulse width for `throttle`, a fraction of the range from 0 (stopped) to 1 (full).
    pub fn pulse_width_for_throttle(&self, throttle: f64) -> Result<u32> {
        if !(0.0..=1.0).contains(&throttle) {
            return Err(GpioError::InvalidParameter(format!(
                "throttle {throttle} is outside of [0, 1]"
            )));
        }
        let span = (self.max_pulse_width - self.min_pulse_width) as f64;
        Ok(self.min_pulse_width + (throttle * span).round() as u32)
    }

    pub fn set_throttle(&mut self, throttle: f64) -> Result<()> {
        let pulse_width = self.pulse_width_for_throttle(throttle)?;
        self.send(pulse_width)
    }

    /// Run at `throttle` for `time`, then stop the pulses.
    pub fn run_at_throttle_for_time(&mut self, throttle: f64, time: Duration) -> Result<()> {
        self.set_throttle(throttle)?;
        self.sleeper.sleep(time);
        self.stop()
    }

    /// Arm the ESC: off, full throttle, then low throttle.
    ///
    /// Returns `false` without touching the pin when the operator declines.
    pub fn arm(&mut self, mut confirm: impl FnMut(EscPrompt) -> bool) -> Result<bool> {
        if !confirm(EscPrompt::ConnectBattery) {
            warn!(pin = self.pin, "ESC arming cancelled");
            return Ok(false);
        }
        for pulse_width in [0, self.max_pulse_width, self.min_pulse_width] {
            self.send(pulse_width)?;
            self.sleeper.sleep(self.timings.step);
        }
        info!(pin = self.pin, "ESC armed");
        Ok(true)
    }

    /// Teach the ESC its throttle range: full throttle while the battery is
    /// connected, then low throttle until the range is stored.
    ///
    /// Returns `false` when the operator declines a step; the pulses are then switched off.
    pub fn calibrate(&mut self, mut confirm: impl FnMut(EscPrompt) -> bool) -> Result<bool> {
        if !confirm(EscPrompt::DisconnectBattery) {
            warn!(pin = self.pin, "ESC calibration cancelled");
            return Ok(false);
        }
        self.send(self.max_pulse_width)?;
        if !confirm(EscPrompt::ConnectBattery) || !confirm(EscPrompt::CalibrationTones) {
            warn!(pin = self.pin, "ESC calibration cancelled");
            self.stop()?;
            return Ok(false);
        }
        self.send(self.min_pulse_width)?;
        self.sleeper.sleep(self.timings.calibration_hold);
        self.send(0)?;
        self.sleeper.sleep(self.timings.settle);
        self.send(self.min_pulse_width)?;
        self.sleeper.sleep(self.timings.step);
        info!(pin = self.pin, min = self.min_pulse_width, max = self.max_pulse_width, "ESC calibrated");
        Ok(true)
    }
}

impl MotorControl for ElectronicSpeedController {
    fn stop(&mut self) -> Result<()> {
        self.send(0)
    }

    fn state(&self) -> MotorState {
        MotorState {
            enabled: self.pulse_width.is_some(),
            rotation: None,
            position: None,
            pulse_width: self.pulse_width,
        }
    }
}
