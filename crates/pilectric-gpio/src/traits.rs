use pilectric_units::Rotation;

use crate::error::Result;

/// Snapshot of a motor driver's state.
///
/// Fields that do not apply to a driver are `None`: a servo has no rotation
/// direction, a stepper has no pulse width.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorState {
    /// Whether the driver is powered and holding or driving the motor.
    pub enabled: bool,
    /// Direction of the last move.
    pub rotation: Option<Rotation>,
    /// Output position in degrees, relative to where the driver started.
    pub position: Option<f64>,
    /// Pulse width currently sent to the motor, in microseconds.
    pub pulse_width: Option<u32>,
}

/// Interface shared by every motor driver in this crate.
pub trait MotorControl {
    /// Stop driving the motor and release it.
    fn stop(&mut self) -> Result<()>;

    /// Get the current state of the motor.
    fn state(&self) -> MotorState;
}
