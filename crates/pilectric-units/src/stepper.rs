//! Stepper motor geometry and move planning.
//!
//! A move is reduced to a [`StepPlan`]: a rotation direction, a whole number of
//! (micro)steps, and the time between the starts of two consecutive steps.

use libm::{fabs, round};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::UnitsError;

/// Degrees in one full turn.
pub const DEGREES_PER_TURN: f64 = 360.0;

/// Direction of rotation, seen from the front of the motor shaft.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// Positive angles.
    #[default]
    CounterClockwise,
    /// Negative angles.
    Clockwise,
}

impl Rotation {
    /// Direction encoded by the sign of an angle. Zero counts as counter-clockwise.
    pub fn from_angle(angle: f64) -> Self {
        if angle < 0.0 {
            Rotation::Clockwise
        } else {
            Rotation::CounterClockwise
        }
    }

    /// Sign applied to a step count travelling in this direction.
    pub fn sign(self) -> i64 {
        match self {
            Rotation::CounterClockwise => 1,
            Rotation::Clockwise => -1,
        }
    }
}

/// Physical parameters of a stepper motor and the mechanism it drives.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperGeometry {
    full_steps_per_turn: u32,
    microsteps: u32,
    gear_ratio: f64,
    pitch: Option<f64>,
}

impl StepperGeometry {
    /// Construct the geometry of a rotary stepper.
    ///
    /// # Arguments
    ///
    /// * `full_steps_per_turn`: Full steps for one turn of the motor shaft (200 for a 1.8° motor).
    /// * `microsteps`: Microsteps per full step configured on the driver board.
    /// * `gear_ratio`: Turns of the motor needed for one turn of the driven output.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidGeometry)` if any parameter is not positive.
    pub fn new(full_steps_per_turn: u32, microsteps: u32, gear_ratio: f64) -> Result<Self, UnitsError> {
        if full_steps_per_turn == 0 {
            return Err(UnitsError::InvalidGeometry("full steps per turn must be positive"));
        }
        if microsteps == 0 {
            return Err(UnitsError::InvalidGeometry("microsteps must be positive"));
        }
        if !(gear_ratio > 0.0 && gear_ratio.is_finite()) {
            return Err(UnitsError::InvalidGeometry("gear ratio must be positive"));
        }
        Ok(StepperGeometry {
            full_steps_per_turn,
            microsteps,
            gear_ratio,
            pitch: None,
        })
    }

    /// Mark the output as linear, driven through a lead or ball screw.
    ///
    /// # Arguments
    ///
    /// * `pitch`: Linear travel per output turn, in meters.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidGeometry)` if `pitch` is not positive.
    pub fn with_pitch(mut self, pitch: f64) -> Result<Self, UnitsError> {
        if !(pitch > 0.0 && pitch.is_finite()) {
            return Err(UnitsError::InvalidGeometry("pitch must be positive"));
        }
        self.pitch = Some(pitch);
        Ok(self)
    }

    /// Returns the full steps per motor turn.
    pub fn full_steps_per_turn(&self) -> u32 {
        self.full_steps_per_turn
    }

    /// Returns the microsteps per full step.
    pub fn microsteps(&self) -> u32 {
        self.microsteps
    }

    /// Returns the gear ratio.
    pub fn gear_ratio(&self) -> f64 {
        self.gear_ratio
    }

    /// Returns the screw pitch in meters, if the output is linear.
    pub fn pitch(&self) -> Option<f64> {
        self.pitch
    }

    /// Microsteps needed for one full turn of the driven output.
    pub fn steps_per_output_turn(&self) -> f64 {
        self.gear_ratio * self.full_steps_per_turn as f64 * self.microsteps as f64
    }

    /// Convert an angle to the closest whole number of microsteps.
    ///
    /// The sign of the angle is ignored; halves round away from zero.
    pub fn angle_to_steps(&self, angle: f64) -> u64 {
        round(fabs(angle) / DEGREES_PER_TURN * self.steps_per_output_turn()) as u64
    }

    /// Convert a signed microstep count back to degrees of output rotation.
    pub fn steps_to_angle(&self, steps: i64) -> f64 {
        steps as f64 * DEGREES_PER_TURN / self.steps_per_output_turn()
    }

    /// Convert a speed in degrees/second to microsteps/second.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::NegativeSpeed)` if `speed` is negative or not finite.
    pub fn angular_speed_to_step_rate(&self, speed: f64) -> Result<f64, UnitsError> {
        if !(speed >= 0.0 && speed.is_finite()) {
            return Err(UnitsError::NegativeSpeed("speed is a magnitude and must be non-negative"));
        }
        Ok(speed / DEGREES_PER_TURN * self.steps_per_output_turn())
    }

    /// Time in seconds between the starts of two steps at `speed` degrees/second.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::NegativeSpeed)` for a negative speed and
    /// `Err(UnitsError::InvalidDuration)` for a zero speed, which never completes a step.
    pub fn step_period(&self, speed: f64) -> Result<f64, UnitsError> {
        let rate = self.angular_speed_to_step_rate(speed)?;
        if rate <= 0.0 {
            return Err(UnitsError::InvalidDuration("speed must be positive to take a step"));
        }
        Ok(1.0 / rate)
    }

    /// Convert a linear distance in meters to degrees of output rotation.
    ///
    /// # Errors
    ///
    /// Returns `Err(UnitsError::InvalidGeometry)` if the stepper has no pitch.
    pub fn distance_to_angle(&self, distance: f64) -> Result<f64, UnitsError> {
        match self.pitch {
            Some(pitch) => Ok(DEGREES_PER_TURN * distance / pitch),
            None => Err(UnitsError::InvalidGeometry("the stepper is not linear")),
        }
    }
}

/// A requested stepper move, before it is reduced to steps.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveCommand {
    /// Rotate by `angle` degrees, taking `time` seconds.
    AngleInTime {
        /// Signed angle in degrees; negative is clockwise.
        angle: f64,
        /// Duration in seconds.
        time: f64,
    },
    /// Rotate by `angle` degrees at `speed` degrees/second.
    AngleAtSpeed {
        /// Signed angle in degrees; negative is clockwise.
        angle: f64,
        /// Unsigned speed in degrees/second.
        speed: f64,
    },
    /// Rotate counter-clockwise at `speed` degrees/second for `time` seconds.
    SpeedForTime {
        /// Unsigned speed in degrees/second.
        speed: f64,
        /// Duration in seconds.
        time: f64,
    },
    /// Travel `distance` meters along a linear axis, taking `time` seconds.
    DistanceInTime {
        /// Signed distance in meters.
        distance: f64,
        /// Duration in seconds.
        time: f64,
    },
}

/// A move reduced to pin activity.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepPlan {
    /// Direction to drive the direction pin to.
    pub rotation: Rotation,
    /// Number of microsteps to issue.
    pub steps: u64,
    /// Seconds between the starts of two steps. Zero when `steps` is zero.
    pub step_period: f64,
}

impl StepPlan {
    /// Total time in seconds the step train takes.
    pub fn duration(&self) -> f64 {
        self.steps as f64 * self.step_period
    }

    /// Signed change in microstep position, saturating at `±i64::MAX`.
    pub fn signed_steps(&self) -> i64 {
        let steps = i64::try_from(self.steps).unwrap_or(i64::MAX);
        self.rotation.sign() * steps
    }
}

fn check_time(time: f64) -> Result<(), UnitsError> {
    if time > 0.0 && time.is_finite() {
        Ok(())
    } else {
        Err(UnitsError::InvalidDuration("time must be positive"))
    }
}

impl MoveCommand {
    /// Reduce the command to a step plan for a motor with `geometry`.
    ///
    /// # Errors
    ///
    /// * `UnitsError::NegativeSpeed` if a speed is negative.
    /// * `UnitsError::InvalidDuration` if a time is not positive.
    /// * `UnitsError::InvalidGeometry` for a distance move on a rotary stepper.
    pub fn plan(&self, geometry: &StepperGeometry) -> Result<StepPlan, UnitsError> {
        match *self {
            MoveCommand::AngleAtSpeed { angle, speed } => {
                let rate = geometry.angular_speed_to_step_rate(speed)?;
                let steps = geometry.angle_to_steps(angle);
                if steps == 0 {
                    return Ok(StepPlan {
                        rotation: Rotation::from_angle(angle),
                        steps: 0,
                        step_period: 0.0,
                    });
                }
                if rate <= 0.0 {
                    return Err(UnitsError::InvalidDuration("speed must be positive to take a step"));
                }
                if i64::try_from(steps).is_err() {
                    return Err(UnitsError::MoveTooLarge("step count does not fit a signed position"));
                }
                let step_period = 1.0 / rate;
                if !step_period.is_finite() {
                    return Err(UnitsError::InvalidDuration("speed is too slow to time a step"));
                }
                Ok(StepPlan {
                    rotation: Rotation::from_angle(angle),
                    steps,
                    step_period,
                })
            }
            MoveCommand::AngleInTime { angle, time } => {
                check_time(time)?;
                MoveCommand::AngleAtSpeed { angle, speed: fabs(angle) / time }.plan(geometry)
            }
            MoveCommand::SpeedForTime { speed, time } => {
                check_time(time)?;
                geometry.angular_speed_to_step_rate(speed)?;
                MoveCommand::AngleAtSpeed { angle: speed * time, speed }.plan(geometry)
            }
            MoveCommand::DistanceInTime { distance, time } => {
                let angle = geometry.distance_to_angle(distance)?;
                MoveCommand::AngleInTime { angle, time }.plan(geometry)
            }
        }
    }
}
