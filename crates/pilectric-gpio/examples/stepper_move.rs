//! Turn a TMC2209-driven stepper one way and back, then move it at a constant speed.
//!
//! Run on the Pi with `pigpiod` started, or point `PIGPIO_ADDR` at one.

use std::sync::Arc;

use anyhow::Context;
use pilectric_gpio::{MotorControl, PigpioClient, StepTiming, StepperMotor, StepperPins};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STEP_PIN: u8 = 17;
const DIRECTION_PIN: u8 = 27;
const ENABLE_PIN: u8 = 22;
const MS2_PIN: u8 = 5;
const MS1_PIN: u8 = 6;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let daemon = Arc::new(PigpioClient::from_env().context("is pigpiod running?")?);
    let pins = StepperPins::new(STEP_PIN, DIRECTION_PIN)
        .with_enable(ENABLE_PIN)
        .with_microstep(vec![MS2_PIN, MS1_PIN]);
    let mut stepper = StepperMotor::tmc2209(daemon, pins, 16, 1.0)?
        .with_timing(StepTiming::Waveform)?
        .with_travel_limits(-360.0, 360.0)?;

    stepper.move_by_angle_in_time(180.0, 2.0)?;
    stepper.move_by_angle_at_speed(-180.0, 90.0)?;
    info!(position = stepper.position(), "Back at the start");

    stepper.move_at_speed_for_time(45.0, 4.0)?;
    info!(state = ?stepper.state(), "Done");
    stepper.stop()?;
    Ok(())
}
