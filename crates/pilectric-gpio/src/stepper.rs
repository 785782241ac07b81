//! Step/direction stepper motor driver.
//!
//! Moves are planned with [`pilectric_units::MoveCommand`] and then issued as
//! a train of step pulses, either toggled through the daemon one by one or
//! looped by the daemon's waveform engine. Every move blocks until the last
//! step has been issued or the [`StopHandle`] fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pilectric_units::{MoveCommand, Rotation, StepPlan, StepperGeometry};
use spin_sleep::SpinSleeper;
use tracing::{debug, info, warn};

use crate::daemon::{DaemonHandle, Pin, PinMode, Pulse, WaveId, check_disjoint_pins, check_wave_pin};
use crate::error::{GpioError, Result};
use crate::traits::{MotorControl, MotorState};

/// Full steps per turn of the motors sold with TMC2209 boards (1.8° per step).
pub const TMC2209_FULL_STEPS_PER_TURN: u32 = 200;

/// Step pulses per inner loop of a wave chain.
const CHAIN_LOOP_STEPS: u64 = 65_535;

/// Longest pause between two transmitter polls in waveform timing.
const MAX_POLL: Duration = Duration::from_millis(10);

/// TMC2209 microstep-select levels, in `[MS2, MS1]` pin order.
fn tmc2209_microstep_levels(microsteps: u32) -> Option<[bool; 2]> {
    match microsteps {
        8 => Some([false, false]),
        16 => Some([true, true]),
        32 => Some([false, true]),
        64 => Some([true, false]),
        _ => None,
    }
}

/// Pins wired to a step/direction driver board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepperPins {
    pub step: Pin,
    pub direction: Pin,
    /// Active-low enable input, if wired.
    pub enable: Option<Pin>,
    /// Microstep-select inputs, if wired.
    pub microstep: Vec<Pin>,
}

impl StepperPins {
    pub fn new(step: Pin, direction: Pin) -> Self {
        StepperPins { step, direction, enable: None, microstep: Vec::new() }
    }

    pub fn with_enable(mut self, enable: Pin) -> Self {
        self.enable = Some(enable);
        self
    }

    pub fn with_microstep(mut self, microstep: Vec<Pin>) -> Self {
        self.microstep = microstep;
        self
    }

    /// Every wired pin.
    pub fn all(&self) -> impl Iterator<Item = Pin> + '_ {
        [self.step, self.direction]
            .into_iter()
            .chain(self.enable)
            .chain(self.microstep.iter().copied())
    }
}

/// How step pulses are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepTiming {
    /// Each edge is a daemon write, spaced with a spin sleeper. Limited to a few
    /// kHz by the daemon round trip.
    #[default]
    Software,
    /// One step pulse is stored as a daemon waveform and looped with a wave
    /// chain. Only one motor at a time can use the daemon's transmitter.
    Waveform,
}

/// Cooperative cancellation for a running move.
///
/// The flag latches: once stopped, moves return immediately until
/// [`StopHandle::clear`] is called.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the wave chain that transmits `wave` exactly `steps` times.
///
/// The chain repeats `wave` in inner loops of 65535, nested in an outer loop,
/// followed by a single loop for the remainder.
///
/// # Errors
///
/// Returns `GpioError::InvalidParameter` if the wave id does not fit in a
/// chain byte or `steps` exceeds 65535 full inner loops.
pub fn wave_chain_for_steps(wave: WaveId, steps: u64) -> Result<Vec<u8>> {
    let id = u8::try_from(wave.0)
        .ok()
        .filter(|&id| id < 255)
        .ok_or_else(|| GpioError::InvalidParameter(format!("wave {} cannot be chained", wave.0)))?;
    let full = steps / CHAIN_LOOP_STEPS;
    let remainder = steps % CHAIN_LOOP_STEPS;
    if full > CHAIN_LOOP_STEPS {
        return Err(GpioError::InvalidParameter(format!(
            "{steps} steps is more than one wave chain can issue"
        )));
    }

    let mut chain = Vec::with_capacity(20);
    if full > 0 {
        chain.extend_from_slice(&[
            255,
            0,
            255,
            0,
            id,
            255,
            1,
            255,
            255,
            255,
            1,
            (full % 256) as u8,
            (full / 256) as u8,
        ]);
    }
    if remainder > 0 {
        chain.extend_from_slice(&[255, 0, id, 255, 1, (remainder % 256) as u8, (remainder / 256) as u8]);
    }
    Ok(chain)
}

/// High and low phase of one waveform step in microseconds.
///
/// # Errors
///
/// Returns `GpioError::InvalidParameter` if a phase does not fit in a pulse delay.
fn wave_phases(step_period: f64) -> Result<(u32, u32)> {
    let period_us = (step_period * 1e6).round() as u64;
    let high_us = (period_us / 2).max(1);
    let low_us = period_us.saturating_sub(high_us).max(1);
    match (u32::try_from(high_us), u32::try_from(low_us)) {
        (Ok(high), Ok(low)) => Ok((high, low)),
        _ => Err(GpioError::InvalidParameter(format!(
            "a step period of {step_period} s is too long for waveform timing"
        ))),
    }
}

/// Instant the last software step finishes when the train starts at `start`.
fn software_deadline(start: Instant, plan: &StepPlan) -> Result<Instant> {
    Duration::try_from_secs_f64(plan.duration())
        .ok()
        .and_then(|duration| start.checked_add(duration))
        .ok_or_else(|| {
            GpioError::InvalidParameter(format!("a move of {} s cannot be timed", plan.duration()))
        })
}

/// A stepper motor behind a step/direction driver board.
pub struct StepperMotor {
    daemon: DaemonHandle,
    pins: StepperPins,
    geometry: StepperGeometry,
    timing: StepTiming,
    limits: Option<(f64, f64)>,
    position: i64,
    rotation: Rotation,
    enabled: bool,
    stop: StopHandle,
}

impl StepperMotor {
    /// Set up the pins of a stepper driver.
    ///
    /// All pins become outputs, the direction pin is driven low and the
    /// enable pin, if any, high (motor released).
    ///
    /// # Errors
    ///
    /// * `GpioError::InvalidParameter` if a pin is invalid or repeated.
    /// * `GpioError::Connection`/`GpioError::Daemon` if the daemon rejects the setup.
    pub fn new(daemon: DaemonHandle, pins: StepperPins, geometry: StepperGeometry) -> Result<Self> {
        check_disjoint_pins(pins.all())?;
        for pin in pins.all() {
            daemon.set_mode(pin, PinMode::Output)?;
        }
        daemon.write(pins.direction, false)?;
        if let Some(enable) = pins.enable {
            daemon.write(enable, true)?;
        }
        debug!(step = pins.step, direction = pins.direction, "Stepper configured");
        Ok(StepperMotor {
            daemon,
            pins,
            geometry,
            timing: StepTiming::default(),
            limits: None,
            position: 0,
            rotation: Rotation::default(),
            enabled: false,
            stop: StopHandle::default(),
        })
    }

    /// Set up a stepper on a TMC2209 board.
    ///
    /// `pins.microstep` is either empty (select pins hard-wired) or `[MS2, MS1]`,
    /// which are driven to the levels selecting `microsteps`.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::InvalidParameter` if the board does not support
    /// `microsteps` or more than two microstep pins are given.
    pub fn tmc2209(daemon: DaemonHandle, pins: StepperPins, microsteps: u32, gear_ratio: f64) -> Result<Self> {
        let levels = tmc2209_microstep_levels(microsteps).ok_or_else(|| {
            GpioError::InvalidParameter(format!(
                "TMC2209 supports 8, 16, 32 or 64 microsteps, not {microsteps}"
            ))
        })?;
        if !(pins.microstep.is_empty() || pins.microstep.len() == 2) {
            return Err(GpioError::InvalidParameter(format!(
                "TMC2209 has two microstep pins, {} given",
                pins.microstep.len()
            )));
        }
        let geometry = StepperGeometry::new(TMC2209_FULL_STEPS_PER_TURN, microsteps, gear_ratio)?;
        let motor = StepperMotor::new(daemon, pins, geometry)?;
        for (&pin, level) in motor.pins.microstep.iter().zip(levels) {
            motor.daemon.write(pin, level)?;
        }
        Ok(motor)
    }

    /// Select how step pulses are timed.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::InvalidParameter` for waveform timing on a step pin
    /// the waveform engine cannot drive.
    pub fn with_timing(mut self, timing: StepTiming) -> Result<Self> {
        if timing == StepTiming::Waveform {
            check_wave_pin(self.pins.step)?;
        }
        self.timing = timing;
        Ok(self)
    }

    /// Refuse moves that would leave `[min, max]` degrees of output rotation.
    pub fn with_travel_limits(mut self, min: f64, max: f64) -> Result<Self> {
        if !(min <= max) {
            return Err(GpioError::InvalidParameter(format!(
                "travel limits [{min}, {max}] are empty"
            )));
        }
        self.limits = Some((min, max));
        Ok(self)
    }

    pub fn geometry(&self) -> &StepperGeometry {
        &self.geometry
    }

    pub fn pins(&self) -> &StepperPins {
        &self.pins
    }

    pub fn timing(&self) -> StepTiming {
        self.timing
    }

    /// Output position in degrees since construction or the last [`StepperMotor::set_zero`].
    pub fn position(&self) -> f64 {
        self.geometry.steps_to_angle(self.position)
    }

    /// Output position in microsteps.
    pub fn position_steps(&self) -> i64 {
        self.position
    }

    /// Declare the current position as zero.
    pub fn set_zero(&mut self) {
        self.position = 0;
    }

    /// Handle that cancels the running move from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Plan a move and check it against the travel limits. No pin is written.
    ///
    /// # Errors
    ///
    /// * `GpioError::Misuse` for a negative speed or a move leaving the travel limits.
    /// * `GpioError::InvalidParameter` for a non-positive time or a distance
    ///   move on a rotary stepper.
    pub fn plan(&self, command: &MoveCommand) -> Result<StepPlan> {
        let plan = command.plan(&self.geometry)?;
        self.check_limits(&plan)?;
        if plan.steps > 0 {
            self.check_timing(&plan)?;
        }
        Ok(plan)
    }

    fn check_limits(&self, plan: &StepPlan) -> Result<()> {
        if let Some((min, max)) = self.limits {
            let target = self.geometry.steps_to_angle(self.position.saturating_add(plan.signed_steps()));
            if target < min || target > max {
                return Err(GpioError::Misuse(format!(
                    "move to {target:.3}° leaves the travel limits [{min}, {max}]"
                )));
            }
        }
        Ok(())
    }

    /// Rotate by `angle` degrees (negative is clockwise) in `time` seconds.
    pub fn move_by_angle_in_time(&mut self, angle: f64, time: f64) -> Result<u64> {
        self.run(&MoveCommand::AngleInTime { angle, time })
    }

    /// Rotate by `angle` degrees at `speed` degrees/second.
    pub fn move_by_angle_at_speed(&mut self, angle: f64, speed: f64) -> Result<u64> {
        self.run(&MoveCommand::AngleAtSpeed { angle, speed })
    }

    /// Rotate counter-clockwise at `speed` degrees/second for `time` seconds.
    pub fn move_at_speed_for_time(&mut self, speed: f64, time: f64) -> Result<u64> {
        self.run(&MoveCommand::SpeedForTime { speed, time })
    }

    /// Travel `distance` meters along a lead screw in `time` seconds.
    pub fn move_by_distance_in_time(&mut self, distance: f64, time: f64) -> Result<u64> {
        self.run(&MoveCommand::DistanceInTime { distance, time })
    }

    /// Issue `steps` microsteps (negative is clockwise), `step_period` seconds apart.
    pub fn step(&mut self, steps: i64, step_period: f64) -> Result<u64> {
        if steps != 0 && !(step_period > 0.0 && step_period.is_finite()) {
            return Err(GpioError::InvalidParameter("step period must be positive".into()));
        }
        let plan = StepPlan {
            rotation: if steps < 0 { Rotation::Clockwise } else { Rotation::CounterClockwise },
            steps: steps.unsigned_abs(),
            step_period,
        };
        self.check_limits(&plan)?;
        self.run_plan(&plan)
    }

    /// Plan and issue a move. Returns the number of steps issued.
    pub fn run(&mut self, command: &MoveCommand) -> Result<u64> {
        let plan = self.plan(command)?;
        self.run_plan(&plan)
    }

    /// Issue an already planned move. Returns the number of steps issued,
    /// which is short of `plan.steps` only when the move was stopped.
    ///
    /// The plan is not checked against the travel limits; use [`StepperMotor::plan`].
    pub fn run_plan(&mut self, plan: &StepPlan) -> Result<u64> {
        if plan.steps == 0 {
            return Ok(0);
        }
        if self.stop.is_stopped() {
            warn!(step = self.pins.step, "Stepper is stopped, move skipped");
            return Ok(0);
        }
        self.check_timing(plan)?;

        self.daemon
            .write(self.pins.direction, plan.rotation == Rotation::CounterClockwise)?;
        self.rotation = plan.rotation;
        self.set_enabled(true)?;

        info!(
            step = self.pins.step,
            steps = plan.steps,
            step_period = plan.step_period,
            rotation = ?plan.rotation,
            timing = ?self.timing,
            "Stepper move started"
        );
        let started = Instant::now();
        let result = match self.timing {
            StepTiming::Software => self.step_in_software(plan),
            StepTiming::Waveform => self.step_with_waveform(plan),
        };
        let (issued, error) = match result {
            Ok(issued) => (issued, None),
            Err((issued, err)) => (issued, Some(err)),
        };
        self.position = self
            .position
            .saturating_add(plan.rotation.sign().saturating_mul(i64::try_from(issued).unwrap_or(i64::MAX)));

        let released = self.set_enabled(false);
        if let Some(err) = error {
            return Err(err);
        }
        released?;
        debug!(issued, elapsed = ?started.elapsed(), position = self.position(), "Stepper move finished");
        Ok(issued)
    }

    /// Reject step periods the selected timing cannot reproduce.
    fn check_timing(&self, plan: &StepPlan) -> Result<()> {
        if !(plan.step_period > 0.0 && plan.step_period.is_finite()) {
            return Err(GpioError::InvalidParameter("step period must be positive".into()));
        }
        match self.timing {
            StepTiming::Software => software_deadline(Instant::now(), plan).map(|_| ()),
            StepTiming::Waveform => wave_phases(plan.step_period).map(|_| ()),
        }
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if let Some(enable) = self.pins.enable {
            self.daemon.write(enable, !enabled)?;
        }
        self.enabled = enabled;
        Ok(())
    }

    /// Toggle the step pin through the daemon. On failure, returns the steps
    /// completed before the error.
    fn step_in_software(&self, plan: &StepPlan) -> std::result::Result<u64, (u64, GpioError)> {
        let sleeper = SpinSleeper::default();
        let start = Instant::now();
        let end = software_deadline(start, plan).map_err(|err| (0, err))?;
        let at = |offset: f64| {
            Duration::try_from_secs_f64(offset)
                .ok()
                .and_then(|offset| start.checked_add(offset))
                .map_or(end, |instant| instant.min(end))
        };
        for issued in 0..plan.steps {
            if self.stop.is_stopped() {
                debug!(issued, "Stepper move stopped");
                return Ok(issued);
            }
            let rising = plan.step_period * issued as f64;
            sleeper.sleep(at(rising).saturating_duration_since(Instant::now()));
            self.daemon.write(self.pins.step, true).map_err(|err| (issued, err))?;
            sleeper.sleep(at(rising + plan.step_period / 2.0).saturating_duration_since(Instant::now()));
            self.daemon.write(self.pins.step, false).map_err(|err| (issued, err))?;
        }
        sleeper.sleep(end.saturating_duration_since(Instant::now()));
        Ok(plan.steps)
    }

    /// Loop one step pulse with a wave chain and wait for the transmitter.
    fn step_with_waveform(&self, plan: &StepPlan) -> std::result::Result<u64, (u64, GpioError)> {
        let (high_us, low_us) = wave_phases(plan.step_period).map_err(|err| (0, err))?;
        let pulses = [Pulse::high(self.pins.step, high_us), Pulse::low(self.pins.step, low_us)];

        self.daemon.wave_add_generic(&pulses).map_err(|err| (0, err))?;
        let wave = self.daemon.wave_create().map_err(|err| (0, err))?;

        let started = Instant::now();
        let outcome = self.transmit_chain(wave, plan);
        let elapsed = started.elapsed().as_secs_f64();
        let issued = if plan.step_period > 0.0 {
            ((elapsed / plan.step_period) as u64).min(plan.steps)
        } else {
            0
        };

        let deleted = self.daemon.wave_delete(wave);
        match outcome {
            Ok(true) => {
                deleted.map_err(|err| (plan.steps, err))?;
                Ok(plan.steps)
            }
            Ok(false) => {
                deleted.map_err(|err| (issued, err))?;
                Ok(issued)
            }
            Err(err) => Err((issued, err)),
        }
    }

    /// Returns `Ok(true)` when the chain ran to completion, `Ok(false)` when stopped.
    fn transmit_chain(&self, wave: WaveId, plan: &StepPlan) -> Result<bool> {
        let chain = wave_chain_for_steps(wave, plan.steps)?;
        self.daemon.wave_chain(&chain)?;
        let poll = Duration::try_from_secs_f64(plan.step_period).map_or(MAX_POLL, |period| period.min(MAX_POLL));
        while self.daemon.wave_tx_busy()? {
            if self.stop.is_stopped() {
                self.daemon.wave_tx_stop()?;
                debug!("Stepper wave chain stopped");
                return Ok(false);
            }
            spin_sleep::sleep(poll);
        }
        Ok(true)
    }
}

impl MotorControl for StepperMotor {
    /// Release the motor: the enable pin goes high and the step pin low.
    fn stop(&mut self) -> Result<()> {
        self.daemon.write(self.pins.step, false)?;
        self.set_enabled(false)
    }

    fn state(&self) -> MotorState {
        MotorState {
            enabled: self.enabled,
            rotation: Some(self.rotation),
            position: Some(self.position()),
            pulse_width: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDaemon};

    const EPSILON: f64 = 1e-9;

    const STEP: Pin = 17;
    const DIR: Pin = 27;
    const ENABLE: Pin = 22;

    fn motor(timing: StepTiming) -> (Arc<MockDaemon>, StepperMotor) {
        let mock = Arc::new(MockDaemon::new());
        let pins = StepperPins::new(STEP, DIR).with_enable(ENABLE);
        let geometry = StepperGeometry::new(200, 1, 1.0).unwrap();
        let motor = StepperMotor::new(mock.clone(), pins, geometry)
            .unwrap()
            .with_timing(timing)
            .unwrap();
        mock.clear();
        (mock, motor)
    }

    #[test]
    fn test_new_releases_motor() {
        let mock = Arc::new(MockDaemon::new());
        let pins = StepperPins::new(STEP, DIR).with_enable(ENABLE);
        StepperMotor::new(mock.clone(), pins, StepperGeometry::new(200, 8, 1.0).unwrap()).unwrap();
        assert_eq!(mock.writes_to(ENABLE), vec![true]);
        assert_eq!(mock.writes_to(DIR), vec![false]);
    }

    #[test]
    fn test_new_rejects_repeated_pin() {
        let daemon: DaemonHandle = Arc::new(MockDaemon::new());
        let pins = StepperPins::new(STEP, STEP);
        let result = StepperMotor::new(daemon, pins, StepperGeometry::new(200, 8, 1.0).unwrap());
        assert!(matches!(result, Err(GpioError::InvalidParameter(_))));
    }

    #[test]
    fn test_software_move_issues_planned_steps() {
        let (mock, mut motor) = motor(StepTiming::Software);
        // 18 degrees on a 1.8 degree motor: 10 steps in 10 ms.
        let issued = motor.move_by_angle_in_time(18.0, 0.01).unwrap();
        assert_eq!(issued, 10);
        assert_eq!(mock.rising_edges(STEP), 10);
        assert_eq!(mock.writes_to(DIR), vec![true]);
        // Enabled (low) for the move, released (high) after.
        assert_eq!(mock.writes_to(ENABLE), vec![false, true]);
        assert!((motor.position() - 18.0).abs() < EPSILON);
    }

    #[test]
    fn test_clockwise_move_sets_direction_low() {
        let (mock, mut motor) = motor(StepTiming::Software);
        motor.move_by_angle_at_speed(-3.6, 3_600.0).unwrap();
        assert_eq!(mock.writes_to(DIR), vec![false]);
        assert_eq!(motor.position_steps(), -2);
        assert_eq!(motor.state().rotation, Some(Rotation::Clockwise));
    }

    #[test]
    fn test_negative_speed_is_misuse_without_writes() {
        let (mock, mut motor) = motor(StepTiming::Software);
        assert!(matches!(motor.move_by_angle_at_speed(90.0, -1.0), Err(GpioError::Misuse(_))));
        assert!(matches!(motor.move_at_speed_for_time(-1.0, 1.0), Err(GpioError::Misuse(_))));
        assert!(matches!(
            motor.move_by_angle_in_time(90.0, 0.0),
            Err(GpioError::InvalidParameter(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_zero_angle_issues_nothing() {
        let (mock, mut motor) = motor(StepTiming::Software);
        assert_eq!(motor.move_by_angle_in_time(0.0, 1.0).unwrap(), 0);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_travel_limits_reject_move_without_writes() {
        let (mock, motor) = motor(StepTiming::Software);
        let mut motor = motor.with_travel_limits(-10.0, 10.0).unwrap();
        assert!(matches!(motor.move_by_angle_in_time(12.6, 1.0), Err(GpioError::Misuse(_))));
        assert!(matches!(motor.step(-6, 0.001), Err(GpioError::Misuse(_))));
        assert!(mock.calls().is_empty());
        motor.step(5, 0.0005).unwrap();
        assert!((motor.position() - 9.0).abs() < EPSILON);
        assert!(motor.with_travel_limits(1.0, -1.0).is_err());
    }

    #[test]
    fn test_distance_move_on_rotary_stepper_fails() {
        let (_mock, mut motor) = motor(StepTiming::Software);
        assert!(matches!(
            motor.move_by_distance_in_time(0.01, 1.0),
            Err(GpioError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stopped_motor_skips_move() {
        let (mock, mut motor) = motor(StepTiming::Software);
        let handle = motor.stop_handle();
        handle.stop();
        assert_eq!(motor.move_by_angle_in_time(18.0, 0.01).unwrap(), 0);
        assert!(mock.calls().is_empty());
        handle.clear();
        assert_eq!(motor.move_by_angle_in_time(1.8, 0.001).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_still_releases_motor() {
        let (mock, mut motor) = motor(StepTiming::Software);
        mock.fail_writes_to(STEP);
        assert!(matches!(motor.step(3, 0.001), Err(GpioError::Daemon { .. })));
        assert_eq!(mock.writes_to(ENABLE), vec![false, true]);
        assert_eq!(motor.position_steps(), 0);
    }

    #[test]
    fn test_waveform_move_uses_chain() {
        let (mock, mut motor) = motor(StepTiming::Waveform);
        mock.stay_busy_for(1);
        let issued = motor.step(-70_000, 0.001).unwrap();
        assert_eq!(issued, 70_000);
        assert_eq!(motor.position_steps(), -70_000);
        let calls = mock.calls();
        assert!(calls.contains(&Call::WaveAddGeneric(vec![
            Pulse::high(STEP, 500),
            Pulse::low(STEP, 500),
        ])));
        assert!(calls.contains(&Call::WaveChain(wave_chain_for_steps(WaveId(0), 70_000).unwrap())));
        assert_eq!(calls.iter().filter(|c| **c == Call::WaveTxBusy).count(), 2);
        assert!(calls.contains(&Call::WaveDelete(WaveId(0))));
    }

    #[test]
    fn test_waveform_rejects_step_period_beyond_pulse_delay() {
        let (mock, mut motor) = motor(StepTiming::Waveform);
        // 10 000 s per step: each phase is 5e9 µs, past a pulse delay.
        assert!(matches!(motor.step(1, 10_000.0), Err(GpioError::InvalidParameter(_))));
        assert!(matches!(
            motor.move_by_angle_in_time(1.8, 10_000.0),
            Err(GpioError::InvalidParameter(_))
        ));
        assert!(mock.calls().is_empty());
        assert_eq!(motor.position_steps(), 0);
    }

    #[test]
    fn test_wave_phases() {
        assert_eq!(wave_phases(0.001).unwrap(), (500, 500));
        assert_eq!(wave_phases(0.000_000_1).unwrap(), (1, 1));
        assert_eq!(wave_phases(0.003).unwrap(), (1_500, 1_500));
        // Largest period whose phases still fit.
        assert!(wave_phases(8_589.0).is_ok());
        assert!(wave_phases(8_590.0).is_err());
    }

    #[test]
    fn test_software_rejects_untimeable_move() {
        let (mock, mut motor) = motor(StepTiming::Software);
        assert!(matches!(motor.step(1, 1e20), Err(GpioError::InvalidParameter(_))));
        assert!(matches!(motor.step(3, f64::MAX), Err(GpioError::InvalidParameter(_))));
        assert!(matches!(
            motor.move_by_angle_at_speed(1.8, 1e-300),
            Err(GpioError::InvalidParameter(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_run_plan_checks_step_period() {
        let (mock, mut motor) = motor(StepTiming::Software);
        let plan = StepPlan { rotation: Rotation::CounterClockwise, steps: 4, step_period: f64::NAN };
        assert!(matches!(motor.run_plan(&plan), Err(GpioError::InvalidParameter(_))));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_waveform_timing_needs_low_pin() {
        let daemon: DaemonHandle = Arc::new(MockDaemon::new());
        let motor = StepperMotor::new(daemon, StepperPins::new(40, 41), StepperGeometry::new(200, 1, 1.0).unwrap())
            .unwrap();
        assert!(motor.with_timing(StepTiming::Waveform).is_err());
    }

    #[test]
    fn test_tmc2209_sets_microstep_pins() {
        let mock = Arc::new(MockDaemon::new());
        let pins = StepperPins::new(STEP, DIR).with_microstep(vec![5, 6]);
        let motor = StepperMotor::tmc2209(mock.clone(), pins, 64, 2.0).unwrap();
        assert_eq!(mock.writes_to(5), vec![true]);
        assert_eq!(mock.writes_to(6), vec![false]);
        assert!((motor.geometry().steps_per_output_turn() - 25_600.0).abs() < EPSILON);

        let daemon: DaemonHandle = Arc::new(MockDaemon::new());
        assert!(StepperMotor::tmc2209(daemon.clone(), StepperPins::new(STEP, DIR), 4, 1.0).is_err());
        let three = StepperPins::new(STEP, DIR).with_microstep(vec![5, 6, 13]);
        assert!(StepperMotor::tmc2209(daemon, three, 8, 1.0).is_err());
    }

    #[test]
    fn test_wave_chain_encoding() {
        assert_eq!(wave_chain_for_steps(WaveId(3), 0).unwrap(), Vec::<u8>::new());
        assert_eq!(wave_chain_for_steps(WaveId(3), 300).unwrap(), vec![255, 0, 3, 255, 1, 44, 1]);
        assert_eq!(
            wave_chain_for_steps(WaveId(3), 65_535).unwrap(),
            vec![255, 0, 255, 0, 3, 255, 1, 255, 255, 255, 1, 1, 0]
        );
        assert_eq!(
            wave_chain_for_steps(WaveId(3), 65_536).unwrap(),
            vec![255, 0, 255, 0, 3, 255, 1, 255, 255, 255, 1, 1, 0, 255, 0, 3, 255, 1, 1, 0]
        );
    }

    #[test]
    fn test_wave_chain_limits() {
        assert!(wave_chain_for_steps(WaveId(255), 10).is_err());
        assert!(wave_chain_for_steps(WaveId(0), 65_535 * 65_536).is_err());
        assert!(wave_chain_for_steps(WaveId(0), 65_535 * 65_535 + 1).is_ok());
    }

    #[test]
    fn test_stop_releases_motor() {
        let (mock, mut motor) = motor(StepTiming::Software);
        motor.stop().unwrap();
        assert_eq!(mock.writes_to(ENABLE), vec![true]);
        assert!(!motor.state().enabled);
    }
}
