//! Simultaneous moves of several steppers.

use std::thread;

use parking_lot::{Condvar, Mutex};
use pilectric_units::{MoveCommand, StepPlan};
use tracing::{debug, info};

use crate::daemon::check_disjoint_pins;
use crate::error::{GpioError, Result};
use crate::stepper::{StepTiming, StepperMotor, StopHandle};

/// Holds motor threads until every one of them has been spawned.
///
/// Opening with `false` releases the threads without moving, so a failed
/// spawn never leaves the others waiting.
#[derive(Default)]
struct StartGate {
    state: Mutex<Option<bool>>,
    opened: Condvar,
}

impl StartGate {
    fn open(&self, go: bool) {
        *self.state.lock() = Some(go);
        self.opened.notify_all();
    }

    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if let Some(go) = *state {
                return go;
            }
            self.opened.wait(&mut state);
        }
    }
}

/// An ordered group of steppers moved together.
///
/// Per-motor argument lists are matched to motors by position. Every command is
/// planned and checked before any pin is written; then each motor runs on its
/// own thread. The step trains start together but are not kept in lockstep.
pub struct StepperController {
    motors: Vec<StepperMotor>,
}

impl StepperController {
    /// Group `motors`.
    ///
    /// # Errors
    ///
    /// Returns `GpioError::InvalidParameter` if two motors share a pin or more
    /// than one motor uses waveform timing; the daemon has a single transmitter.
    pub fn new(motors: Vec<StepperMotor>) -> Result<Self> {
        check_disjoint_pins(motors.iter().flat_map(|motor| motor.pins().all()))?;
        let waveform = motors
            .iter()
            .filter(|motor| motor.timing() == StepTiming::Waveform)
            .count();
        if waveform > 1 {
            return Err(GpioError::InvalidParameter(format!(
                "{waveform} motors use waveform timing, at most one can"
            )));
        }
        Ok(StepperController { motors })
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    pub fn motors(&self) -> &[StepperMotor] {
        &self.motors
    }

    pub fn motor_mut(&mut self, index: usize) -> Option<&mut StepperMotor> {
        self.motors.get_mut(index)
    }

    pub fn into_motors(self) -> Vec<StepperMotor> {
        self.motors
    }

    /// One stop handle per motor, in order.
    pub fn stop_handles(&self) -> Vec<StopHandle> {
        self.motors.iter().map(StepperMotor::stop_handle).collect()
    }

    /// Stop every running move.
    pub fn stop(&self) {
        for handle in self.stop_handles() {
            handle.stop();
        }
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.motors.len() {
            return Err(GpioError::SizeMismatch { expected: self.motors.len(), actual });
        }
        Ok(())
    }

    /// Rotate each motor by its angle in degrees, all taking `time` seconds.
    pub fn move_by_angles_in_time(&mut self, angles: &[f64], time: f64) -> Result<Vec<u64>> {
        self.check_len(angles.len())?;
        let commands: Vec<MoveCommand> = angles
            .iter()
            .map(|&angle| MoveCommand::AngleInTime { angle, time })
            .collect();
        self.run(&commands)
    }

    /// Rotate each motor counter-clockwise at its speed in degrees/second for `time` seconds.
    pub fn move_at_speeds_for_time(&mut self, speeds: &[f64], time: f64) -> Result<Vec<u64>> {
        self.check_len(speeds.len())?;
        let commands: Vec<MoveCommand> = speeds
            .iter()
            .map(|&speed| MoveCommand::SpeedForTime { speed, time })
            .collect();
        self.run(&commands)
    }

    /// Move each motor by its distance in `time` seconds.
    ///
    /// Distances are meters for motors with a screw pitch and degrees for
    /// rotary motors.
    pub fn move_by_distances_in_time(&mut self, distances: &[f64], time: f64) -> Result<Vec<u64>> {
        self.check_len(distances.len())?;
        let commands: Vec<MoveCommand> = self
            .motors
            .iter()
            .zip(distances)
            .map(|(motor, &distance)| match motor.geometry().pitch() {
                Some(_) => MoveCommand::DistanceInTime { distance, time },
                None => MoveCommand::AngleInTime { angle: distance, time },
            })
            .collect();
        self.run(&commands)
    }

    /// Run one command per motor simultaneously. Returns the steps each motor issued.
    ///
    /// # Errors
    ///
    /// * `GpioError::SizeMismatch` if `commands` and motors differ in number.
    /// * Any planning error, before a pin is written.
    /// * The first motor error, by motor order, once every thread has finished.
    pub fn run(&mut self, commands: &[MoveCommand]) -> Result<Vec<u64>> {
        self.check_len(commands.len())?;
        let plans = self
            .motors
            .iter()
            .zip(commands)
            .map(|(motor, command)| motor.plan(command))
            .collect::<Result<Vec<StepPlan>>>()?;

        info!(motors = plans.len(), "Simultaneous stepper move started");
        let gate = StartGate::default();
        let results = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(plans.len());
            for (index, (motor, plan)) in self.motors.iter_mut().zip(&plans).enumerate() {
                let gate = &gate;
                let spawned = thread::Builder::new()
                    .name(format!("stepper-{index}"))
                    .spawn_scoped(scope, move || {
                        if !gate.wait() {
                            return Ok(0);
                        }
                        motor.run_plan(plan)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        gate.open(false);
                        return Err(GpioError::Spawn(err));
                    }
                }
            }
            gate.open(true);
            Ok(handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(GpioError::ThreadPanicked { index }))
                })
                .collect::<Vec<_>>())
        })?;

        let issued = results.into_iter().collect::<Result<Vec<u64>>>()?;
        debug!(?issued, "Simultaneous stepper move finished");
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonHandle, Pin};
    use crate::mock::MockDaemon;
    use crate::stepper::{StepTiming, StepperPins};
    use pilectric_units::StepperGeometry;
    use std::sync::Arc;

    fn stepper(daemon: DaemonHandle, step: Pin, direction: Pin) -> StepperMotor {
        StepperMotor::new(daemon, StepperPins::new(step, direction), StepperGeometry::new(200, 1, 1.0).unwrap())
            .unwrap()
    }

    fn controller() -> (Arc<MockDaemon>, StepperController) {
        let mock = Arc::new(MockDaemon::new());
        let motors = vec![stepper(mock.clone(), 17, 27), stepper(mock.clone(), 23, 24)];
        let controller = StepperController::new(motors).unwrap();
        mock.clear();
        (mock, controller)
    }

    #[test]
    fn test_size_mismatch_writes_nothing() {
        let (mock, mut controller) = controller();
        let err = controller.move_by_angles_in_time(&[90.0], 1.0).unwrap_err();
        assert!(matches!(err, GpioError::SizeMismatch { expected: 2, actual: 1 }));
        assert!(matches!(
            controller.move_at_speeds_for_time(&[1.0, 2.0, 3.0], 1.0),
            Err(GpioError::SizeMismatch { expected: 2, actual: 3 })
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_invalid_command_writes_nothing() {
        let (mock, mut controller) = controller();
        assert!(matches!(
            controller.move_at_speeds_for_time(&[90.0, -90.0], 1.0),
            Err(GpioError::Misuse(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_untimeable_step_period_writes_nothing() {
        let mock = Arc::new(MockDaemon::new());
        let waveform = stepper(mock.clone(), 17, 27).with_timing(StepTiming::Waveform).unwrap();
        let mut controller = StepperController::new(vec![stepper(mock.clone(), 23, 24), waveform]).unwrap();
        mock.clear();
        assert!(matches!(
            controller.move_by_angles_in_time(&[1.8, 1.8], 10_000.0),
            Err(GpioError::InvalidParameter(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_simultaneous_move_steps_every_motor() {
        let (mock, mut controller) = controller();
        let issued = controller.move_by_angles_in_time(&[18.0, -9.0], 0.01).unwrap();
        assert_eq!(issued, vec![10, 5]);
        assert_eq!(mock.rising_edges(17), 10);
        assert_eq!(mock.rising_edges(23), 5);
        assert_eq!(mock.writes_to(24), vec![false]);
        assert_eq!(controller.motors()[1].position_steps(), -5);
    }

    #[test]
    fn test_distances_on_rotary_motors_are_degrees() {
        let (mock, mut controller) = controller();
        controller.move_by_distances_in_time(&[3.6, 0.0], 0.01).unwrap();
        assert_eq!(mock.rising_edges(17), 2);
        assert_eq!(mock.rising_edges(23), 0);
    }

    #[test]
    fn test_first_error_is_returned() {
        let (mock, mut controller) = controller();
        mock.fail_writes_to(23);
        let err = controller.move_by_angles_in_time(&[3.6, 3.6], 0.01).unwrap_err();
        assert!(matches!(err, GpioError::Daemon { .. }));
        // The healthy motor still completed its move.
        assert_eq!(mock.rising_edges(17), 2);
    }

    #[test]
    fn test_new_rejects_shared_pins_and_two_waveform_motors() {
        let daemon: DaemonHandle = Arc::new(MockDaemon::new());
        let shared = vec![stepper(daemon.clone(), 17, 27), stepper(daemon.clone(), 17, 24)];
        assert!(matches!(StepperController::new(shared), Err(GpioError::InvalidParameter(_))));

        let waveform = vec![
            stepper(daemon.clone(), 17, 27).with_timing(StepTiming::Waveform).unwrap(),
            stepper(daemon, 23, 24).with_timing(StepTiming::Waveform).unwrap(),
        ];
        assert!(matches!(StepperController::new(waveform), Err(GpioError::InvalidParameter(_))));
    }

    #[test]
    fn test_stop_skips_moves() {
        let (mock, mut controller) = controller();
        controller.stop();
        assert_eq!(controller.move_by_angles_in_time(&[18.0, 18.0], 0.01).unwrap(), vec![0, 0]);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_gate_cancel_releases_waiters() {
        let gate = StartGate::default();
        thread::scope(|scope| {
            let waiter = scope.spawn(|| gate.wait());
            gate.open(false);
            assert!(!waiter.join().unwrap());
        });
    }
}
