//! Push switches and an emergency stop built on one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spin_sleep::SpinSleeper;
use tracing::{error, info};

use crate::daemon::{DaemonHandle, Pin, PinMode, Pull, check_pin};
use crate::error::{GpioError, Result};
use crate::stepper::StopHandle;

/// How the switch is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchWiring {
    /// Between the pin and ground; the pin is pulled up and reads low when pressed.
    #[default]
    ToGround,
    /// Between the pin and 3.3 V; the pin is pulled down and reads high when pressed.
    ToSupply,
}

/// A push switch on one input pin.
pub struct Switch {
    daemon: DaemonHandle,
    pin: Pin,
    wiring: SwitchWiring,
}

impl Switch {
    pub fn new(daemon: DaemonHandle, pin: Pin, wiring: SwitchWiring) -> Result<Self> {
        check_pin(pin)?;
        daemon.set_mode(pin, PinMode::Input)?;
        let pull = match wiring {
            SwitchWiring::ToGround => Pull::Up,
            SwitchWiring::ToSupply => Pull::Down,
        };
        daemon.set_pull(pin, pull)?;
        Ok(Switch { daemon, pin, wiring })
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn pressed(&self) -> Result<bool> {
        let high = self.daemon.read(self.pin)?;
        Ok(high ^ (self.wiring == SwitchWiring::ToGround))
    }
}

/// Watches a switch on a background thread and stops motors while it is pressed.
///
/// A failed read counts as pressed.
pub struct EmergencyStop {
    triggered: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EmergencyStop {
    /// Start polling `switch` every `poll`.
    pub fn spawn(switch: Switch, targets: Vec<StopHandle>, poll: Duration) -> Result<Self> {
        let triggered = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("emergency-stop".into())
            .spawn({
                let triggered = Arc::clone(&triggered);
                let shutdown = Arc::clone(&shutdown);
                move || {
                    info!(pin = switch.pin(), "Emergency stop armed");
                    let sleeper = SpinSleeper::default();
                    while !shutdown.load(Ordering::SeqCst) {
                        let pressed = switch.pressed().unwrap_or_else(|err| {
                            error!(%err, "Emergency stop could not read its switch");
                            true
                        });
                        if pressed {
                            if !triggered.swap(true, Ordering::SeqCst) {
                                error!(pin = switch.pin(), "Emergency stop pressed, stopping motors");
                            }
                            for target in &targets {
                                target.stop();
                            }
                        }
                        sleeper.sleep(poll);
                    }
                }
            })
            .map_err(GpioError::Spawn)?;
        Ok(EmergencyStop { triggered, shutdown, thread: Some(thread) })
    }

    /// Whether the switch has been pressed since the watch started.
    pub fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Stop watching. Motors already stopped stay stopped.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Emergency stop thread panicked");
            }
        }
    }
}

impl Drop for EmergencyStop {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDaemon};
    use std::time::Instant;

    #[test]
    fn test_switch_setup_and_polarity() {
        let mock = Arc::new(MockDaemon::new());
        let switch = Switch::new(mock.clone(), 26, SwitchWiring::ToGround).unwrap();
        assert_eq!(
            mock.calls(),
            vec![Call::SetMode(26, PinMode::Input), Call::SetPull(26, Pull::Up)]
        );
        mock.set_level(26, true);
        assert!(!switch.pressed().unwrap());
        mock.set_level(26, false);
        assert!(switch.pressed().unwrap());

        let to_supply = Switch::new(mock.clone(), 19, SwitchWiring::ToSupply).unwrap();
        mock.set_level(19, true);
        assert!(to_supply.pressed().unwrap());
    }

    #[test]
    fn test_emergency_stop_fires_stop_handles() {
        let mock = Arc::new(MockDaemon::new());
        mock.set_level(26, true);
        let switch = Switch::new(mock.clone(), 26, SwitchWiring::ToGround).unwrap();
        let handle = StopHandle::default();
        let estop = EmergencyStop::spawn(switch, vec![handle.clone()], Duration::from_millis(1)).unwrap();
        assert!(!handle.is_stopped());

        mock.set_level(26, false);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.is_stopped());
        assert!(estop.triggered());
        estop.shutdown();
    }
}
