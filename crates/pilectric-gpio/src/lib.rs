#![doc = "Raspberry Pi pin control through the pigpio daemon."]
#![doc = ""]
#![doc = "Drivers for PWM waveforms, stepper, servo and brushless motors, and push"]
#![doc = "switches. Every driver takes an explicit [`daemon::DaemonHandle`]; build one"]
#![doc = "with [`daemon::PigpioClient`] on a Pi, or with `mock::MockDaemon` in tests."]

pub mod controller;
pub mod daemon;
pub mod error;
pub mod esc;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pwm;
pub mod servo;
pub mod stepper;
pub mod switch;
pub mod traits;

pub use controller::StepperController;
pub use daemon::{DaemonHandle, Pin, PigpioClient, PinDaemon};
pub use error::{GpioError, Result};
pub use esc::{ElectronicSpeedController, EscPrompt, EscTimings};
pub use pwm::{PinSettings, Pwm};
pub use servo::{Servo, ServoController, ServoModel};
pub use stepper::{StepTiming, StepperMotor, StepperPins, StopHandle};
pub use switch::{EmergencyStop, Switch, SwitchWiring};
pub use traits::{MotorControl, MotorState};
