#![doc = "Remote camera control and time-lapse capture."]
#![doc = ""]
#![doc = "Cameras implement the [`Camera`] trait; [`SonyCamera`] drives Sony bodies"]
#![doc = "over the Camera Remote API. An [`Intervalometer`] takes a series of pictures"]
#![doc = "on a background thread with a fixed pause between them."]

pub mod camera;
pub mod error;
pub mod intervalometer;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod sensor;
pub mod sony;

pub use camera::{Camera, ShutterSpeed};
pub use error::{CameraError, Result};
pub use intervalometer::{Intervalometer, RunState};
pub use sensor::{APS_C, FULL_FRAME, Sensor};
pub use sony::{SonyCamera, SonyConfig, SonyModel};
