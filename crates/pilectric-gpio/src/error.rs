//! Error types for pin and motor control.

use pilectric_units::UnitsError;
use thiserror::Error;

/// Errors raised by the daemon client, waveform generator and motor drivers.
#[derive(Debug, Error)]
pub enum GpioError {
    /// A value outside of what the device or driver accepts.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A per-motor argument list whose length differs from the number of motors.
    #[error("expected {expected} values, one per motor, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// A request the contract does not define, such as a negative speed.
    #[error("misuse: {0}")]
    Misuse(String),
    /// The daemon socket could not be opened, written or read.
    #[error("pin-control daemon connection failed: {0}")]
    Connection(#[from] std::io::Error),
    /// The daemon answered a command with a negative status.
    #[error("pin-control daemon rejected {command}: error {code}")]
    Daemon { command: &'static str, code: i32 },
    /// The daemon did not reach an expected state in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// A motor thread could not be started.
    #[error("failed to spawn motor thread: {0}")]
    Spawn(std::io::Error),
    /// A motor thread panicked during a simultaneous move.
    #[error("motor thread {index} panicked")]
    ThreadPanicked { index: usize },
}

impl From<UnitsError> for GpioError {
    fn from(err: UnitsError) -> Self {
        match err {
            UnitsError::NegativeSpeed(msg) => GpioError::Misuse(msg.to_string()),
            other => GpioError::InvalidParameter(other.to_string()),
        }
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, GpioError>;
