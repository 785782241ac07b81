//! Error types for camera control.

use pilectric_units::UnitsError;
use thiserror::Error;

/// Errors raised by cameras and the intervalometer.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The camera could not be reached, after any configured retries.
    #[error("camera connection failed: {0}")]
    Connection(String),
    /// The camera answered a call with an error.
    #[error("camera rejected {method}: error {code} ({message})")]
    Api { method: String, code: i64, message: String },
    /// The camera answered with something that could not be understood.
    #[error("unexpected response to {method}: {detail}")]
    InvalidResponse { method: String, detail: String },
    /// A value outside of what the camera or intervalometer accepts.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Retrying was given up because the caller cancelled.
    #[error("{0} cancelled")]
    Cancelled(String),
    /// The intervalometer thread could not be started.
    #[error("failed to spawn intervalometer thread: {0}")]
    Spawn(std::io::Error),
}

impl From<UnitsError> for CameraError {
    fn from(err: UnitsError) -> Self {
        CameraError::InvalidParameter(err.to_string())
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, CameraError>;
