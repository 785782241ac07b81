//! How JSON-RPC bodies reach the camera.

use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use crate::error::{CameraError, Result};

/// Posts one JSON body to `url` and returns the decoded JSON answer.
pub trait Transport: Send {
    fn post(&mut self, url: &str, body: &Value) -> Result<Value>;
}

/// Plain HTTP transport.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Transport whose requests give up after `timeout`.
    ///
    /// Long exposures keep `actTakePicture` open for the whole exposure, so
    /// the timeout must exceed the longest shutter speed in use.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        HttpTransport { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new(Duration::from_secs(60))
    }
}

impl Transport for HttpTransport {
    fn post(&mut self, url: &str, body: &Value) -> Result<Value> {
        trace!(url, %body, "POST");
        let response = self.agent.post(url).send_json(body).map_err(|err| match err {
            ureq::Error::Status(status, _) => CameraError::Connection(format!("{url} answered HTTP {status}")),
            ureq::Error::Transport(transport) => CameraError::Connection(transport.to_string()),
        })?;
        response.into_json::<Value>().map_err(|err| CameraError::InvalidResponse {
            method: url.to_string(),
            detail: format!("JSON parse error: {err}"),
        })
    }
}
