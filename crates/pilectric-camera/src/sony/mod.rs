//! Sony cameras over the Camera Remote API.
//!
//! The camera runs a JSON-RPC service on its own Wi-Fi access point. Every
//! call is a POST of `{"method", "params", "id", "version"}`; the answer holds
//! either `result`, a list of values, or `error`, a `[code, message]` pair.

pub mod transport;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::camera::{Camera, ShutterSpeed};
use crate::error::{CameraError, Result};
use crate::sensor::{APS_C, FULL_FRAME, Sensor};

pub use transport::{HttpTransport, Transport};

/// Endpoint of the camera service on the camera's own access point.
pub const DEFAULT_ENDPOINT: &str = "http://192.168.122.1:8080/sony/camera";

/// Error code for a call the camera cannot serve right now.
pub const ERROR_NOT_AVAILABLE: i64 = 1;
/// Error code while the camera is still busy with a previous command.
pub const ERROR_NOT_READY: i64 = 40401;
/// Error code from `actTakePicture` when the exposure outlasts the request.
pub const ERROR_LONG_SHOOTING: i64 = 40403;

const AUTO_ISO: &str = "AUTO";

/// Longest stretch a retry pause sleeps before checking for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Supported camera bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SonyModel {
    /// Any camera speaking the Remote API; assumed full frame.
    #[default]
    Generic,
    A6000,
    A6100,
    A6300,
    A6400,
    A6500,
    A6600,
}

impl SonyModel {
    pub const ALL: [SonyModel; 7] = [
        SonyModel::Generic,
        SonyModel::A6000,
        SonyModel::A6100,
        SonyModel::A6300,
        SonyModel::A6400,
        SonyModel::A6500,
        SonyModel::A6600,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SonyModel::Generic => "sony",
            SonyModel::A6000 => "a6000",
            SonyModel::A6100 => "a6100",
            SonyModel::A6300 => "a6300",
            SonyModel::A6400 => "a6400",
            SonyModel::A6500 => "a6500",
            SonyModel::A6600 => "a6600",
        }
    }

    pub fn sensor(self) -> Sensor {
        match self {
            SonyModel::Generic => FULL_FRAME,
            _ => APS_C,
        }
    }
}

impl fmt::Display for SonyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SonyModel {
    type Err = CameraError;

    fn from_str(name: &str) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        SonyModel::ALL
            .into_iter()
            .find(|model| model.name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = SonyModel::ALL.iter().map(|model| model.name()).collect();
                CameraError::InvalidParameter(format!("unknown camera '{name}', expected one of {}", known.join(", ")))
            })
    }
}

/// Connection and behaviour settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SonyConfig {
    pub endpoint: String,
    pub model: SonyModel,
    /// Extra attempts after a failed connection or picture.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Replace `AUTO` ISO with the metered value whenever it is read.
    pub disable_auto_iso: bool,
    /// Applied once connected.
    pub iso: Option<u32>,
    /// Applied once connected.
    pub shutter_speed: Option<ShutterSpeed>,
}

impl Default for SonyConfig {
    fn default() -> Self {
        SonyConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: SonyModel::default(),
            retry_attempts: 1,
            retry_delay: Duration::from_secs(1),
            disable_auto_iso: true,
            iso: None,
            shutter_speed: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Vec<Value>,
    id: u64,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<(i64, String)>,
}

fn is_retryable(err: &CameraError) -> bool {
    match err {
        CameraError::Connection(_) => true,
        CameraError::Api { code, .. } => matches!(*code, ERROR_NOT_AVAILABLE | ERROR_NOT_READY),
        _ => false,
    }
}

/// A connected Sony camera.
pub struct SonyCamera<T: Transport = HttpTransport> {
    transport: T,
    config: SonyConfig,
    next_id: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl SonyCamera<HttpTransport> {
    /// Connect over HTTP and switch the camera to remote shooting.
    pub fn connect(config: SonyConfig) -> Result<Self> {
        SonyCamera::with_transport(HttpTransport::default(), config)
    }
}

impl<T: Transport> SonyCamera<T> {
    /// Connect through `transport`, retrying as configured, then apply the
    /// configured ISO and shutter speed.
    pub fn with_transport(transport: T, config: SonyConfig) -> Result<Self> {
        SonyCamera::open(SonyCamera { transport, config, next_id: 1, cancel: None })
    }

    /// Like [`SonyCamera::with_transport`], but every retry loop gives up with
    /// `CameraError::Cancelled` once `cancel` is set.
    pub fn with_cancellable_transport(transport: T, config: SonyConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        SonyCamera::open(SonyCamera { transport, config, next_id: 1, cancel: Some(cancel) })
    }

    fn open(mut camera: Self) -> Result<Self> {
        camera.with_retry("startRecMode", |camera| camera.call("startRecMode", vec![]).map(drop))?;
        info!(endpoint = %camera.config.endpoint, model = %camera.config.model, "Connected to camera");

        if let Some(shutter_speed) = camera.config.shutter_speed {
            camera.set_shutter_speed(shutter_speed)?;
        }
        if let Some(iso) = camera.config.iso {
            camera.set_iso(iso)?;
        }
        Ok(camera)
    }

    pub fn config(&self) -> &SonyConfig {
        &self.config
    }

    pub fn model(&self) -> SonyModel {
        self.config.model
    }

    /// Call `method` and return the `result` list.
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Vec<Value>> {
        let id = self.next_id;
        self.next_id += 1;
        let request = serde_json::to_value(RpcRequest { method, params, id, version: "1.0" }).map_err(|err| {
            CameraError::InvalidParameter(format!("{method} parameters do not encode: {err}"))
        })?;
        debug!(method, id, "Camera call");

        let answer = self.transport.post(&self.config.endpoint, &request)?;
        let response: RpcResponse = serde_json::from_value(answer).map_err(|err| CameraError::InvalidResponse {
            method: method.to_string(),
            detail: format!("JSON parse error: {err}"),
        })?;
        match response {
            RpcResponse { error: Some((code, message)), .. } => Err(CameraError::Api {
                method: method.to_string(),
                code,
                message,
            }),
            RpcResponse { result: Some(result), .. } => Ok(result),
            _ => Err(CameraError::InvalidResponse {
                method: method.to_string(),
                detail: "neither result nor error".into(),
            }),
        }
    }

    fn call_for_string(&mut self, method: &str) -> Result<String> {
        let result = self.call(method, vec![])?;
        match result.first().and_then(Value::as_str) {
            Some(value) => Ok(value.to_string()),
            None => Err(CameraError::InvalidResponse {
                method: method.to_string(),
                detail: format!("expected a string, got {result:?}"),
            }),
        }
    }

    fn call_for_status(&mut self, method: &str, params: Vec<Value>) -> Result<()> {
        let result = self.call(method, params)?;
        match result.first().and_then(Value::as_i64) {
            Some(0) => Ok(()),
            _ => Err(CameraError::InvalidResponse {
                method: method.to_string(),
                detail: format!("expected status 0, got {result:?}"),
            }),
        }
    }

    /// Run `op` once plus up to `retry_attempts` more times while it fails
    /// with a connection or availability error.
    fn with_retry<R>(&mut self, what: &str, mut op: impl FnMut(&mut Self) -> Result<R>) -> Result<R> {
        let attempts = self.config.retry_attempts + 1;
        let mut attempt = 1;
        loop {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) => {
                    if attempt >= attempts {
                        return Err(CameraError::Connection(format!(
                            "{what} failed after {attempts} attempts: {err}"
                        )));
                    }
                    warn!(what, attempt, %err, "Camera not reachable, retrying");
                    self.pause_before_retry(what)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| cancel.load(Ordering::SeqCst))
    }

    /// Sleep the retry delay in short slices, stopping early on cancellation.
    fn pause_before_retry(&self, what: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.retry_delay;
        loop {
            if self.cancelled() {
                return Err(CameraError::Cancelled(what.to_string()));
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            thread::sleep(left.min(CANCEL_POLL));
        }
    }

    fn parse_iso(method: &str, iso: &str) -> Result<u32> {
        iso.parse().map_err(|_| CameraError::InvalidResponse {
            method: method.to_string(),
            detail: format!("'{iso}' is not an ISO"),
        })
    }

    /// ISO chosen by the camera's metering: half-press, read, release.
    fn metered_iso(&mut self) -> Result<String> {
        self.call("actHalfPressShutter", vec![])?;
        let metered = self.call_for_string("getIsoSpeedRate");
        self.call("cancelHalfPressShutter", vec![])?;
        metered
    }

    /// Let the camera choose the ISO.
    ///
    /// Returns the metered ISO. With `disable_auto_iso` the camera is then
    /// pinned to it.
    pub fn set_auto_iso(&mut self) -> Result<u32> {
        self.call_for_status("setIsoSpeedRate", vec![Value::from(AUTO_ISO)])?;
        let metered = self.metered_iso()?;
        if self.config.disable_auto_iso {
            self.call_for_status("setIsoSpeedRate", vec![Value::from(metered.as_str())])?;
        }
        Self::parse_iso("getIsoSpeedRate", &metered)
    }
}

impl<T: Transport> Camera for SonyCamera<T> {
    /// Current ISO. An `AUTO` setting reads the metered value instead.
    fn iso(&mut self) -> Result<u32> {
        let iso = self.call_for_string("getIsoSpeedRate")?;
        if iso != AUTO_ISO {
            return Self::parse_iso("getIsoSpeedRate", &iso);
        }
        let metered = self.metered_iso()?;
        if self.config.disable_auto_iso {
            debug!(iso = %metered, "Replacing AUTO ISO with the metered value");
            self.call_for_status("setIsoSpeedRate", vec![Value::from(metered.as_str())])?;
        }
        Self::parse_iso("getIsoSpeedRate", &metered)
    }

    fn set_iso(&mut self, iso: u32) -> Result<()> {
        if iso == 0 {
            return Err(CameraError::InvalidParameter("ISO must be positive".into()));
        }
        self.call_for_status("setIsoSpeedRate", vec![Value::from(iso.to_string())])
    }

    fn shutter_speed(&mut self) -> Result<ShutterSpeed> {
        let shutter_speed = self.call_for_string("getShutterSpeed")?;
        shutter_speed.parse().map_err(|_| CameraError::InvalidResponse {
            method: "getShutterSpeed".into(),
            detail: format!("'{shutter_speed}' is not a shutter speed"),
        })
    }

    fn set_shutter_speed(&mut self, shutter_speed: ShutterSpeed) -> Result<()> {
        self.call_for_status("setShutterSpeed", vec![Value::from(shutter_speed.to_string())])
    }

    /// Take a picture and return the URL of the postview image.
    fn take_picture(&mut self) -> Result<Option<String>> {
        let result = self.with_retry("actTakePicture", |camera| match camera.call("actTakePicture", vec![]) {
            Err(CameraError::Api { code: ERROR_LONG_SHOOTING, .. }) => {
                debug!("Long exposure, awaiting the picture");
                camera.call("awaitTakePicture", vec![])
            }
            other => other,
        })?;
        // [["http://.../pict.JPG"]]
        let url = result
            .first()
            .and_then(Value::as_array)
            .and_then(|urls| urls.first())
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(url)
    }

    fn sensor(&self) -> Sensor {
        self.config.model.sensor()
    }
}
