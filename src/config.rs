use std::path::Path;

use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;
use tracing::{debug, error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "PILECTRIC";

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub timelapse: TimelapseSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub model: String,
    pub endpoint: String,
    pub retry_attempts: u32,
    pub retry_delay_secs: f64,
    pub request_timeout_secs: f64,
    pub disable_auto_iso: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        CameraSettings {
            model: "sony".into(),
            endpoint: pilectric_camera::sony::DEFAULT_ENDPOINT.into(),
            retry_attempts: 25,
            retry_delay_secs: 2.0,
            request_timeout_secs: 60.0,
            disable_auto_iso: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimelapseSettings {
    pub delay_secs: f64,
    pub progress_interval_secs: f64,
}

impl Default for TimelapseSettings {
    fn default() -> Self {
        TimelapseSettings { delay_secs: 0.5, progress_interval_secs: 25.0 }
    }
}

/// Load settings from `path`, or from `config/default.toml` when no path is
/// given, then apply `PILECTRIC_*` environment overrides.
///
/// An explicit path must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };
    info!("Attempting to load configuration from {}", path.display());

    let builder = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    match build(builder) {
        Ok(settings) => {
            debug!("Successfully loaded configuration: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

fn build(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    builder.build()?.try_deserialize()
}
