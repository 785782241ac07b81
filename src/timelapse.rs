use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use pilectric_camera::sony::{HttpTransport, Transport};
use pilectric_camera::{Camera, CameraError, Intervalometer, RunState, SonyCamera, SonyConfig};
use tokio::{signal, task, time};
use tracing::{debug, info, warn};

use crate::cli::Args;
use crate::config::Settings;

/// How often the run is checked for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the run lasts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Images(u32),
    Seconds(f64),
}

/// Everything needed for one run, merged from configuration and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub camera: SonyConfig,
    pub request_timeout: Duration,
    pub length: Length,
    pub delay: Duration,
    pub progress_interval: Duration,
}

fn seconds(name: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("{name} of {value} s is not a valid duration"))
}

impl Plan {
    /// Flags take precedence over configuration.
    pub fn new(settings: &Settings, args: &Args) -> anyhow::Result<Self> {
        let length = match (args.count, args.duration) {
            (Some(count), None) => Length::Images(count),
            (None, Some(duration)) => Length::Seconds(duration),
            _ => bail!("give exactly one of a picture count or a duration"),
        };
        let model = match args.camera {
            Some(model) => model,
            None => settings.camera.model.parse().context("bad camera model in configuration")?,
        };
        let camera = SonyConfig {
            endpoint: args.endpoint.clone().unwrap_or_else(|| settings.camera.endpoint.clone()),
            model,
            retry_attempts: settings.camera.retry_attempts,
            retry_delay: seconds("retry delay", settings.camera.retry_delay_secs)?,
            disable_auto_iso: settings.camera.disable_auto_iso,
            iso: args.iso,
            shutter_speed: args.shutter_speed,
        };
        let progress_interval = seconds("progress interval", settings.timelapse.progress_interval_secs)?;
        if progress_interval.is_zero() {
            bail!("progress interval must be positive");
        }
        Ok(Plan {
            camera,
            request_timeout: seconds("request timeout", settings.camera.request_timeout_secs)?,
            length,
            delay: seconds("delay", args.delay.unwrap_or(settings.timelapse.delay_secs))?,
            progress_interval,
        })
    }
}

/// Connect to the camera on a blocking thread.
///
/// Returns `None` when Ctrl+C arrives before the camera answers.
pub async fn connect(plan: &Plan) -> anyhow::Result<Option<SonyCamera>> {
    connect_with(plan, HttpTransport::new(plan.request_timeout), signal::ctrl_c()).await
}

async fn connect_with<T: Transport + 'static>(
    plan: &Plan,
    transport: T,
    interrupt: impl Future<Output = io::Result<()>>,
) -> anyhow::Result<Option<SonyCamera<T>>> {
    let config = plan.camera.clone();
    let endpoint = config.endpoint.clone();
    info!(%endpoint, attempts = config.retry_attempts + 1, "Connecting to camera");
    let cancel = Arc::new(AtomicBool::new(false));
    let task = task::spawn_blocking({
        let cancel = Arc::clone(&cancel);
        move || {
            let mut camera = SonyCamera::with_cancellable_transport(transport, config, cancel)?;
            let iso = camera.iso()?;
            let shutter_speed = camera.shutter_speed()?;
            info!(model = %camera.model(), sensor = camera.sensor().name, iso, %shutter_speed, "Camera ready");
            Ok::<_, CameraError>(camera)
        }
    });
    tokio::pin!(task);
    tokio::pin!(interrupt);

    let joined = tokio::select! {
        joined = &mut task => joined,
        result = &mut interrupt => {
            result.context("could not listen for Ctrl+C")?;
            warn!("Interrupted, giving up on the camera");
            cancel.store(true, Ordering::SeqCst);
            if let Err(err) = task.await.context("camera connection task failed")? {
                debug!(%err, "Connection abandoned");
            }
            return Ok(None);
        }
    };
    let camera = joined
        .context("camera connection task failed")?
        .with_context(|| format!("could not connect to the camera at {endpoint}; is its Wi-Fi joined?"))?;
    Ok(Some(camera))
}

pub fn intervalometer<C: Camera + 'static>(camera: C, plan: &Plan) -> anyhow::Result<Intervalometer<C>> {
    let intervalometer = match plan.length {
        Length::Images(count) => Intervalometer::new(camera, count, plan.delay),
        Length::Seconds(duration) => Intervalometer::from_duration(camera, duration, plan.delay),
    };
    intervalometer.context("could not plan the time-lapse")
}

/// Run the time-lapse to the end, reporting progress and stopping on Ctrl+C.
pub async fn run<C: Camera + 'static>(mut intervalometer: Intervalometer<C>, plan: &Plan) -> anyhow::Result<RunState> {
    info!(
        images = intervalometer.count(),
        duration = %format!("{:.1} s", intervalometer.duration()),
        fps = %format!("{:.3}", intervalometer.fps()),
        "Starting time-lapse"
    );
    if !intervalometer.start()? {
        bail!("time-lapse was already started");
    }

    let started = Instant::now();
    let mut poll = time::interval(POLL_INTERVAL);
    let mut progress = time::interval(plan.progress_interval);
    progress.tick().await;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if !intervalometer.running() {
                    break;
                }
            }
            _ = progress.tick() => {
                info!(
                    captured = intervalometer.images_captured(),
                    remaining = intervalometer.images_remaining(),
                    elapsed = %format!("{:.0} s", started.elapsed().as_secs_f64()),
                    "Progress"
                );
            }
            result = &mut ctrl_c, if !interrupted => {
                result.context("could not listen for Ctrl+C")?;
                interrupted = true;
                warn!("Interrupted, stopping after the current picture");
                intervalometer.abort();
            }
        }
    }

    let state = task::spawn_blocking(move || {
        let state = intervalometer.wait();
        (state, intervalometer.images_captured())
    })
    .await
    .context("intervalometer task failed")?;
    let (state, captured) = state;
    let state = state.context("time-lapse stopped by a camera error")?;
    info!(?state, captured, elapsed = %format!("{:.0} s", started.elapsed().as_secs_f64()), "Time-lapse finished");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pilectric_camera::{ShutterSpeed, SonyModel};
    use pilectric_camera::mock::MockCamera;
    use serde_json::{Value, json};
    use std::collections::VecDeque;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["timelapse", "-c", "a6000"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_settings() {
        let plan = Plan::new(
            &Settings::default(),
            &args(&["-n", "10", "-d", "2", "--endpoint", "http://10.0.0.1:8080/sony/camera", "--iso", "800"]),
        )
        .unwrap();
        assert_eq!(plan.length, Length::Images(10));
        assert_eq!(plan.delay, Duration::from_secs(2));
        assert_eq!(plan.camera.endpoint, "http://10.0.0.1:8080/sony/camera");
        assert_eq!(plan.camera.iso, Some(800));
        assert_eq!(plan.camera.retry_attempts, 25);
        assert_eq!(plan.camera.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_settings_fill_in_defaults() {
        let plan = Plan::new(&Settings::default(), &args(&["--duration", "60"])).unwrap();
        assert_eq!(plan.length, Length::Seconds(60.0));
        assert_eq!(plan.delay, Duration::from_millis(500));
        assert_eq!(plan.progress_interval, Duration::from_secs(25));
        assert_eq!(plan.camera.endpoint, pilectric_camera::sony::DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_model_falls_back_to_settings() {
        let mut settings = Settings::default();
        settings.camera.model = "a6600".into();
        let argv = Args::try_parse_from(["timelapse", "-n", "5"]).unwrap();
        assert_eq!(Plan::new(&settings, &argv).unwrap().camera.model, SonyModel::A6600);
        assert_eq!(Plan::new(&settings, &args(&["-n", "5"])).unwrap().camera.model, SonyModel::A6000);
        settings.camera.model = "a7".into();
        assert!(Plan::new(&settings, &argv).is_err());
    }

    #[test]
    fn test_negative_delay_is_rejected() {
        let mut args = args(&["-n", "10"]);
        args.delay = Some(-1.0);
        assert!(Plan::new(&Settings::default(), &args).is_err());
    }

    /// Answers every call from a fixed list, then refuses the connection.
    struct ListTransport(VecDeque<Value>);

    impl Transport for ListTransport {
        fn post(&mut self, _url: &str, _body: &Value) -> pilectric_camera::Result<Value> {
            self.0
                .pop_front()
                .ok_or_else(|| CameraError::Connection("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_connect_reads_camera_settings() {
        let plan = Plan::new(&Settings::default(), &args(&["-n", "3"])).unwrap();
        let transport = ListTransport(VecDeque::from([
            json!({"result": [0], "id": 1}),
            json!({"result": ["400"], "id": 2}),
            json!({"result": ["1/100"], "id": 3}),
        ]));
        let camera = connect_with(&plan, transport, std::future::pending()).await.unwrap();
        assert!(camera.is_some());
    }

    #[tokio::test]
    async fn test_ctrl_c_abandons_connect() {
        // 25 retries two seconds apart against a camera that never answers.
        let plan = Plan::new(&Settings::default(), &args(&["-n", "3"])).unwrap();
        let started = Instant::now();
        let interrupt = async {
            time::sleep(Duration::from_millis(50)).await;
            Ok(())
        };
        let camera = connect_with(&plan, ListTransport(VecDeque::new()), interrupt).await.unwrap();
        assert!(camera.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_camera_is_an_error() {
        let mut settings = Settings::default();
        settings.camera.retry_attempts = 1;
        settings.camera.retry_delay_secs = 0.0;
        let plan = Plan::new(&settings, &args(&["-n", "3"])).unwrap();
        let result = connect_with(&plan, ListTransport(VecDeque::new()), std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let plan = Plan::new(&Settings::default(), &args(&["-n", "3", "-d", "0.001"])).unwrap();
        let camera = MockCamera::new(100, ShutterSpeed::Seconds(0.01));
        let pictures = camera.picture_counter();
        let intervalometer = intervalometer(camera, &plan).unwrap();
        assert_eq!(run(intervalometer, &plan).await.unwrap(), RunState::Complete);
        assert_eq!(pictures.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_camera_failure_is_an_error() {
        let plan = Plan::new(&Settings::default(), &args(&["-n", "3", "-d", "0"])).unwrap();
        let camera = MockCamera::new(100, ShutterSpeed::Seconds(0.01)).failing_after(1);
        let intervalometer = intervalometer(camera, &plan).unwrap();
        assert!(run(intervalometer, &plan).await.is_err());
    }
}
