//! Repeated captures on a background thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::camera::{Camera, ShutterSpeed};
use crate::error::{CameraError, Result};

/// Lifecycle of an intervalometer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Stopped by [`Intervalometer::abort`].
    Cancelled,
    /// Every image was captured.
    Complete,
    /// A capture failed; see [`Intervalometer::wait`].
    Failed,
}

struct Shared {
    state: Mutex<RunState>,
    wake: Condvar,
    abort: AtomicBool,
    captured: AtomicU32,
    last_image: Mutex<Option<String>>,
    error: Mutex<Option<CameraError>>,
}

impl Shared {
    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
        self.wake.notify_all();
    }

    /// Sleep for `delay` unless aborted first. Returns `false` on abort.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        while !self.abort.load(Ordering::SeqCst) {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return !self.abort.load(Ordering::SeqCst);
            }
        }
        false
    }
}

/// Takes `count` pictures, pausing `delay` after each one but the last.
///
/// The camera is shared behind a lock so it can still be queried while a run
/// is in progress; captures hold the lock for the whole exposure.
pub struct Intervalometer<C: Camera + 'static> {
    camera: Arc<Mutex<C>>,
    count: u32,
    delay: Duration,
    shutter_speed: f64,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

fn exposure_seconds(camera: &mut impl Camera) -> Result<f64> {
    match camera.shutter_speed()? {
        ShutterSpeed::Seconds(seconds) => Ok(seconds),
        ShutterSpeed::Bulb => Err(CameraError::InvalidParameter(
            "a bulb exposure has no fixed length to plan captures around".into(),
        )),
    }
}

impl<C: Camera + 'static> Intervalometer<C> {
    /// Plan `count` captures with `delay` between them.
    ///
    /// # Errors
    ///
    /// * `CameraError::InvalidParameter` if `count` is zero or the camera is
    ///   set to bulb.
    /// * Any error reading the shutter speed.
    pub fn new(mut camera: C, count: u32, delay: Duration) -> Result<Self> {
        if count == 0 {
            return Err(CameraError::InvalidParameter("an intervalometer needs at least one image".into()));
        }
        let shutter_speed = exposure_seconds(&mut camera)?;
        Ok(Intervalometer {
            camera: Arc::new(Mutex::new(camera)),
            count,
            delay,
            shutter_speed,
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::Idle),
                wake: Condvar::new(),
                abort: AtomicBool::new(false),
                captured: AtomicU32::new(0),
                last_image: Mutex::new(None),
                error: Mutex::new(None),
            }),
            thread: None,
        })
    }

    /// Plan as many captures as fit in `duration` seconds.
    pub fn from_duration(mut camera: C, duration: f64, delay: Duration) -> Result<Self> {
        if !(duration > 0.0 && duration.is_finite()) {
            return Err(CameraError::InvalidParameter(format!("duration {duration} s is not positive")));
        }
        let shutter_speed = exposure_seconds(&mut camera)?;
        let delay_seconds = delay.as_secs_f64();
        let count = ((duration + delay_seconds) / (shutter_speed + delay_seconds)).round();
        if count > u32::MAX as f64 {
            return Err(CameraError::InvalidParameter(format!("{count} images are too many")));
        }
        Intervalometer::new(camera, count as u32, delay)
    }

    pub fn camera(&self) -> Arc<Mutex<C>> {
        Arc::clone(&self.camera)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Seconds from the first exposure starting to the last one ending.
    pub fn duration(&self) -> f64 {
        let delay = self.delay.as_secs_f64();
        self.count as f64 * (self.shutter_speed + delay) - delay
    }

    /// Frames per second of real time.
    pub fn fps(&self) -> f64 {
        self.count as f64 / self.duration()
    }

    pub fn images_captured(&self) -> u32 {
        self.shared.captured.load(Ordering::SeqCst)
    }

    pub fn images_remaining(&self) -> u32 {
        self.count - self.images_captured()
    }

    /// Where the camera put the most recent image, if it said.
    pub fn last_image(&self) -> Option<String> {
        self.shared.last_image.lock().clone()
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.lock()
    }

    pub fn running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Start capturing on a background thread.
    ///
    /// Returns `false` without doing anything unless the intervalometer is idle.
    pub fn start(&mut self) -> Result<bool> {
        {
            let mut state = self.shared.state.lock();
            if *state != RunState::Idle {
                return Ok(false);
            }
            *state = RunState::Running;
        }

        let camera = Arc::clone(&self.camera);
        let shared = Arc::clone(&self.shared);
        let (count, delay) = (self.count, self.delay);
        let spawned = thread::Builder::new()
            .name("intervalometer".into())
            .spawn(move || capture_loop(&camera, &shared, count, delay));
        match spawned {
            Ok(thread) => {
                info!(count, delay = ?delay, duration = self.duration(), "Intervalometer started");
                self.thread = Some(thread);
                Ok(true)
            }
            Err(err) => {
                self.shared.set_state(RunState::Idle);
                Err(CameraError::Spawn(err))
            }
        }
    }

    /// Stop after the capture in progress. Returns `false` if nothing was running.
    pub fn abort(&self) -> bool {
        let state = self.shared.state.lock();
        if *state != RunState::Running {
            return false;
        }
        self.shared.abort.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        true
    }

    /// Block until the run ends and return how it ended.
    ///
    /// # Errors
    ///
    /// Returns the capture error that halted a failed run.
    pub fn wait(&mut self) -> Result<RunState> {
        self.join();
        match self.state() {
            RunState::Failed => match self.shared.error.lock().take() {
                Some(err) => Err(err),
                None => Ok(RunState::Failed),
            },
            state => Ok(state),
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Intervalometer thread panicked");
                self.shared.set_state(RunState::Failed);
            }
        }
    }
}

impl<C: Camera + 'static> Drop for Intervalometer<C> {
    fn drop(&mut self) {
        self.abort();
        self.join();
    }
}

fn capture_loop<C: Camera>(camera: &Mutex<C>, shared: &Shared, count: u32, delay: Duration) {
    for image in 1..=count {
        if shared.abort.load(Ordering::SeqCst) {
            break;
        }
        let picture = camera.lock().take_picture();
        match picture {
            Ok(url) => {
                shared.captured.store(image, Ordering::SeqCst);
                info!(image, of = count, url = url.as_deref().unwrap_or("-"), "Image captured");
                *shared.last_image.lock() = url;
            }
            Err(err) => {
                error!(image, %err, "Capture failed, stopping");
                *shared.error.lock() = Some(err);
                shared.set_state(RunState::Failed);
                return;
            }
        }
        if image < count && !shared.pause(delay) {
            break;
        }
    }

    let captured = shared.captured.load(Ordering::SeqCst);
    let end = if shared.abort.load(Ordering::SeqCst) && captured < count {
        RunState::Cancelled
    } else {
        RunState::Complete
    };
    debug!(state = ?end, captured, "Intervalometer finished");
    shared.set_state(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCamera, ShutterLatch};

    const EPSILON: f64 = 1e-9;

    fn camera(shutter: f64) -> MockCamera {
        MockCamera::new(100, ShutterSpeed::Seconds(shutter))
    }

    #[test]
    fn test_from_duration_counts_images() {
        let intervalometer = Intervalometer::from_duration(camera(1.5), 60.0, Duration::from_millis(500)).unwrap();
        // (60 + 0.5) / (1.5 + 0.5) = 30.25
        assert_eq!(intervalometer.count(), 30);
        assert!((intervalometer.duration() - 59.5).abs() < EPSILON);
        assert!((intervalometer.fps() - 30.0 / 59.5).abs() < EPSILON);
        assert_eq!(intervalometer.images_remaining(), 30);
    }

    #[test]
    fn test_rejects_bulb_and_empty_runs() {
        let bulb = MockCamera::new(100, ShutterSpeed::Bulb);
        assert!(matches!(
            Intervalometer::new(bulb, 10, Duration::ZERO),
            Err(CameraError::InvalidParameter(_))
        ));
        assert!(Intervalometer::new(camera(1.0), 0, Duration::ZERO).is_err());
        // Too short for even one image.
        assert!(Intervalometer::from_duration(camera(10.0), 1.0, Duration::ZERO).is_err());
        assert!(Intervalometer::from_duration(camera(1.0), -5.0, Duration::ZERO).is_err());
    }

    #[test]
    fn test_run_to_completion() {
        let mock = camera(0.01);
        let pictures = mock.picture_counter();
        let mut intervalometer = Intervalometer::new(mock, 3, Duration::from_millis(1)).unwrap();
        assert_eq!(intervalometer.state(), RunState::Idle);
        assert!(!intervalometer.abort());

        assert!(intervalometer.start().unwrap());
        assert!(!intervalometer.start().unwrap());
        assert_eq!(intervalometer.wait().unwrap(), RunState::Complete);
        assert_eq!(intervalometer.images_captured(), 3);
        assert_eq!(intervalometer.images_remaining(), 0);
        assert_eq!(pictures.load(Ordering::SeqCst), 3);
        assert_eq!(intervalometer.last_image().as_deref(), Some("mock://DSC00003.JPG"));
        assert!(!intervalometer.running());
        assert!(!intervalometer.start().unwrap());
    }

    #[test]
    fn test_abort_interrupts_delay() {
        let mut intervalometer = Intervalometer::new(camera(0.01), 5, Duration::from_secs(30)).unwrap();
        let started = Instant::now();
        assert!(intervalometer.start().unwrap());
        while intervalometer.images_captured() == 0 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(intervalometer.abort());
        assert_eq!(intervalometer.wait().unwrap(), RunState::Cancelled);
        assert_eq!(intervalometer.images_captured(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_captures_start_at_least_delay_apart() {
        let delay = Duration::from_millis(20);
        let mock = camera(0.01);
        let times = mock.capture_times();
        let mut intervalometer = Intervalometer::new(mock, 4, delay).unwrap();
        intervalometer.start().unwrap();
        assert_eq!(intervalometer.wait().unwrap(), RunState::Complete);
        let times = times.lock();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= delay, "captures {:?} apart", pair[1] - pair[0]);
        }
    }

    #[test]
    fn test_abort_waits_for_capture_in_flight() {
        let latch = ShutterLatch::new();
        let mock = camera(0.01).with_latch(latch.clone());
        let mut intervalometer = Intervalometer::new(mock, 3, Duration::ZERO).unwrap();
        intervalometer.start().unwrap();
        assert!(latch.wait_for_capture(Duration::from_secs(5)));

        assert!(intervalometer.abort());
        thread::sleep(Duration::from_millis(50));
        assert!(intervalometer.running());
        assert_eq!(intervalometer.images_captured(), 0);

        latch.release();
        assert_eq!(intervalometer.wait().unwrap(), RunState::Cancelled);
        assert!(!intervalometer.running());
        assert_eq!(intervalometer.images_captured(), 1);
    }

    #[test]
    fn test_abort_during_last_capture_completes() {
        let latch = ShutterLatch::new();
        let mock = camera(0.01).with_latch(latch.clone());
        let mut intervalometer = Intervalometer::new(mock, 1, Duration::ZERO).unwrap();
        intervalometer.start().unwrap();
        assert!(latch.wait_for_capture(Duration::from_secs(5)));
        assert!(intervalometer.abort());
        latch.release();
        assert_eq!(intervalometer.wait().unwrap(), RunState::Complete);
        assert_eq!(intervalometer.images_captured(), 1);
    }

    #[test]
    fn test_capture_error_halts_run() {
        let mock = camera(0.01).failing_after(2);
        let mut intervalometer = Intervalometer::new(mock, 5, Duration::ZERO).unwrap();
        intervalometer.start().unwrap();
        assert!(matches!(intervalometer.wait(), Err(CameraError::Connection(_))));
        assert_eq!(intervalometer.state(), RunState::Failed);
        assert_eq!(intervalometer.images_captured(), 2);
    }

    #[test]
    fn test_camera_stays_reachable() {
        let intervalometer = Intervalometer::new(camera(0.25), 2, Duration::ZERO).unwrap();
        assert_eq!(intervalometer.camera().lock().iso().unwrap(), 100);
    }
}
