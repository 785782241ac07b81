//! In-memory camera for tests and demos.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::camera::{Camera, ShutterSpeed};
use crate::error::{CameraError, Result};
use crate::sensor::{APS_C, Sensor};

#[derive(Default)]
struct Latch {
    open: bool,
    holding: usize,
}

/// Holds captures open until released, so a run can be observed mid-exposure.
#[derive(Clone, Default)]
pub struct ShutterLatch {
    inner: Arc<(Mutex<Latch>, Condvar)>,
}

impl ShutterLatch {
    pub fn new() -> Self {
        ShutterLatch::default()
    }

    /// Wait up to `timeout` for a capture to be held. Returns `false` on timeout.
    pub fn wait_for_capture(&self, timeout: Duration) -> bool {
        let (latch, changed) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut latch = latch.lock();
        while latch.holding == 0 {
            if changed.wait_until(&mut latch, deadline).timed_out() {
                return latch.holding > 0;
            }
        }
        true
    }

    /// Let every held and future capture through.
    pub fn release(&self) {
        let (latch, changed) = &*self.inner;
        latch.lock().open = true;
        changed.notify_all();
    }

    fn hold(&self) {
        let (latch, changed) = &*self.inner;
        let mut latch = latch.lock();
        latch.holding += 1;
        changed.notify_all();
        while !latch.open {
            changed.wait(&mut latch);
        }
        latch.holding -= 1;
    }
}

/// A camera that remembers its settings and counts pictures.
///
/// Exposures are simulated by sleeping for the shutter speed, scaled by
/// `time_scale`.
pub struct MockCamera {
    iso: u32,
    shutter_speed: ShutterSpeed,
    pictures: Arc<AtomicUsize>,
    fail_after: Option<usize>,
    time_scale: f64,
    started: Arc<Mutex<Vec<Instant>>>,
    latch: Option<ShutterLatch>,
}

impl MockCamera {
    pub fn new(iso: u32, shutter_speed: ShutterSpeed) -> Self {
        MockCamera {
            iso,
            shutter_speed,
            pictures: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
            time_scale: 0.0,
            started: Arc::new(Mutex::new(Vec::new())),
            latch: None,
        }
    }

    /// Sleep `scale` times the shutter speed for every picture.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    /// Fail every picture after the first `pictures`.
    pub fn failing_after(mut self, pictures: usize) -> Self {
        self.fail_after = Some(pictures);
        self
    }

    /// Hold every capture at `latch` until it is released.
    pub fn with_latch(mut self, latch: ShutterLatch) -> Self {
        self.latch = Some(latch);
        self
    }

    /// When each capture started, readable after the camera is moved.
    pub fn capture_times(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.started)
    }

    /// Picture counter that stays readable after the camera is moved.
    pub fn picture_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pictures)
    }

    pub fn pictures(&self) -> usize {
        self.pictures.load(Ordering::SeqCst)
    }
}

impl Camera for MockCamera {
    fn iso(&mut self) -> Result<u32> {
        Ok(self.iso)
    }

    fn set_iso(&mut self, iso: u32) -> Result<()> {
        self.iso = iso;
        Ok(())
    }

    fn shutter_speed(&mut self) -> Result<ShutterSpeed> {
        Ok(self.shutter_speed)
    }

    fn set_shutter_speed(&mut self, shutter_speed: ShutterSpeed) -> Result<()> {
        self.shutter_speed = shutter_speed;
        Ok(())
    }

    fn take_picture(&mut self) -> Result<Option<String>> {
        self.started.lock().push(Instant::now());
        if let Some(latch) = &self.latch {
            latch.hold();
        }
        let taken = self.pictures.load(Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| taken >= limit) {
            return Err(CameraError::Connection("mock camera went away".into()));
        }
        if let Some(seconds) = self.shutter_speed.as_secs() {
            let simulated = seconds * self.time_scale;
            if simulated > 0.0 {
                thread::sleep(Duration::from_secs_f64(simulated));
            }
        }
        let number = self.pictures.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("mock://DSC{number:05}.JPG")))
    }

    fn sensor(&self) -> Sensor {
        APS_C
    }
}
