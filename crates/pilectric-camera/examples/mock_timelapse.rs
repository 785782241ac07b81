//! Run a short time-lapse against the in-memory camera.

use std::time::Duration;

use pilectric_camera::mock::MockCamera;
use pilectric_camera::{Intervalometer, ShutterSpeed};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let camera = MockCamera::new(200, ShutterSpeed::seconds(0.2)?).with_time_scale(1.0);
    let mut intervalometer = Intervalometer::from_duration(camera, 3.0, Duration::from_millis(300))?;
    println!(
        "{} images over {:.2} s ({:.2} fps)",
        intervalometer.count(),
        intervalometer.duration(),
        intervalometer.fps()
    );

    intervalometer.start()?;
    let state = intervalometer.wait()?;
    println!("Finished {:?} with {} images", state, intervalometer.images_captured());
    Ok(())
}
