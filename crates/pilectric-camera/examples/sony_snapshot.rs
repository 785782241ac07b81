//! Connect to a Sony camera, print its exposure settings and take one picture.
//!
//! Join the camera's Wi-Fi access point first.

use anyhow::Context;
use pilectric_camera::{Camera, SonyCamera, SonyConfig, SonyModel};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let model: SonyModel = std::env::args().nth(1).as_deref().unwrap_or("sony").parse()?;
    let config = SonyConfig { model, retry_attempts: 5, ..SonyConfig::default() };
    let mut camera = SonyCamera::connect(config).context("is the camera's Wi-Fi joined?")?;

    let sensor = camera.sensor();
    println!("Camera: {} ({} sensor, crop factor {:.2})", model, sensor.name, sensor.crop_factor());
    println!("  ISO:           {}", camera.iso()?);
    println!("  Gain:          {:.2} dB", camera.gain()?);
    println!("  Shutter speed: {}", camera.shutter_speed()?);

    match camera.take_picture()? {
        Some(url) => println!("Picture taken: {}", url),
        None => println!("Picture taken"),
    }
    Ok(())
}
