//! Sweep two servos across their ranges.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use pilectric_gpio::{DaemonHandle, PigpioClient, Servo, ServoController, ServoModel};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let daemon: DaemonHandle = Arc::new(PigpioClient::from_env().context("is pigpiod running?")?);
    let mut servos = ServoController::new(vec![
        Servo::from_model(daemon.clone(), 12, ServoModel::Sg90)?,
        Servo::from_model(daemon, 13, ServoModel::Hk15148b)?,
    ])?;

    servos.mid(None)?;
    thread::sleep(Duration::from_secs(1));
    for step in 0..=10 {
        let fraction = step as f64 / 10.0;
        servos.run_at_percentages(&[fraction, 1.0 - fraction])?;
        info!(fraction, "Sweeping");
        thread::sleep(Duration::from_millis(200));
    }
    servos.go_to_angles(&[-45.0, 15.0])?;
    thread::sleep(Duration::from_secs(1));
    servos.stop()?;
    Ok(())
}
