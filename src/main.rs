mod cli;
mod config;
mod timelapse;

use clap::Parser;
use pilectric_camera::RunState;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

use crate::cli::Args;
use crate::timelapse::Plan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.tracing_level().into()))
        .init();

    let settings = config::load_config(args.config.as_deref())?;
    let plan = Plan::new(&settings, &args)?;

    let Some(camera) = timelapse::connect(&plan).await? else {
        info!("Time-lapse cancelled");
        return Ok(());
    };
    let intervalometer = timelapse::intervalometer(camera, &plan)?;
    match timelapse::run(intervalometer, &plan).await? {
        RunState::Cancelled => info!("Time-lapse cancelled"),
        state => info!(?state, "Done"),
    }
    Ok(())
}
