use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use pilectric_camera::{ShutterSpeed, SonyModel};

/// Take a series of pictures with a remotely controlled camera.
#[derive(Parser, Debug)]
#[command(
    name = "timelapse",
    version,
    about = "Capture a time-lapse with a Sony camera",
    group(ArgGroup::new("length").required(true).args(["count", "duration"]))
)]
pub struct Args {
    /// Camera model (sony, a6000 ... a6600) [config default: sony]
    #[arg(short = 'c', long = "camera")]
    pub camera: Option<SonyModel>,

    /// ISO to shoot at; keeps the camera's setting when omitted
    #[arg(long)]
    pub iso: Option<u32>,

    /// Shutter speed, e.g. 1/250, 0.5 or 2.5"; keeps the camera's setting when omitted
    #[arg(long = "ss", value_name = "SECONDS")]
    pub shutter_speed: Option<ShutterSpeed>,

    /// Number of pictures to take
    #[arg(short = 'n', long = "count")]
    pub count: Option<u32>,

    /// Shoot for this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Pause between pictures in seconds [config default: 0.5]
    #[arg(short = 'd', long = "delay", value_name = "SECONDS")]
    pub delay: Option<f64>,

    /// Camera API endpoint, overriding the configuration
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Path to the config file
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count
    )]
    pub verbosity_level: u8,
}

impl Args {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbosity_level {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count_run() {
        let args = Args::try_parse_from(["timelapse", "-c", "a6400", "--ss", "1/100", "--iso", "400", "-n", "300", "-vv"])
            .unwrap();
        assert_eq!(args.camera, Some(SonyModel::A6400));
        assert_eq!(args.shutter_speed, Some(ShutterSpeed::Seconds(0.01)));
        assert_eq!(args.iso, Some(400));
        assert_eq!(args.count, Some(300));
        assert_eq!(args.delay, None);
        assert_eq!(args.tracing_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_parse_duration_run() {
        let args = Args::try_parse_from(["timelapse", "-c", "sony", "--duration", "3600", "-d", "2"]).unwrap();
        assert_eq!(args.duration, Some(3600.0));
        assert_eq!(args.delay, Some(2.0));
        assert_eq!(args.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_length_is_required_and_exclusive() {
        assert!(Args::try_parse_from(["timelapse", "-c", "sony"]).is_err());
        assert!(Args::try_parse_from(["timelapse", "-c", "sony", "-n", "5", "--duration", "10"]).is_err());
    }

    #[test]
    fn test_camera_must_be_known() {
        assert_eq!(Args::try_parse_from(["timelapse", "-n", "5"]).unwrap().camera, None);
        assert!(Args::try_parse_from(["timelapse", "-c", "a7", "-n", "5"]).is_err());
    }

    #[test]
    fn test_bad_shutter_speed() {
        assert!(Args::try_parse_from(["timelapse", "-c", "sony", "-n", "5", "--ss", "fast"]).is_err());
    }
}
