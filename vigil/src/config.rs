//! Command-line and environment configuration.
//!
//! Every flag can also be set through the environment variable named next to
//! it; a `.env` file is loaded first by the binary.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use clap::Parser;

use crate::monitor::StreamMonitorConfig;
use crate::recorder::RecorderConfig;
use crate::utils::filename::expand_datetime;
use crate::{Error, Result};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Watches a live broadcast and records every episode through streamlink and ffmpeg"
)]
pub struct Args {
    /// Broadcast URL to watch.
    #[arg(long, env = "TARGET_URL")]
    pub target_url: String,

    /// Comma-separated streamlink quality labels, in order of preference.
    #[arg(long, env = "TARGET_STREAM", default_value = "best")]
    pub target_stream: String,

    /// Extra streamlink arguments, split on whitespace.
    #[arg(long, env = "STREAMLINK_ARGS", default_value = "", allow_hyphen_values = true)]
    pub streamlink_args: String,

    /// Seconds between status probes.
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = 15.0)]
    pub check_interval: f64,

    /// Output path template, relative to the output directory.
    #[arg(long, env = "FILEPATH_TEMPLATE", default_value = RecorderConfig::DEFAULT_TEMPLATE)]
    pub filepath_template: String,

    /// Segment length in minutes; 0 records a single file.
    #[arg(long, env = "FFMPEG_SEGMENT_SIZE", default_value_t = 690)]
    pub segment_minutes: u64,

    #[arg(long, env = "OUTPUT_DIR", default_value = "/data")]
    pub output_dir: PathBuf,

    #[arg(long, env = "LOG_DIR", default_value = "/log")]
    pub log_dir: PathBuf,

    /// Discord webhook for lifecycle notifications.
    #[arg(long, env = "DISCORD_WEBHOOK")]
    pub discord_webhook: Option<String>,

    #[arg(long, env = "STREAMLINK_PATH", default_value = "streamlink")]
    pub streamlink_path: String,

    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub check_interval: Duration,
    pub monitor: StreamMonitorConfig,
    pub recorder: RecorderConfig,
    pub log_dir: PathBuf,
    pub discord_webhook: Option<String>,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings> {
        let target_url = self.target_url.trim().to_string();
        if target_url.is_empty() {
            return Err(Error::config("TARGET_URL must not be empty"));
        }

        let check_interval = Duration::try_from_secs_f64(self.check_interval)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                Error::config(format!(
                    "CHECK_INTERVAL must be a positive number of seconds, got {}",
                    self.check_interval
                ))
            })?;

        if self.filepath_template.trim().is_empty() {
            return Err(Error::config("FILEPATH_TEMPLATE must not be empty"));
        }
        expand_datetime(&self.filepath_template, &Local::now())?;

        let target_stream = match self.target_stream.trim() {
            "" => "best".to_string(),
            stream => stream.to_string(),
        };

        let mut recorder = RecorderConfig::new(target_url);
        recorder.target_stream = target_stream;
        recorder.extra_args = self
            .streamlink_args
            .split_whitespace()
            .map(str::to_string)
            .collect();
        recorder.streamlink_path = self.streamlink_path;
        recorder.ffmpeg_path = self.ffmpeg_path;
        recorder.output_root = self.output_dir;
        recorder.filepath_template = self.filepath_template;
        recorder.segment_duration = match self.segment_minutes {
            0 => None,
            minutes => {
                let secs = minutes.checked_mul(60).ok_or_else(|| {
                    Error::config(format!("segment length of {minutes} minutes is out of range"))
                })?;
                Some(Duration::from_secs(secs))
            }
        };

        Ok(Settings {
            check_interval,
            monitor: StreamMonitorConfig::new(check_interval),
            recorder,
            log_dir: self.log_dir,
            discord_webhook: self
                .discord_webhook
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
        })
    }
}
