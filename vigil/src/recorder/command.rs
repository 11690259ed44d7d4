//! Argument lists for the extractor and muxer processes.

use std::time::Duration;

use crate::monitor::BroadcastSnapshot;
use crate::utils::filename::{TRUNCATED_TITLE_BYTES, truncate_to_byte_size};

/// Build streamlink arguments that write the selected stream to stdout.
pub fn build_streamlink_args(extra_args: &[String], url: &str, quality: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(extra_args.len() + 3);

    // Output to stdout for piping
    args.push("--stdout".to_string());
    args.extend(extra_args.iter().cloned());

    // Stream URL must be the first positional argument followed by quality
    args.push(url.to_string());
    args.push(quality.to_string());
    args
}

/// Container tags written by the muxer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTags {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub date: String,
}

impl ContainerTags {
    pub fn from_snapshot(snapshot: &BroadcastSnapshot) -> Self {
        let title = snapshot.title.as_deref().unwrap_or_default();
        Self {
            title: truncate_to_byte_size(title, TRUNCATED_TITLE_BYTES).into_owned(),
            artist: snapshot.author.clone().unwrap_or_default(),
            genre: snapshot.category.clone().unwrap_or_default(),
            date: snapshot.datetime_label(),
        }
    }
}

/// Build ffmpeg arguments that remux stdin into `target`.
///
/// `segment_duration` enables time-based rotation; `target` must then carry
/// a `%d` counter.
pub fn build_ffmpeg_args(
    tags: &ContainerTags,
    segment_duration: Option<Duration>,
    target: &str,
) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-i", "pipe:0"]
        .into_iter()
        .map(String::from)
        .collect();

    // Copy streams without re-encoding
    args.extend(["-c".to_string(), "copy".to_string()]);
    args.extend(["-movflags".to_string(), "+faststart".to_string()]);

    for (key, value) in [
        ("title", &tags.title),
        ("artist", &tags.artist),
        ("genre", &tags.genre),
        ("date", &tags.date),
    ] {
        args.push("-metadata".to_string());
        args.push(format!("{key}={value}"));
    }

    if let Some(duration) = segment_duration.filter(|d| !d.is_zero()) {
        args.extend([
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            duration.as_secs().to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            "-segment_start_number".to_string(),
            "1".to_string(),
        ]);
    }

    args.push(target.to_string());
    args
}
