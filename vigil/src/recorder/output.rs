//! Where a recording goes on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::Result;
use crate::monitor::BroadcastSnapshot;
use crate::utils::filename::{PathFields, format_output_path};

/// Container extension written by the muxer.
pub const MEDIA_EXTENSION: &str = "ts";

/// Resolved destination of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    /// Output path without extension.
    pub base: PathBuf,
    /// Target handed to the muxer. In segment mode this is a pattern with
    /// literal `%` escaped and a `%d` counter.
    pub muxer_target: String,
    /// JSON side-file describing the episode.
    pub side_file: PathBuf,
    pub segmented: bool,
}

impl OutputPlan {
    pub fn resolve(
        output_root: &Path,
        template: &str,
        snapshot: &BroadcastSnapshot,
        now: &DateTime<Local>,
        segmented: bool,
    ) -> Result<Self> {
        let fields = PathFields {
            plugin: snapshot.plugin.as_deref().unwrap_or_default(),
            id: snapshot.stream_id.as_deref().unwrap_or_default(),
            author: snapshot.author.as_deref().unwrap_or_default(),
            category: snapshot.category.as_deref().unwrap_or_default(),
            title: snapshot.title.as_deref().unwrap_or_default(),
        };
        let relative = format_output_path(template, &fields, now)?;
        let base = output_root.join(relative);
        let base_str = base.to_string_lossy().replace('\\', "/");

        let muxer_target = if segmented {
            format!("{} part%d.{MEDIA_EXTENSION}", base_str.replace('%', "%%"))
        } else {
            format!("{base_str}.{MEDIA_EXTENSION}")
        };
        let side_file = PathBuf::from(format!("{base_str}.json"));

        Ok(Self {
            base,
            muxer_target,
            side_file,
            segmented,
        })
    }

    /// Directory the recording is written into.
    pub fn directory(&self) -> Option<&Path> {
        self.base.parent()
    }
}
