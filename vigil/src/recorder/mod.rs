//! Recording pipeline.
//!
//! One call to [`Recorder::record`] records one episode: it resolves the
//! output path from the monitor's current snapshot, runs streamlink piped
//! into ffmpeg, keeps the metadata side-file in sync and tears everything
//! down when the pipeline ends or the caller cancels.

mod availability;
mod command;
mod log_drain;
mod metadata_export;
mod output;
mod supervisor;

pub use availability::{
    Availability, HIGH_RESOLUTION_MARKER, MAX_AVAILABILITY_CHECKS, requests_high_resolution,
    wait_for_quality,
};
pub use command::{ContainerTags, build_ffmpeg_args, build_streamlink_args};
pub use log_drain::{OutputRecordReader, SUBPROCESS_TARGET, drain_to_log};
pub use metadata_export::{MetadataExporter, write_side_file};
pub use output::{MEDIA_EXTENSION, OutputPlan};
pub use supervisor::{RecordOutcome, Recorder, RecorderConfig, RecordingSummary};
