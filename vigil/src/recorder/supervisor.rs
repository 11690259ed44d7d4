//! Recording pipeline supervisor.
//!
//! Runs `streamlink --stdout … | ffmpeg -i pipe:0 …` for one episode. The
//! extractor's stdout handle becomes the muxer's stdin, so media bytes never
//! pass through this process. Every exit path (normal, error, cancellation)
//! goes through [`PipelineHandle::teardown`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::{ContainerTags, build_ffmpeg_args, build_streamlink_args};
use super::log_drain::spawn_drain;
use super::metadata_export::MetadataExporter;
use super::output::OutputPlan;
use crate::monitor::{BroadcastSnapshot, StreamMonitor};
use crate::notification::{Classification, Notifier, describe_snapshot};
use crate::utils::fs::ensure_dir_all_with_op;
use crate::{Error, Result};

const EXTRACTOR: &str = "streamlink";
const MUXER: &str = "ffmpeg";

/// Settings for the recording pipeline.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub target_url: String,
    /// Comma-separated quality labels handed to streamlink.
    pub target_stream: String,
    /// Extra streamlink arguments, inserted before the URL.
    pub extra_args: Vec<String>,
    pub streamlink_path: String,
    pub ffmpeg_path: String,
    pub output_root: PathBuf,
    pub filepath_template: String,
    /// Segment length; `None` records a single file.
    pub segment_duration: Option<Duration>,
    /// Delay before checking both processes came up.
    pub startup_grace: Duration,
    /// Bound on waiting for a child to exit after the other one has.
    pub stop_timeout: Duration,
}

impl RecorderConfig {
    pub const DEFAULT_TEMPLATE: &'static str =
        "{plugin}/{author}/%Y-%m/[%Y%m%d_%H%M%S][{category}] {title} ({id})";

    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            target_stream: "best".to_string(),
            extra_args: Vec::new(),
            streamlink_path: EXTRACTOR.to_string(),
            ffmpeg_path: MUXER.to_string(),
            output_root: PathBuf::from("/data"),
            filepath_template: Self::DEFAULT_TEMPLATE.to_string(),
            segment_duration: Some(Duration::from_secs(690 * 60)),
            startup_grace: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_duration.is_some_and(|d| !d.is_zero())
    }
}

/// What one call to [`Recorder::record`] did.
#[derive(Debug)]
pub enum RecordOutcome {
    /// The broadcast was offline by the time setup started.
    Skipped,
    Completed(RecordingSummary),
}

#[derive(Debug)]
pub struct RecordingSummary {
    pub output: OutputPlan,
    pub extractor_exit: Option<ExitStatus>,
    pub muxer_exit: Option<ExitStatus>,
}

/// The two running children and the tasks attached to them.
struct PipelineHandle {
    extractor: Child,
    muxer: Child,
    extractor_log: Option<JoinHandle<usize>>,
    muxer_log: Option<JoinHandle<usize>>,
    export: Option<(CancellationToken, JoinHandle<usize>)>,
}

impl PipelineHandle {
    fn spawn(config: &RecorderConfig, extractor_args: &[String], muxer_args: &[String]) -> Result<Self> {
        info!(program = %config.streamlink_path, args = ?extractor_args, "starting extractor");
        let mut extractor_command = process_utils::tokio_command(&config.streamlink_path);
        extractor_command
            .args(extractor_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut extractor = extractor_command
            .spawn()
            .map_err(|e| Error::spawn(&config.streamlink_path, e))?;

        let extractor_stderr = extractor
            .stderr
            .take()
            .ok_or_else(|| Error::pipeline("failed to capture streamlink stderr"))?;
        let extractor_stdout = extractor
            .stdout
            .take()
            .ok_or_else(|| Error::pipeline("failed to capture streamlink stdout"))?;
        let muxer_stdin = TryInto::<Stdio>::try_into(extractor_stdout).map_err(|e: std::io::Error| {
            Error::pipeline(format!("failed to hand streamlink stdout to ffmpeg: {e}"))
        })?;

        info!(program = %config.ffmpeg_path, args = ?muxer_args, "starting muxer");
        let mut muxer_command = process_utils::tokio_command(&config.ffmpeg_path);
        muxer_command
            .args(muxer_args)
            .env("LC_ALL", "C")
            .stdin(muxer_stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut muxer = match muxer_command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = extractor.start_kill();
                return Err(Error::spawn(&config.ffmpeg_path, e));
            }
        };
        let muxer_stderr = muxer
            .stderr
            .take()
            .ok_or_else(|| Error::pipeline("failed to capture ffmpeg stderr"))?;

        Ok(Self {
            extractor,
            muxer,
            extractor_log: Some(spawn_drain(extractor_stderr, EXTRACTOR)),
            muxer_log: Some(spawn_drain(muxer_stderr, MUXER)),
            export: None,
        })
    }

    fn both_running(&mut self) -> Result<bool> {
        Ok(self.extractor.try_wait()?.is_none() && self.muxer.try_wait()?.is_none())
    }

    /// Wait for the muxer to finish, then (bounded) for the extractor.
    async fn wait_for_exit(&mut self, extractor_timeout: Duration) -> Result<()> {
        if let Some(log) = self.muxer_log.take() {
            match log.await {
                Ok(lines) => debug!(lines, "muxer log closed"),
                Err(e) => warn!(error = %e, "muxer log task ended abnormally"),
            }
        }

        let muxer_status = self.muxer.wait().await?;
        warn_on_failure(MUXER, &muxer_status);

        match tokio::time::timeout(extractor_timeout, self.extractor.wait()).await {
            Ok(status) => warn_on_failure(EXTRACTOR, &status?),
            Err(_) => warn!(
                process = EXTRACTOR,
                timeout = ?extractor_timeout,
                "extractor still running after the muxer exited"
            ),
        }
        Ok(())
    }

    /// Kill whatever is still running, reap both children and stop the
    /// attached tasks. Safe to call on every exit path.
    async fn teardown(&mut self, timeout: Duration) -> (Option<ExitStatus>, Option<ExitStatus>) {
        let muxer_exit = reap(MUXER, &mut self.muxer, timeout).await;
        let extractor_exit = reap(EXTRACTOR, &mut self.extractor, timeout).await;

        if let Some((token, handle)) = self.export.take() {
            token.cancel();
            match handle.await {
                Ok(writes) => debug!(writes, "metadata export stopped"),
                Err(e) => warn!(error = %e, "metadata export task ended abnormally"),
            }
        }

        for log in [self.extractor_log.take(), self.muxer_log.take()]
            .into_iter()
            .flatten()
        {
            // A grandchild holding the pipe open must not stall teardown.
            let abort = log.abort_handle();
            if tokio::time::timeout(timeout, log).await.is_err() {
                abort.abort();
            }
        }

        (extractor_exit, muxer_exit)
    }
}

fn warn_on_failure(process: &'static str, status: &ExitStatus) {
    if status.success() {
        info!(process, "process exited normally");
    } else {
        warn!(
            process,
            status = %process_utils::describe_exit(status),
            code = process_utils::exit_code(status),
            "process did not exit normally; keeping the partial recording"
        );
    }
}

async fn reap(process: &'static str, child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    match process_utils::terminate(child, timeout).await {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            warn!(process, ?timeout, "process did not exit after kill");
            None
        }
        Err(e) => {
            warn!(process, error = %e, "failed to terminate process");
            None
        }
    }
}

/// Records the watched broadcast while it is online.
pub struct Recorder {
    config: RecorderConfig,
    notifier: Notifier,
}

impl Recorder {
    pub fn new(config: RecorderConfig, notifier: Notifier) -> Self {
        Self { config, notifier }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record the current episode until the pipeline ends.
    ///
    /// Non-zero child exits are logged, not returned. Setup and wait failures
    /// are announced on the notification channel and returned. Cancellation
    /// tears the pipeline down and returns [`Error::Interrupted`].
    pub async fn record(
        &mut self,
        monitor: &Arc<StreamMonitor>,
        cancellation_token: &CancellationToken,
    ) -> Result<RecordOutcome> {
        let Some(snapshot) = monitor.current_metadata() else {
            info!("stream is offline; nothing to record");
            return Ok(RecordOutcome::Skipped);
        };

        let description = describe_snapshot(&snapshot);
        let stream_id = snapshot.stream_id.clone().unwrap_or_default();
        info!(
            plugin = ?snapshot.plugin,
            stream_id = %stream_id,
            author = ?snapshot.author,
            category = ?snapshot.category,
            title = ?snapshot.title,
            "recording starts"
        );
        tokio::select! {
            _ = cancellation_token.cancelled() => return Err(Error::Interrupted),
            _ = self.notifier.notify_once(Classification::On, &stream_id, &description) => {}
        }

        match self.run_pipeline(monitor, &snapshot, cancellation_token).await {
            Ok(summary) => {
                // Pick up an offline transition without waiting for the next poll.
                monitor.refresh().await;
                info!(output = %summary.output.base.display(), "recording ends");
                self.notifier
                    .notify_once(Classification::Off, &stream_id, &description)
                    .await;
                Ok(RecordOutcome::Completed(summary))
            }
            Err(e) if e.is_interrupted() => {
                info!("recording interrupted by shutdown");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "recording failed");
                self.notifier
                    .notify(Classification::Error, &format!("{description}\n{e}"))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        monitor: &Arc<StreamMonitor>,
        snapshot: &BroadcastSnapshot,
        cancellation_token: &CancellationToken,
    ) -> Result<RecordingSummary> {
        let config = &self.config;
        let plan = OutputPlan::resolve(
            &config.output_root,
            &config.filepath_template,
            snapshot,
            &Local::now(),
            config.is_segmented(),
        )?;
        if let Some(dir) = plan.directory() {
            ensure_dir_all_with_op("creating output directory", dir).await?;
        }

        let extractor_args = build_streamlink_args(
            &config.extra_args,
            &config.target_url,
            &config.target_stream,
        );
        let muxer_args = build_ffmpeg_args(
            &ContainerTags::from_snapshot(snapshot),
            config.segment_duration,
            &plan.muxer_target,
        );

        let mut pipeline = PipelineHandle::spawn(config, &extractor_args, &muxer_args)?;
        let result = self
            .supervise(&mut pipeline, monitor, &plan, cancellation_token)
            .await;
        let (extractor_exit, muxer_exit) = pipeline.teardown(config.stop_timeout).await;

        result.map(|()| RecordingSummary {
            output: plan,
            extractor_exit,
            muxer_exit,
        })
    }

    async fn supervise(
        &self,
        pipeline: &mut PipelineHandle,
        monitor: &Arc<StreamMonitor>,
        plan: &OutputPlan,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = cancellation_token.cancelled() => return Err(Error::Interrupted),
            _ = tokio::time::sleep(self.config.startup_grace) => {}
        }

        if pipeline.both_running()? {
            let token = cancellation_token.child_token();
            let handle = MetadataExporter::new(monitor.clone(), plan.side_file.clone())
                .spawn(token.clone());
            pipeline.export = Some((token, handle));
        } else {
            warn!("pipeline exited during startup; skipping metadata export");
        }

        tokio::select! {
            _ = cancellation_token.cancelled() => Err(Error::Interrupted),
            result = pipeline.wait_for_exit(self.config.stop_timeout) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::new("https://example.com/live");
        assert_eq!(config.target_stream, "best");
        assert!(config.is_segmented());
        assert_eq!(config.segment_duration, Some(Duration::from_secs(41400)));
        assert_eq!(config.output_root, PathBuf::from("/data"));
    }

    #[test]
    fn test_zero_segment_duration_is_single_file() {
        let mut config = RecorderConfig::new("u");
        config.segment_duration = Some(Duration::ZERO);
        assert!(!config.is_segmented());
        config.segment_duration = None;
        assert!(!config.is_segmented());
    }
}
