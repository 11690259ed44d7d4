//! Forwarding of child-process diagnostics into the log.
//!
//! ffmpeg rewrites its progress line with carriage returns (`\r`). When the
//! stream is piped those updates are not newline-delimited, so a plain
//! `lines()` reader would sit on them until the next `\n`. Records here are
//! delimited by either `\n` or `\r`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Log target for forwarded child-process output.
pub const SUBPROCESS_TARGET: &str = "vigil::subprocess";

/// Reads an async stream and yields text records delimited by `\n` or `\r`.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Returns the next non-empty record, or `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = self.pending.iter().position(|&b| is_delimiter(b)) {
                let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
                let delimiters = self
                    .pending
                    .iter()
                    .take_while(|&&b| is_delimiter(b))
                    .count();
                self.pending.drain(..delimiters);

                let record = String::from_utf8_lossy(&record_bytes).trim().to_string();
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                return Ok((!record.is_empty()).then_some(record));
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

/// Severity a forwarded line is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLevel {
    Debug,
    Info,
    Warn,
}

fn classify(line: &str) -> LineLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("[cli][error]") || lower.contains("error") {
        LineLevel::Warn
    } else if lower.starts_with("frame=") || lower.starts_with("size=") {
        // ffmpeg progress
        LineLevel::Debug
    } else {
        LineLevel::Info
    }
}

/// Forward every record of `stream` to the log until it closes.
///
/// Returns the number of records forwarded. The stream closes when the
/// process exits, so the task's lifetime is bounded by the child's.
pub async fn drain_to_log<R>(stream: R, process: &'static str) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = OutputRecordReader::new(stream);
    let mut forwarded = 0usize;
    loop {
        match reader.next_record().await {
            Ok(Some(line)) => {
                forwarded += 1;
                match classify(&line) {
                    LineLevel::Debug => debug!(target: SUBPROCESS_TARGET, process, "{line}"),
                    LineLevel::Info => info!(target: SUBPROCESS_TARGET, process, "{line}"),
                    LineLevel::Warn => warn!(target: SUBPROCESS_TARGET, process, "{line}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(target: SUBPROCESS_TARGET, process, error = %e, "error reading process output");
                break;
            }
        }
    }
    debug!(process, forwarded, "log drain finished");
    forwarded
}

/// Spawn [`drain_to_log`] as a background task.
pub fn spawn_drain<R>(stream: R, process: &'static str) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain_to_log(stream, process))
}
