//! Panic reporting.

use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::logging::{LOG_FILE_PREFIX, rolled_file_date};

/// Installs a global panic hook that logs panics via `tracing` and, in
/// `panic = "abort"` builds, appends them to today's log file directly since
/// the non-blocking file writer may not flush before the abort.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::capture(panic_info);
            tracing::error!(target: "vigil::panic", "{record}");

            if cfg!(panic = "abort") {
                let _ = append_to_todays_log(&log_dir, &record.to_string());
            }
        }));

        previous_hook(panic_info);
    }));
}

struct PanicRecord {
    thread: String,
    location: String,
    payload: String,
    backtrace: Backtrace,
}

impl PanicRecord {
    fn capture(panic_info: &PanicHookInfo<'_>) -> Self {
        let payload = panic_info
            .payload()
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| panic_info.to_string());

        Self {
            thread: std::thread::current()
                .name()
                .unwrap_or("<unnamed>")
                .to_string(),
            location: panic_info
                .location()
                .map_or_else(|| "<unknown>".to_string(), |loc| loc.to_string()),
            payload,
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC thread={} location={} payload={}\nBacktrace:\n{}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.thread,
            self.location,
            self.payload,
            self.backtrace
        )
    }
}

/// Append `record` to the file `tracing_appender::rolling::daily` writes today.
fn append_to_todays_log(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let filename = format!("{LOG_FILE_PREFIX}.{}", rolled_file_date().format("%Y-%m-%d"));
    let path = PathBuf::from(log_dir).join(filename);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_uses_rolling_file_name() {
        let dir = tempfile::tempdir().unwrap();
        append_to_todays_log(dir.path(), "first").unwrap();
        append_to_todays_log(dir.path(), "second").unwrap();

        let expected = dir
            .path()
            .join(format!("vigil.log.{}", rolled_file_date().format("%Y-%m-%d")));
        let text = std::fs::read_to_string(expected).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_append_shares_the_appender_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = tracing_appender::rolling::daily(dir.path(), LOG_FILE_PREFIX);
        appender.write_all(b"from tracing\n").unwrap();
        appender.flush().unwrap();

        append_to_todays_log(dir.path(), "from panic").unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let text = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(text, "from tracing\nfrom panic\n");
    }
}
