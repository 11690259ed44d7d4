//! Child-process helpers shared across the workspace.
//!
//! Everything vigil launches (the status probe, the extractor and the muxer)
//! goes through these builders so the platform flags and the teardown rules
//! stay in one place.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

/// Run `program args…` and return the first non-empty line it prints.
///
/// Used for startup diagnostics (`streamlink --version`, `ffmpeg -version`).
/// Returns `None` when the tool is missing or prints nothing.
#[cfg(feature = "tokio")]
pub async fn tool_version(program: impl AsRef<OsStr>, args: &[&str]) -> Option<String> {
    let output = tokio_command(program).args(args).output().await.ok()?;
    first_output_line(output)
}

#[cfg(feature = "tokio")]
fn first_output_line(output: std::process::Output) -> Option<String> {
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Human-readable description of how a child process ended.
///
/// On unix a signal-terminated process reports `killed by signal N`
/// instead of a missing exit code.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    "unknown exit status".to_string()
}

/// Exit code of a finished process, mapping signal deaths to `128 + signo`
/// the way a shell reports them.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` for a supervised child.
///
/// The child is killed when its handle is dropped, so a panicking or
/// cancelled supervisor cannot leave it running.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Kill a child if it is still running and reap it.
///
/// Returns the final status, or `None` if the process did not exit within
/// `reap_timeout` after the kill was delivered.
#[cfg(feature = "tokio")]
pub async fn terminate(
    child: &mut tokio::process::Child,
    reap_timeout: std::time::Duration,
) -> std::io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }
    child.start_kill()?;
    match tokio::time::timeout(reap_timeout, child.wait()).await {
        Ok(status) => status.map(Some),
        Err(_) => Ok(None),
    }
}
