//! Shell step execution with timeouts and log capture.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Exit code zero.
    Success,
    /// Non-zero exit code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled,
    /// Killed after exceeding its time limit.
    TimedOut(Duration),
    /// A built-in step could not be carried out.
    Failed(String),
}

impl StepStatus {
    /// Whether the step succeeded.
    pub fn success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("succeeded"),
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled => f.write_str("was terminated by a signal"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Run `command` through `/bin/sh -c` with a cleared environment.
///
/// Output is appended to `log`. The shell runs in its own process group,
/// and the whole group is killed once `timeout` elapses, so background
/// jobs it started die with it. A timeout counts as a failure like any
/// non-zero exit.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or the shell cannot be spawned.
pub fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    log: &Path,
    timeout: Duration,
) -> io::Result<StepStatus> {
    let log_file = OpenOptions::new().create(true).append(true).open(log)?;

    let mut cmd = Command::new("/bin/sh");
    cmd.env_clear()
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file))
        .process_group(0);
    for (key, value) in env {
        cmd.env(key, value);
    }

    debug!(command, cwd = %cwd.display(), "running step");
    let mut child = cmd.spawn()?;

    let Some(status) = child.wait_timeout(timeout)? else {
        warn!(command, ?timeout, "step timed out, killing");
        kill_group(&mut child)?;
        child.wait()?;
        return Ok(StepStatus::TimedOut(timeout));
    };

    Ok(match status.code() {
        Some(0) => StepStatus::Success,
        Some(code) => StepStatus::Exited(code),
        None => StepStatus::Signaled,
    })
}

/// SIGKILL the process group led by `child`.
fn kill_group(child: &mut Child) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return child.kill();
    };
    // SAFETY: killpg takes no pointers; the group id was assigned at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group already gone; reap the leader normally.
        return child.kill().or(Ok(()));
    }
    Err(err)
}

/// Length of `path`, or zero if it does not exist yet.
pub fn log_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read the last `n` lines of `path` written after byte `offset`.
///
/// At most the final 16 KiB are read, so huge build logs never load fully.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_last_lines(path: &Path, offset: u64, n: usize) -> io::Result<String> {
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE).max(offset);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // If we seeked mid-output, skip the first (partial) line.
    let content = if seek_pos > offset {
        buffer.find('\n').map_or(&buffer[..], |idx| &buffer[idx + 1..])
    } else {
        &buffer[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Vec<(String, String)> {
        vec![("PATH".into(), "/usr/bin:/bin".into())]
    }

    #[test]
    fn test_exit_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let ok = run_shell("true", tmp.path(), &env(), &log, Duration::from_secs(10)).unwrap();
        assert_eq!(ok, StepStatus::Success);
        let failed = run_shell("exit 7", tmp.path(), &env(), &log, Duration::from_secs(10)).unwrap();
        assert_eq!(failed, StepStatus::Exited(7));
    }

    #[test]
    fn test_environment_is_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let status = run_shell(
            "test -z \"$CARGO_PKG_NAME\" && echo \"v=$MARK\"",
            tmp.path(),
            &[("MARK".into(), "ok".into())],
            &log,
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(status.success());
        assert_eq!(read_last_lines(&log, 0, 1).unwrap(), "v=ok");
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let status = run_shell(
            "sleep 5",
            tmp.path(),
            &env(),
            &log,
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(status, StepStatus::TimedOut(Duration::from_millis(200)));
        assert!(!status.success());
    }

    #[test]
    fn test_timeout_kills_background_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let status = run_shell(
            "(sleep 1; touch late) & sleep 5",
            tmp.path(),
            &env(),
            &log,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(status, StepStatus::TimedOut(_)));

        std::thread::sleep(Duration::from_millis(1800));
        assert!(!tmp.path().join("late").exists());
    }

    #[test]
    fn test_read_last_lines_respects_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        std::fs::write(&log, "one\ntwo\n").unwrap();
        let offset = log_len(&log);
        std::fs::write(&log, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(read_last_lines(&log, offset, 10).unwrap(), "three\nfour");
        assert_eq!(read_last_lines(&log, 0, 1).unwrap(), "four");
    }
}
