//! ffprobe/ffmpeg-backed checker.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;

use super::{truncate_chars, CheckOutcome, CheckOutput, Checker, OutputStream};
use crate::config::CheckerConfig;
use crate::jobs::CheckMode;

/// Runs `ffprobe` for quick checks and a full `ffmpeg` decode for full checks.
///
/// A check passes when the tool exits with status 0 and prints nothing on
/// stderr (both run with `-v error`, so any stderr line is a diagnostic).
#[derive(Debug, Clone)]
pub struct FfmpegChecker {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    max_error_length: usize,
}

impl FfmpegChecker {
    pub fn new(config: &CheckerConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            max_error_length: config.max_error_length,
        }
    }

    fn command(&self, path: &Path, mode: CheckMode) -> (&Path, TokioCommand) {
        match mode {
            CheckMode::Quick => {
                let mut cmd = TokioCommand::new(&self.ffprobe_path);
                cmd.args([
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(path);
                (self.ffprobe_path.as_path(), cmd)
            }
            CheckMode::Full => {
                let mut cmd = TokioCommand::new(&self.ffmpeg_path);
                cmd.args(["-hide_banner", "-nostdin", "-v", "error", "-i"])
                    .arg(path)
                    .args(["-f", "null", "-"]);
                (self.ffmpeg_path.as_path(), cmd)
            }
        }
    }
}

/// Forwards every line of `reader` to `output` and returns them all.
///
/// Bytes that are not valid UTF-8 are replaced, never dropped: a diagnostic
/// naming a Latin-1 path still counts as a diagnostic.
async fn pump_lines<R>(
    reader: Option<R>,
    stream: OutputStream,
    output: &dyn CheckOutput,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(reader) = reader else {
        return collected;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw).into_owned();
                output.line(stream, &line);
                collected.push(line);
            }
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed to read checker output");
                break;
            }
        }
    }
    collected
}

/// ffprobe prints the container duration, or `N/A` when unknown.
fn parse_duration(stdout: &[String]) -> Option<f64> {
    stdout
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

#[async_trait]
impl Checker for FfmpegChecker {
    async fn check(&self, path: &Path, mode: CheckMode, output: &dyn CheckOutput) -> CheckOutcome {
        let (tool, mut cmd) = self.command(path, mode);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(tool = %tool.display(), error = %e, "Failed to launch checker");
                let message = format!("Failed to launch {}: {}", tool.display(), e);
                return CheckOutcome::failed(truncate_chars(&message, self.max_error_length));
            }
        };

        let (stdout, stderr) = tokio::join!(
            pump_lines(child.stdout.take(), OutputStream::Stdout, output),
            pump_lines(child.stderr.take(), OutputStream::Stderr, output),
        );

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("Failed to wait for {}: {}", tool.display(), e);
                return CheckOutcome::failed(truncate_chars(&message, self.max_error_length));
            }
        };

        if status.success() && stderr.is_empty() {
            let duration = match mode {
                CheckMode::Quick => parse_duration(&stdout),
                CheckMode::Full => None,
            };
            return CheckOutcome::passed(duration);
        }

        let text = if stderr.is_empty() {
            format!("{} exited with {}", tool.display(), status)
        } else {
            stderr.join("\n")
        };
        tracing::debug!(path = %path.display(), %mode, %status, "Check failed");
        CheckOutcome::failed(truncate_chars(&text, self.max_error_length))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;
    use crate::checker::NoOutput;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(OutputStream, String)>>,
    }

    impl CheckOutput for Recorder {
        fn line(&self, stream: OutputStream, text: &str) {
            self.lines.lock().unwrap().push((stream, text.to_string()));
        }
    }

    fn checker_with(ffmpeg: PathBuf, ffprobe: PathBuf, max_error_length: usize) -> FfmpegChecker {
        FfmpegChecker::new(&CheckerConfig {
            ffmpeg_path: ffmpeg,
            ffprobe_path: ffprobe,
            max_error_length,
        })
    }

    #[cfg(unix)]
    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(&["12.500000".to_string()]), Some(12.5));
        assert_eq!(parse_duration(&["N/A".to_string()]), None);
        assert_eq!(parse_duration(&[]), None);
        assert_eq!(
            parse_duration(&["3.0".to_string(), "".to_string()]),
            Some(3.0)
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_binary_reports_launch_failure() {
        let missing = PathBuf::from("/nonexistent/mediacheck-ffprobe");
        let checker = checker_with(missing.clone(), missing, 500);

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Quick, &NoOutput)
            .await;

        assert!(!outcome.success);
        let text = outcome.error_text.unwrap();
        assert!(text.starts_with("Failed to launch /nonexistent/mediacheck-ffprobe:"));
    }

    #[tokio::test]
    #[serial]
    async fn test_launch_failure_is_truncated() {
        let missing = PathBuf::from("/nonexistent/mediacheck-ffmpeg");
        let checker = checker_with(missing.clone(), missing, 10);

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Full, &NoOutput)
            .await;

        assert_eq!(outcome.error_text.unwrap().chars().count(), 10);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_quick_check_parses_duration() {
        let dir = TempDir::new().unwrap();
        let probe = write_script(&dir, "ffprobe", "echo 42.250000");
        let checker = checker_with(PathBuf::from("/nonexistent"), probe, 500);
        let recorder = Recorder::default();

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Quick, &recorder)
            .await;

        assert_eq!(outcome, CheckOutcome::passed(Some(42.25)));
        let lines = recorder.lines.lock().unwrap();
        assert_eq!(*lines, vec![(OutputStream::Stdout, "42.250000".to_string())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_full_check_fails_on_diagnostics() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = write_script(
            &dir,
            "ffmpeg",
            "echo 'corrupt frame 12' >&2\necho 'corrupt frame 13' >&2\nexit 0",
        );
        let checker = checker_with(ffmpeg, PathBuf::from("/nonexistent"), 500);
        let recorder = Recorder::default();

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Full, &recorder)
            .await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.error_text.as_deref(),
            Some("corrupt frame 12\ncorrupt frame 13")
        );
        assert_eq!(recorder.lines.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_non_utf8_diagnostic_still_fails() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = write_script(
            &dir,
            "ffmpeg",
            "printf 'corrupt frame in caf\\351.mkv\\n' >&2\nprintf 'second\\n' >&2\nexit 0",
        );
        let checker = checker_with(ffmpeg, PathBuf::from("/nonexistent"), 500);
        let recorder = Recorder::default();

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Full, &recorder)
            .await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.error_text.as_deref(),
            Some("corrupt frame in caf\u{FFFD}.mkv\nsecond")
        );
        assert_eq!(recorder.lines.lock().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_nonzero_exit_without_output() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = write_script(&dir, "ffmpeg", "exit 3");
        let checker = checker_with(ffmpeg, PathBuf::from("/nonexistent"), 500);

        let outcome = checker
            .check(Path::new("/tmp/a.mkv"), CheckMode::Full, &NoOutput)
            .await;

        assert!(!outcome.success);
        assert!(outcome.error_text.unwrap().contains("exited with"));
    }
}
