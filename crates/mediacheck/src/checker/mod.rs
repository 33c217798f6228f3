//! The verification capability invoked by workers.
//!
//! A [`Checker`] turns `(path, mode)` into a [`CheckOutcome`] and streams its
//! console output line by line while it runs.

pub mod ffmpeg;

use std::path::Path;

use async_trait::async_trait;

use crate::jobs::CheckMode;

pub use crate::broadcast::OutputStream;
pub use ffmpeg::FfmpegChecker;

/// Result of one verification.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub success: bool,
    pub error_text: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl CheckOutcome {
    pub fn passed(duration_seconds: Option<f64>) -> Self {
        Self {
            success: true,
            error_text: None,
            duration_seconds,
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        Self {
            success: false,
            error_text: Some(error_text.into()),
            duration_seconds: None,
        }
    }
}

/// Receives output lines as the checker produces them.
pub trait CheckOutput: Send + Sync {
    fn line(&self, stream: OutputStream, text: &str);
}

/// Discards all output.
pub struct NoOutput;

impl CheckOutput for NoOutput {
    fn line(&self, _stream: OutputStream, _text: &str) {}
}

#[async_trait]
pub trait Checker: Send + Sync {
    /// Verifies one file. Failures are reported in the outcome, never as a panic
    /// or an error, so one bad file cannot take down a worker.
    async fn check(&self, path: &Path, mode: CheckMode, output: &dyn CheckOutput) -> CheckOutcome;
}

/// Truncates `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
        // multi-byte characters count once
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = CheckOutcome::passed(Some(1.5));
        assert!(ok.success);
        assert_eq!(ok.duration_seconds, Some(1.5));

        let bad = CheckOutcome::failed("moov atom not found");
        assert!(!bad.success);
        assert_eq!(bad.error_text.as_deref(), Some("moov atom not found"));
    }
}
