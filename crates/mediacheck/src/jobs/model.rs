//! Domain types for files, check jobs and aggregate counts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::file_repo::FileRow;
use crate::db::job_repo::{JobRow, StatusCounts};
use crate::db::DatabaseError;

/// Verification strategy applied to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Fast structural probe of the container.
    Quick,
    /// Full decode of every stream.
    Full,
}

impl CheckMode {
    pub const ALL: [CheckMode; 2] = [CheckMode::Quick, CheckMode::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMode::Quick => "quick",
            CheckMode::Full => "full",
        }
    }

    /// The fixed command line recorded alongside reports for this mode.
    pub fn command_line(&self) -> &'static str {
        match self {
            CheckMode::Quick => {
                "ffprobe -v error -show_entries format=duration -of default=noprint_wrappers=1:nokey=1 <file>"
            }
            CheckMode::Full => "ffmpeg -hide_banner -nostdin -v error -i <file> -f null -",
        }
    }
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(CheckMode::Quick),
            "full" => Ok(CheckMode::Full),
            other => Err(format!("unknown check mode '{}'", other)),
        }
    }
}

/// Lifecycle status of a check job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Returns true for `completed` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            DateTime::<Utc>::default()
        })
}

// ─── Records ────────────────────────────────────────────────────────────────

/// A media file known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub id: String,
    pub path: String,
    pub filename: String,
    /// Duration reported by the most recent successful check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<FileRow> for MediaFile {
    fn from(row: FileRow) -> Self {
        Self {
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            path: row.path,
            filename: row.filename,
            duration_seconds: row.duration_seconds,
        }
    }
}

/// One verification attempt of one file under one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckJob {
    pub id: String,
    pub file_id: String,
    pub mode: CheckMode,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for CheckJob {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let mode = row
            .mode
            .parse::<CheckMode>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "mode",
                value: row.mode.clone(),
                id: row.id.clone(),
            })?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "status",
                value: row.status.clone(),
                id: row.id.clone(),
            })?;

        Ok(Self {
            created_at: parse_timestamp(&row.created_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            id: row.id,
            file_id: row.file_id,
            mode,
            status,
            error_message: row.error_message,
            duration_seconds: row.duration_seconds,
        })
    }
}

/// A job handed to exactly one worker, together with its file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub job: CheckJob,
    pub file: MediaFile,
}

/// A file with its job history, most recent first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWithJobs {
    #[serde(flatten)]
    pub file: MediaFile,
    pub jobs: Vec<CheckJob>,
}

impl FileWithJobs {
    /// The most recent job for `mode`, if any. No job means "unchecked".
    pub fn latest(&self, mode: CheckMode) -> Option<&CheckJob> {
        self.jobs.iter().find(|j| j.mode == mode)
    }
}

// ─── Aggregates ─────────────────────────────────────────────────────────────

/// Job counts per status, taken as one consistent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub error: u64,
}

impl JobStats {
    /// Returns true when nothing is left to claim or finish.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

impl From<StatusCounts> for JobStats {
    fn from(c: StatusCounts) -> Self {
        Self {
            total: c.total,
            pending: c.pending,
            processing: c.processing,
            completed: c.completed,
            error: c.error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub total: u64,
}
