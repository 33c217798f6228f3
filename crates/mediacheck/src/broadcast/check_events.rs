//! File/job events: status changes, job outcomes and run completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::{CheckJob, CheckMode, JobStats, JobStatus};

/// Kind of file/job event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckEventKind {
    /// A job changed status without finishing (claimed by a worker).
    StatusChange,
    /// A job reached `completed` or `error`.
    JobUpdate,
    /// No mode is active any more (drained or stopped).
    CheckComplete,
}

/// A file/job event. Optional fields are set depending on the kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEvent {
    #[serde(rename = "type")]
    pub kind: CheckEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<CheckMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    pub timestamp: DateTime<Utc>,
}

impl CheckEvent {
    fn for_job(kind: CheckEventKind, job: &CheckJob, status: JobStatus) -> Self {
        Self {
            kind,
            job_id: Some(job.id.clone()),
            file_id: Some(job.file_id.clone()),
            mode: Some(job.mode),
            status: Some(status),
            error_message: None,
            stats: None,
            timestamp: Utc::now(),
        }
    }

    /// A job was claimed and is now `processing`.
    pub fn processing(job: &CheckJob) -> Self {
        Self::for_job(CheckEventKind::StatusChange, job, JobStatus::Processing)
    }

    /// A job finished, with the aggregate counts right after persisting it.
    pub fn job_finished(
        job: &CheckJob,
        status: JobStatus,
        error_message: Option<&str>,
        stats: Option<JobStats>,
    ) -> Self {
        let mut event = Self::for_job(CheckEventKind::JobUpdate, job, status);
        event.error_message = error_message.map(str::to_string);
        event.stats = stats;
        event
    }

    /// The overall run is over.
    pub fn check_complete(stats: Option<JobStats>) -> Self {
        Self {
            kind: CheckEventKind::CheckComplete,
            job_id: None,
            file_id: None,
            mode: None,
            status: None,
            error_message: None,
            stats,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts file/job events to every current subscriber.
#[derive(Clone)]
pub struct CheckEventBroadcaster {
    sender: Arc<broadcast::Sender<CheckEvent>>,
}

impl CheckEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: CheckEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber. Events sent before this call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<CheckEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CheckEventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}
