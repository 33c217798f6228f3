//! Worker/log events: running state, output lines, current file, clears.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Origin of a line of checker output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Running state of a worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    #[default]
    Stopped,
}

/// One timestamped line in a worker log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: OutputStream,
    pub data: String,
}

impl LogLine {
    pub fn new(stream: OutputStream, data: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            data: data.to_string(),
        }
    }
}

/// A worker/log event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    State {
        #[serde(rename = "workerId")]
        worker_id: u64,
        status: WorkerStatus,
    },
    Output {
        #[serde(rename = "workerId")]
        worker_id: u64,
        line: LogLine,
    },
    File {
        #[serde(rename = "workerId")]
        worker_id: u64,
        file: Option<String>,
    },
    Clear,
}

/// Broadcasts worker/log events to every current subscriber.
#[derive(Clone)]
pub struct WorkerEventBroadcaster {
    sender: Arc<broadcast::Sender<WorkerEvent>>,
}

impl WorkerEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: WorkerEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.sender.subscribe()
    }

    pub fn state(&self, worker_id: u64, status: WorkerStatus) {
        self.send(WorkerEvent::State { worker_id, status });
    }

    pub fn output(&self, worker_id: u64, line: LogLine) {
        self.send(WorkerEvent::Output { worker_id, line });
    }

    pub fn file(&self, worker_id: u64, file: Option<String>) {
        self.send(WorkerEvent::File { worker_id, file });
    }

    pub fn clear(&self) {
        self.send(WorkerEvent::Clear);
    }
}

impl Default for WorkerEventBroadcaster {
    fn default() -> Self {
        Self::new(4096)
    }
}
