//! Durable per-worker output logs plus in-memory worker status.
//!
//! Each worker writes `<log_dir>/worker-<id>.log`, one JSON object per line:
//! `{"timestamp": ..., "stream": "stdout"|"stderr", "data": ...}`. The files
//! outlive the process; status and current file are memory-only and read as
//! `stopped` / none after a restart.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;

use crate::broadcast::{LogLine, OutputStream, WorkerEventBroadcaster, WorkerStatus};

#[derive(Error, Debug)]
pub enum LogSinkError {
    #[error("Worker log I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize log line: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything known about one worker: durable lines plus live status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOutput {
    pub worker_id: u64,
    pub status: WorkerStatus,
    pub current_file: Option<String>,
    pub lines: Vec<LogLine>,
}

struct WorkerState {
    status: WorkerStatus,
    current_file: Option<String>,
    log: Option<File>,
}

pub struct WorkerLogSink {
    log_dir: PathBuf,
    workers: Mutex<HashMap<u64, WorkerState>>,
    events: WorkerEventBroadcaster,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LogSinkError + '_ {
    move |source| LogSinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parses `worker-<id>.log` into `<id>`.
fn worker_id_from_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("worker-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

impl WorkerLogSink {
    pub fn new(log_dir: impl Into<PathBuf>, events: WorkerEventBroadcaster) -> Self {
        Self {
            log_dir: log_dir.into(),
            workers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_path(&self, worker_id: u64) -> PathBuf {
        self.log_dir.join(format!("worker-{}.log", worker_id))
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<u64, WorkerState>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or truncates) the worker's log and marks it running.
    pub fn init_worker(&self, worker_id: u64) -> Result<(), LogSinkError> {
        fs::create_dir_all(&self.log_dir).map_err(io_err(&self.log_dir))?;
        let path = self.log_path(worker_id);
        let file = File::create(&path).map_err(io_err(&path))?;

        self.workers().insert(
            worker_id,
            WorkerState {
                status: WorkerStatus::Running,
                current_file: None,
                log: Some(file),
            },
        );

        self.events.state(worker_id, WorkerStatus::Running);
        Ok(())
    }

    /// Appends one line to the worker's log. Unknown and stopped workers are
    /// ignored, so live observers never see a line the log will not replay.
    pub fn append_worker_output(
        &self,
        worker_id: u64,
        stream: OutputStream,
        text: &str,
    ) -> Result<(), LogSinkError> {
        self.append_while(worker_id, stream, text, || true)
    }

    /// Like [`Self::append_worker_output`], but only if `still_current`
    /// holds. It is evaluated under the worker table lock, so a clear and
    /// re-init of the same id cannot slip in between check and write.
    pub(crate) fn append_while(
        &self,
        worker_id: u64,
        stream: OutputStream,
        text: &str,
        still_current: impl FnOnce() -> bool,
    ) -> Result<(), LogSinkError> {
        let line = LogLine::new(stream, text);
        let mut workers = self.workers();
        if !still_current() {
            return Ok(());
        }
        let Some(file) = workers.get_mut(&worker_id).and_then(|s| s.log.as_mut()) else {
            return Ok(());
        };

        let mut encoded = serde_json::to_string(&line)?;
        encoded.push('\n');
        let path = self.log_path(worker_id);
        file.write_all(encoded.as_bytes()).map_err(io_err(&path))?;

        self.events.output(worker_id, line);
        Ok(())
    }

    pub fn set_worker_file(&self, worker_id: u64, file: Option<&str>) {
        self.set_worker_file_while(worker_id, file, || true);
    }

    /// Sets the current file if `still_current` holds under the table lock.
    pub(crate) fn set_worker_file_while(
        &self,
        worker_id: u64,
        file: Option<&str>,
        still_current: impl FnOnce() -> bool,
    ) {
        let mut workers = self.workers();
        if !still_current() {
            return;
        }
        let Some(state) = workers.get_mut(&worker_id) else {
            return;
        };
        state.current_file = file.map(str::to_string);
        self.events.file(worker_id, file.map(str::to_string));
    }

    /// Marks the worker stopped and closes its log. The file stays on disk.
    pub fn stop_worker(&self, worker_id: u64) {
        {
            let mut workers = self.workers();
            let Some(state) = workers.get_mut(&worker_id) else {
                return;
            };
            state.status = WorkerStatus::Stopped;
            state.current_file = None;
            state.log = None;
        }
        self.events.state(worker_id, WorkerStatus::Stopped);
    }

    /// Forgets all workers and deletes every worker log. Returns the number of
    /// files removed and publishes a single `clear` event.
    pub fn clear_workers(&self) -> Result<usize, LogSinkError> {
        self.workers().clear();

        let mut removed = 0;
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(&self.log_dir)(e)),
        };

        for entry in entries.into_iter().flatten() {
            let entry = entry.map_err(io_err(&self.log_dir))?;
            let is_worker_log = entry
                .file_name()
                .to_str()
                .and_then(worker_id_from_file_name)
                .is_some();
            if !is_worker_log {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }

        log::debug!("Cleared {} worker logs in {}", removed, self.log_dir.display());
        self.events.clear();
        Ok(removed)
    }

    /// Every durable worker log, ordered by worker id.
    pub fn get_worker_outputs(&self) -> Result<Vec<WorkerOutput>, LogSinkError> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.log_dir)(e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.log_dir))?;
            if let Some(id) = entry.file_name().to_str().and_then(worker_id_from_file_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut outputs = Vec::with_capacity(ids.len());
        for worker_id in ids {
            let lines = self.read_lines(worker_id)?;
            let (status, current_file) = match self.workers().get(&worker_id) {
                Some(state) => (state.status, state.current_file.clone()),
                None => (WorkerStatus::Stopped, None),
            };
            outputs.push(WorkerOutput {
                worker_id,
                status,
                current_file,
                lines,
            });
        }
        Ok(outputs)
    }

    fn read_lines(&self, worker_id: u64) -> Result<Vec<LogLine>, LogSinkError> {
        let path = self.log_path(worker_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            // removed by a concurrent clear
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };

        let mut lines = Vec::new();
        for raw in BufReader::new(file).lines() {
            let raw = raw.map_err(io_err(&path))?;
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogLine>(&raw) {
                Ok(line) => lines.push(line),
                Err(e) => log::warn!("Skipping malformed line in {}: {}", path.display(), e),
            }
        }
        Ok(lines)
    }
}

/// Appends are best-effort from a worker's point of view.
pub(crate) fn append_or_warn(
    sink: &WorkerLogSink,
    worker_id: u64,
    stream: OutputStream,
    text: &str,
    still_current: impl FnOnce() -> bool,
) {
    if let Err(e) = sink.append_while(worker_id, stream, text, still_current) {
        tracing::warn!(worker_id, error = %e, "Failed to append worker output");
    }
}
