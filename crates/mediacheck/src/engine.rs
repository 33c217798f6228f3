//! Composition root: wires the store, event bus, log sink, checker and
//! controller together and exposes the operations callers need.

use std::path::Path;
use std::sync::Arc;

use crate::broadcast::{EventBus, LiveSubscription, Snapshot};
use crate::checker::{Checker, FfmpegChecker};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::jobs::{CheckJob, CheckMode, FileStats, FileWithJobs, JobStats, JobStore};
use crate::worker::{CheckController, CheckTiming, WorkerLogSink, WorkerOutput};

pub struct CheckEngine {
    config: Config,
    controller: CheckController,
}

impl CheckEngine {
    /// Opens the configured database and checks files with ffmpeg.
    pub fn open(config: Config) -> Result<Self> {
        let checker = Arc::new(FfmpegChecker::new(&config.checker));
        Self::with_checker(config, checker)
    }

    pub fn with_checker(config: Config, checker: Arc<dyn Checker>) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Self::from_parts(config, db, checker)
    }

    /// Builds an engine over an already opened database.
    ///
    /// Jobs left `processing` by a previous process are returned to
    /// `pending` here; nothing else would ever claim them again.
    pub fn from_parts(config: Config, db: Database, checker: Arc<dyn Checker>) -> Result<Self> {
        let store = JobStore::new(db);

        let recovered = store.reset_processing_jobs(None)?;
        if recovered > 0 {
            tracing::info!(recovered, "Returned abandoned jobs to the queue");
        }

        let events = EventBus::new(config.events.check_capacity, config.events.worker_capacity);
        let log_sink = Arc::new(WorkerLogSink::new(
            config.log_directory.clone(),
            events.workers().clone(),
        ));
        let controller =
            CheckController::new(store, checker, log_sink, events, config.concurrency);

        Ok(Self { config, controller })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        self.controller.store()
    }

    pub fn controller(&self) -> &CheckController {
        &self.controller
    }

    pub fn events(&self) -> &EventBus {
        self.controller.events()
    }

    /// Registers a file, using its final path component as the filename.
    pub fn add_file(&self, path: &Path) -> Result<String> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(self.store().insert_file(path, &filename)?)
    }

    pub fn start_checking(
        &self,
        mode: CheckMode,
        file_ids: &[String],
        concurrency: Option<usize>,
    ) -> Result<bool> {
        self.controller.start_checking(mode, file_ids, concurrency)
    }

    pub fn stop_checking(&self, mode: Option<CheckMode>) -> Result<usize> {
        self.controller.stop_checking(mode)
    }

    pub fn is_checker_running(&self, mode: Option<CheckMode>) -> bool {
        self.controller.is_checker_running(mode)
    }

    pub fn get_active_workers(&self, mode: Option<CheckMode>) -> usize {
        self.controller.get_active_workers(mode)
    }

    pub fn get_running_modes(&self) -> Vec<CheckMode> {
        self.controller.get_running_modes()
    }

    pub fn get_check_timing(&self) -> CheckTiming {
        self.controller.get_check_timing()
    }

    pub fn get_job_stats(&self) -> Result<JobStats> {
        Ok(self.store().get_job_stats()?)
    }

    pub fn get_job_stats_for_mode(&self, mode: CheckMode) -> Result<JobStats> {
        Ok(self.store().get_job_stats_for_mode(mode)?)
    }

    pub fn get_file_stats(&self) -> Result<FileStats> {
        Ok(self.store().get_file_stats()?)
    }

    pub fn list_files(&self) -> Result<Vec<FileWithJobs>> {
        Ok(self.store().list_files()?)
    }

    pub fn file_history(&self, file_id: &str) -> Result<Vec<CheckJob>> {
        Ok(self.store().file_history(file_id)?)
    }

    pub fn get_worker_outputs(&self) -> Result<Vec<WorkerOutput>> {
        Ok(self.controller.log_sink().get_worker_outputs()?)
    }

    /// Deletes every file and job.
    pub fn clear_all_files(&self) -> Result<usize> {
        Ok(self.store().clear_all_files()?)
    }

    /// Deletes every worker log and publishes one `clear` event.
    pub fn clear_worker_logs(&self) -> Result<usize> {
        Ok(self.controller.log_sink().clear_workers()?)
    }

    /// Attaches a live observer.
    ///
    /// The receivers are attached before the snapshot is read, so anything
    /// published in between is delivered after the snapshot rather than lost.
    pub fn subscribe(&self) -> Result<LiveSubscription> {
        let receivers = self.events().subscribe();

        let snapshot = Snapshot {
            job_stats: self.get_job_stats()?,
            file_stats: self.get_file_stats()?,
            running_modes: self.get_running_modes(),
            timing: self.get_check_timing(),
            workers: self.get_worker_outputs()?,
        };

        Ok(LiveSubscription::new(
            receivers,
            snapshot,
            self.config.events.keep_alive(),
        ))
    }
}
