//! Job store: the single source of truth for file and job status.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;

use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo;
use crate::db::{Database, DatabaseError};
use crate::jobs::model::{
    format_timestamp, CheckJob, CheckMode, ClaimedJob, FileStats, FileWithJobs, JobStats,
    JobStatus, MediaFile,
};

/// Persistent store of files and their per-mode check jobs.
///
/// Every method is synchronous; each call holds the database lock for a
/// single statement or transaction.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Gets a cloned database handle.
    pub fn database(&self) -> Database {
        self.db.clone()
    }

    /// Registers a file by absolute path. A no-op if the path is already
    /// known; in both cases the stored file id is returned.
    pub fn insert_file(&self, path: &Path, filename: &str) -> Result<String, DatabaseError> {
        let row = FileRow {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string_lossy().to_string(),
            filename: filename.to_string(),
            duration_seconds: None,
            created_at: format_timestamp(Utc::now()),
        };
        let (id, created) = file_repo::insert_if_absent(&self.db, &row)?;
        if created {
            log::debug!("Registered file {} as {}", row.path, id);
        }
        Ok(id)
    }

    /// Creates one pending job per distinct file id, atomically as a set.
    /// Returns the new job ids in first-seen order; repeated ids are skipped.
    pub fn create_jobs(
        &self,
        file_ids: &[String],
        mode: CheckMode,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut seen = HashSet::new();
        let pairs: Vec<(String, String)> = file_ids
            .iter()
            .filter(|file_id| seen.insert(*file_id))
            .map(|file_id| (uuid::Uuid::new_v4().to_string(), file_id.clone()))
            .collect();
        let created_at = format_timestamp(Utc::now());

        job_repo::insert_pending_batch(&self.db, &pairs, mode.as_str(), &created_at)?;
        log::info!("Queued {} {} job(s)", pairs.len(), mode);

        Ok(pairs.into_iter().map(|(job_id, _)| job_id).collect())
    }

    /// Atomically claims the oldest pending job of `mode` and marks it
    /// `processing`. Returns `None` when nothing is pending.
    pub fn claim_next_pending_job(
        &self,
        mode: CheckMode,
    ) -> Result<Option<ClaimedJob>, DatabaseError> {
        match job_repo::claim_next_pending(&self.db, mode.as_str())? {
            Some((job, file)) => Ok(Some(ClaimedJob {
                job: CheckJob::try_from(job)?,
                file: MediaFile::from(file),
            })),
            None => Ok(None),
        }
    }

    /// Returns a claimed job to `pending` so a later claim can pick it up.
    pub fn release_claim(&self, job_id: &str) -> Result<bool, DatabaseError> {
        Ok(job_repo::release_claim(&self.db, job_id)? > 0)
    }

    /// Records a job's status. `completed_at` is stamped only for terminal
    /// statuses. Returns false if the job no longer exists.
    pub fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let completed_at = status
            .is_terminal()
            .then(|| format_timestamp(Utc::now()));
        let updated = job_repo::update_status(
            &self.db,
            job_id,
            status.as_str(),
            error_message,
            duration_seconds,
            completed_at.as_deref(),
        )?;
        Ok(updated > 0)
    }

    /// Caches the most recently observed media duration on the file row.
    pub fn update_file_duration(&self, file_id: &str, duration: f64) -> Result<(), DatabaseError> {
        file_repo::update_duration(&self.db, file_id, duration)
    }

    /// Returns abandoned `processing` jobs to `pending`.
    pub fn reset_processing_jobs(&self, mode: Option<CheckMode>) -> Result<usize, DatabaseError> {
        job_repo::reset_processing(&self.db, mode.map(|m| m.as_str()))
    }

    /// Deletes in-flight bookkeeping (`pending` and `processing` rows).
    pub fn delete_pending_and_processing_jobs(
        &self,
        mode: Option<CheckMode>,
    ) -> Result<usize, DatabaseError> {
        job_repo::delete_pending_and_processing(&self.db, mode.map(|m| m.as_str()))
    }

    pub fn get_job_stats(&self) -> Result<JobStats, DatabaseError> {
        Ok(job_repo::status_counts(&self.db, None)?.into())
    }

    pub fn get_job_stats_for_mode(&self, mode: CheckMode) -> Result<JobStats, DatabaseError> {
        Ok(job_repo::status_counts(&self.db, Some(mode.as_str()))?.into())
    }

    pub fn get_file_stats(&self) -> Result<FileStats, DatabaseError> {
        Ok(FileStats {
            total: file_repo::count(&self.db)?,
        })
    }

    /// Deletes all jobs and then all files.
    pub fn clear_all_files(&self) -> Result<usize, DatabaseError> {
        let removed = file_repo::delete_all_with_jobs(&self.db)?;
        log::info!("Cleared {} file(s) and their jobs", removed);
        Ok(removed)
    }

    pub fn get_file(&self, file_id: &str) -> Result<Option<MediaFile>, DatabaseError> {
        Ok(file_repo::find_by_id(&self.db, file_id)?.map(MediaFile::from))
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<CheckJob>, DatabaseError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(CheckJob::try_from)
            .transpose()
    }

    /// Job history of one file, most recent first.
    pub fn file_history(&self, file_id: &str) -> Result<Vec<CheckJob>, DatabaseError> {
        job_repo::list_for_file(&self.db, file_id)?
            .into_iter()
            .map(CheckJob::try_from)
            .collect()
    }

    /// Every file with its job history, ordered by path.
    pub fn list_files(&self) -> Result<Vec<FileWithJobs>, DatabaseError> {
        let files = file_repo::list_all(&self.db)?;
        let mut jobs_by_file: HashMap<String, Vec<CheckJob>> = HashMap::new();
        for row in job_repo::list_all(&self.db)? {
            let job = CheckJob::try_from(row)?;
            jobs_by_file.entry(job.file_id.clone()).or_default().push(job);
        }

        Ok(files
            .into_iter()
            .map(|row| {
                let jobs = jobs_by_file.remove(&row.id).unwrap_or_default();
                FileWithJobs {
                    file: MediaFile::from(row),
                    jobs,
                }
            })
            .collect())
    }
}
