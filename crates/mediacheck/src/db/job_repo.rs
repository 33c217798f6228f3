//! Job repository: queue operations for the `jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::file_repo::FileRow;
use super::{Database, DatabaseError};

const JOB_COLUMNS: &str =
    "id, file_id, mode, status, error_message, duration_seconds, created_at, completed_at";

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub file_id: String,
    pub mode: String,
    pub status: String,
    pub error_message: Option<String>,
    pub duration_seconds: Option<f64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_id: row.get("file_id")?,
            mode: row.get("mode")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            duration_seconds: row.get("duration_seconds")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Aggregate job counts taken from a single `SELECT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub error: u64,
}

/// Inserts one pending job per `(id, file_id)` pair in a single transaction.
///
/// Either every row becomes visible or none does.
pub fn insert_pending_batch(
    db: &Database,
    jobs: &[(String, String)],
    mode: &str,
    created_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "INSERT INTO jobs (id, file_id, mode, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
        )?;
        for (job_id, file_id) in jobs {
            stmt.execute(params![job_id, file_id, mode, created_at])?;
        }
        Ok(jobs.len())
    })
}

/// Atomically claims the oldest pending job of `mode` whose file is not
/// already being checked in that mode.
///
/// The select and the status flip happen in one `UPDATE … RETURNING`
/// statement inside an immediate transaction, so two callers can never
/// receive the same row, nor two rows of the same file and mode.
pub fn claim_next_pending(
    db: &Database,
    mode: &str,
) -> Result<Option<(JobRow, FileRow)>, DatabaseError> {
    db.with_tx(|tx| {
        let sql = format!(
            "UPDATE jobs SET status = 'processing'
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE mode = ?1 AND status = 'pending'
                   AND file_id NOT IN (
                       SELECT file_id FROM jobs
                       WHERE mode = ?1 AND status = 'processing'
                   )
                 ORDER BY created_at, rowid
                 LIMIT 1
             )
             RETURNING {}",
            JOB_COLUMNS
        );
        let job = tx
            .query_row(&sql, params![mode], JobRow::from_row)
            .optional()?;

        let Some(job) = job else {
            return Ok(None);
        };

        let file = tx.query_row(
            "SELECT * FROM files WHERE id = ?1",
            params![job.file_id],
            FileRow::from_row,
        )?;

        Ok(Some((job, file)))
    })
}

/// Writes a job's outcome. Returns the number of rows touched (0 if the
/// job has been deleted in the meantime).
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    error_message: Option<&str>,
    duration_seconds: Option<f64>,
    completed_at: Option<&str>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET status = ?2, error_message = ?3, duration_seconds = ?4,
             completed_at = ?5
             WHERE id = ?1",
            params![id, status, error_message, duration_seconds, completed_at],
        )?;
        Ok(updated)
    })
}

/// Hands one claimed job back to the queue. Returns 0 if the job is gone
/// or no longer `processing`.
pub fn release_claim(db: &Database, id: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET status = 'pending' WHERE id = ?1 AND status = 'processing'",
            params![id],
        )?;
        Ok(updated)
    })
}

/// Moves `processing` jobs back to `pending`, optionally for one mode only.
pub fn reset_processing(db: &Database, mode: Option<&str>) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET status = 'pending'
             WHERE status = 'processing' AND (?1 IS NULL OR mode = ?1)",
            params![mode],
        )?;
        Ok(updated)
    })
}

/// Deletes `pending` and `processing` jobs, optionally for one mode only.
pub fn delete_pending_and_processing(
    db: &Database,
    mode: Option<&str>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM jobs
             WHERE status IN ('pending', 'processing') AND (?1 IS NULL OR mode = ?1)",
            params![mode],
        )?;
        Ok(deleted)
    })
}

/// Counts jobs per status in one statement, optionally for one mode only.
pub fn status_counts(db: &Database, mode: Option<&str>) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let counts = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'processing'), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'error'), 0)
             FROM jobs
             WHERE ?1 IS NULL OR mode = ?1",
            params![mode],
            |r| {
                Ok(StatusCounts {
                    total: r.get(0)?,
                    pending: r.get(1)?,
                    processing: r.get(2)?,
                    completed: r.get(3)?,
                    error: r.get(4)?,
                })
            },
        )?;
        Ok(counts)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Lists every job of a file, most recent first.
pub fn list_for_file(db: &Database, file_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs WHERE file_id = ?1 ORDER BY created_at DESC, rowid DESC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![file_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every job, most recent first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC, rowid DESC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::db::file_repo;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn seed_file(db: &Database, id: &str) {
        file_repo::insert_if_absent(
            db,
            &FileRow {
                id: id.to_string(),
                path: format!("/media/{}.mkv", id),
                filename: format!("{}.mkv", id),
                duration_seconds: None,
                created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            },
        )
        .unwrap();
    }

    fn seed_jobs(db: &Database, mode: &str, count: usize) -> Vec<String> {
        let mut pairs = Vec::new();
        for i in 0..count {
            let file_id = format!("f{}", i);
            seed_file(db, &file_id);
            pairs.push((format!("{}-j{}", mode, i), file_id));
        }
        insert_pending_batch(db, &pairs, mode, "2026-01-01T00:00:00.000000Z").unwrap();
        pairs.into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_insert_pending_batch() {
        let db = test_db();
        seed_jobs(&db, "quick", 3);

        let counts = status_counts(&db, None).unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending, 3);
    }

    #[test]
    fn test_insert_pending_batch_is_all_or_nothing() {
        let db = test_db();
        seed_file(&db, "f0");
        let pairs = vec![
            ("j1".to_string(), "f0".to_string()),
            ("j2".to_string(), "missing".to_string()),
        ];

        assert!(insert_pending_batch(&db, &pairs, "quick", "2026-01-01").is_err());
        assert_eq!(status_counts(&db, None).unwrap().total, 0);
    }

    #[test]
    fn test_claim_is_fifo_and_mode_scoped() {
        let db = test_db();
        let quick = seed_jobs(&db, "quick", 2);
        insert_pending_batch(
            &db,
            &[("full-j0".to_string(), "f0".to_string())],
            "full",
            "2025-12-31T00:00:00.000000Z",
        )
        .unwrap();

        let (job, file) = claim_next_pending(&db, "quick").unwrap().unwrap();
        assert_eq!(job.id, quick[0]);
        assert_eq!(job.status, "processing");
        assert_eq!(file.id, "f0");

        let (job, _) = claim_next_pending(&db, "quick").unwrap().unwrap();
        assert_eq!(job.id, quick[1]);

        assert!(claim_next_pending(&db, "quick").unwrap().is_none());

        let (job, _) = claim_next_pending(&db, "full").unwrap().unwrap();
        assert_eq!(job.id, "full-j0");
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        let db = test_db();
        let seeded: HashSet<String> = seed_jobs(&db, "full", 40).into_iter().collect();

        let claimed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let claimed = Arc::clone(&claimed);
                std::thread::spawn(move || {
                    while let Some((job, _)) = claim_next_pending(&db, "full").unwrap() {
                        claimed.lock().unwrap().push(job.id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock().unwrap();
        let unique: HashSet<String> = claimed.iter().cloned().collect();
        assert_eq!(claimed.len(), 40);
        assert_eq!(unique, seeded);
    }

    #[test]
    fn test_claim_skips_file_already_processing_in_mode() {
        let db = test_db();
        seed_file(&db, "f0");
        seed_file(&db, "f1");
        let pairs = vec![
            ("a".to_string(), "f0".to_string()),
            ("b".to_string(), "f0".to_string()),
            ("c".to_string(), "f1".to_string()),
        ];
        insert_pending_batch(&db, &pairs, "quick", "2026-01-01T00:00:00.000000Z").unwrap();
        insert_pending_batch(
            &db,
            &[("full-a".to_string(), "f0".to_string())],
            "full",
            "2026-01-01T00:00:00.000000Z",
        )
        .unwrap();

        let (first, _) = claim_next_pending(&db, "quick").unwrap().unwrap();
        let (second, _) = claim_next_pending(&db, "quick").unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "c");
        assert!(claim_next_pending(&db, "quick").unwrap().is_none());

        // other modes are unaffected
        let (full, _) = claim_next_pending(&db, "full").unwrap().unwrap();
        assert_eq!(full.id, "full-a");

        update_status(&db, "a", "completed", None, None, Some("2026-01-01")).unwrap();
        let (third, _) = claim_next_pending(&db, "quick").unwrap().unwrap();
        assert_eq!(third.id, "b");
    }

    #[test]
    fn test_release_claim_only_touches_processing() {
        let db = test_db();
        let ids = seed_jobs(&db, "quick", 2);
        claim_next_pending(&db, "quick").unwrap();

        assert_eq!(release_claim(&db, &ids[0]).unwrap(), 1);
        assert_eq!(release_claim(&db, &ids[1]).unwrap(), 0);
        assert_eq!(release_claim(&db, "missing").unwrap(), 0);
        assert_eq!(status_counts(&db, None).unwrap().pending, 2);
    }

    #[test]
    fn test_update_status() {
        let db = test_db();
        let ids = seed_jobs(&db, "quick", 1);

        let touched = update_status(
            &db,
            &ids[0],
            "error",
            Some("moov atom not found"),
            Some(1.5),
            Some("2026-01-01T00:01:00.000000Z"),
        )
        .unwrap();
        assert_eq!(touched, 1);

        let row = find_by_id(&db, &ids[0]).unwrap().unwrap();
        assert_eq!(row.status, "error");
        assert_eq!(row.error_message.as_deref(), Some("moov atom not found"));
        assert_eq!(row.duration_seconds, Some(1.5));
        assert!(row.completed_at.is_some());
    }

    #[test]
    fn test_update_status_on_deleted_job_touches_nothing() {
        let db = test_db();
        let ids = seed_jobs(&db, "quick", 1);
        claim_next_pending(&db, "quick").unwrap();
        delete_pending_and_processing(&db, Some("quick")).unwrap();

        let touched = update_status(&db, &ids[0], "completed", None, None, None).unwrap();
        assert_eq!(touched, 0);
        assert!(find_by_id(&db, &ids[0]).unwrap().is_none());
    }

    #[test]
    fn test_reset_processing_by_mode() {
        let db = test_db();
        seed_jobs(&db, "quick", 1);
        insert_pending_batch(
            &db,
            &[("full-j0".to_string(), "f0".to_string())],
            "full",
            "2026-01-01T00:00:00.000000Z",
        )
        .unwrap();
        claim_next_pending(&db, "quick").unwrap();
        claim_next_pending(&db, "full").unwrap();

        assert_eq!(reset_processing(&db, Some("quick")).unwrap(), 1);
        assert_eq!(status_counts(&db, Some("quick")).unwrap().pending, 1);
        assert_eq!(status_counts(&db, Some("full")).unwrap().processing, 1);

        assert_eq!(reset_processing(&db, None).unwrap(), 1);
        assert_eq!(status_counts(&db, None).unwrap().processing, 0);
    }

    #[test]
    fn test_delete_pending_and_processing_keeps_history() {
        let db = test_db();
        let ids = seed_jobs(&db, "quick", 3);
        claim_next_pending(&db, "quick").unwrap();
        update_status(&db, &ids[0], "completed", None, None, Some("2026-01-01")).unwrap();
        claim_next_pending(&db, "quick").unwrap();

        assert_eq!(delete_pending_and_processing(&db, None).unwrap(), 2);
        let counts = status_counts(&db, None).unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.completed, 1);
    }

    #[test]
    fn test_status_counts_on_empty_table() {
        let db = test_db();
        assert_eq!(status_counts(&db, None).unwrap(), StatusCounts::default());
    }

    #[test]
    fn test_list_for_file_most_recent_first() {
        let db = test_db();
        seed_file(&db, "f0");
        insert_pending_batch(
            &db,
            &[("old".to_string(), "f0".to_string())],
            "quick",
            "2026-01-01T00:00:00.000000Z",
        )
        .unwrap();
        insert_pending_batch(
            &db,
            &[("new".to_string(), "f0".to_string())],
            "quick",
            "2026-01-02T00:00:00.000000Z",
        )
        .unwrap();

        let ids: Vec<String> = list_for_file(&db, "f0")
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(list_all(&db).unwrap().len(), 2);
    }
}
