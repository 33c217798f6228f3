//! File repository: CRUD operations for the `files` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw file row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub id: String,
    pub path: String,
    pub filename: String,
    pub duration_seconds: Option<f64>,
    pub created_at: String,
}

impl FileRow {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            path: row.get("path")?,
            filename: row.get("filename")?,
            duration_seconds: row.get("duration_seconds")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts the file unless a row with the same path exists.
///
/// Returns the id of the stored row and whether it was newly created.
pub fn insert_if_absent(db: &Database, file: &FileRow) -> Result<(String, bool), DatabaseError> {
    db.with_tx(|tx| {
        let inserted = tx.execute(
            "INSERT INTO files (id, path, filename, duration_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO NOTHING",
            params![
                file.id,
                file.path,
                file.filename,
                file.duration_seconds,
                file.created_at,
            ],
        )?;
        let id: String = tx.query_row(
            "SELECT id FROM files WHERE path = ?1",
            params![file.path],
            |r| r.get(0),
        )?;
        Ok((id, inserted == 1))
    })
}

/// Finds a file by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![id],
                FileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds a file by its absolute path.
pub fn find_by_path(db: &Database, path: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE path = ?1",
                params![path],
                FileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists all files ordered by path.
pub fn list_all(db: &Database) -> Result<Vec<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM files ORDER BY path")?;
        let rows = stmt
            .query_map([], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts all files.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// Updates the cached media duration of a file.
pub fn update_duration(db: &Database, id: &str, duration: f64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE files SET duration_seconds = ?2 WHERE id = ?1",
            params![id, duration],
        )?;
        Ok(())
    })
}

/// Deletes every job and then every file. Returns the number of files removed.
pub fn delete_all_with_jobs(db: &Database) -> Result<usize, DatabaseError> {
    db.with_tx(|tx| {
        tx.execute("DELETE FROM jobs", [])?;
        let files = tx.execute("DELETE FROM files", [])?;
        Ok(files)
    })
}
