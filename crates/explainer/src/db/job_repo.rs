//! Job repository: row-level operations for the `jobs` table.
//!
//! Status changes are compare-and-set updates: the `WHERE` clause names the
//! statuses the row may currently hold, so two writers can never both
//! advance the same job and a transition can never move a row backwards.

use rusqlite::{params, Row, ToSql};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub uid: String,
    pub filename: String,
    pub status: String,
    pub upload_time: String,
    pub finish_time: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub user_id: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            uid: row.get("uid")?,
            filename: row.get("filename")?,
            status: row.get("status")?,
            upload_time: row.get("upload_time")?,
            finish_time: row.get("finish_time")?,
            result_ref: row.get("result_ref")?,
            error: row.get("error")?,
            user_id: row.get("user_id")?,
        })
    }
}

/// Fields supplied when a job row is first created.
#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub uid: String,
    pub filename: String,
    pub status: String,
    pub upload_time: String,
    pub user_id: Option<i64>,
}

/// Terminal fields written together with the final status.
#[derive(Debug, Clone, Default)]
pub struct FinishFields<'a> {
    pub finish_time: &'a str,
    pub result_ref: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// Inserts a new job row and returns its row id.
pub fn insert(db: &Database, job: &NewJobRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (uid, filename, status, upload_time, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job.uid, job.filename, job.status, job.upload_time, job.user_id],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its uid.
pub fn find_by_uid(db: &Database, uid: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE uid = ?1")?;
        let mut rows = stmt.query_map(params![uid], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    })
}

/// Lists jobs whose status is one of `statuses`, oldest upload first.
pub fn list_by_status(db: &Database, statuses: &[&str]) -> Result<Vec<JobRow>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY upload_time ASC, id ASC",
            placeholders(1, statuses.len())
        );
        let params_ref: Vec<&dyn ToSql> = statuses.iter().map(|s| s as &dyn ToSql).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the most recently uploaded job of `user_id` named `filename`.
pub fn latest_for_user_and_filename(
    db: &Database,
    user_id: i64,
    filename: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE user_id = ?1 AND filename = ?2
             ORDER BY upload_time DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![user_id, filename], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    })
}

/// Lists all jobs of `user_id`, newest first.
pub fn list_for_user(db: &Database, user_id: i64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE user_id = ?1 ORDER BY upload_time DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves `uid` to status `to` if its current status is one of `from`.
/// Returns the number of rows changed (0 or 1).
pub fn compare_and_set_status(
    db: &Database,
    uid: &str,
    from: &[&str],
    to: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs SET status = ?1 WHERE uid = ?2 AND status IN ({})",
            placeholders(3, from.len())
        );
        let mut params_ref: Vec<&dyn ToSql> = vec![&to, &uid];
        params_ref.extend(from.iter().map(|s| s as &dyn ToSql));
        Ok(conn.execute(&sql, params_ref.as_slice())?)
    })
}

/// Moves `uid` to terminal status `to` if its current status is one of
/// `from`, writing the finish time, result reference and error in the same
/// statement. Returns the number of rows changed (0 or 1).
pub fn finish(
    db: &Database,
    uid: &str,
    from: &[&str],
    to: &str,
    fields: &FinishFields<'_>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs SET status = ?1, finish_time = ?2, result_ref = ?3, error = ?4
             WHERE uid = ?5 AND finish_time IS NULL AND status IN ({})",
            placeholders(6, from.len())
        );
        let mut params_ref: Vec<&dyn ToSql> = vec![
            &to,
            &fields.finish_time,
            &fields.result_ref,
            &fields.error,
            &uid,
        ];
        params_ref.extend(from.iter().map(|s| s as &dyn ToSql));
        Ok(conn.execute(&sql, params_ref.as_slice())?)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// `?start, ?start+1, …` for `count` positional parameters.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
