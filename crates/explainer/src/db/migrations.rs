//! Schema migrations for the job store.
//!
//! The version check and every pending migration run inside one
//! `BEGIN IMMEDIATE` transaction. When the worker and an intake process
//! open a fresh file at the same moment, one of them migrates while the
//! other waits on the busy timeout and then finds nothing left to apply.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// Column this migration adds. Files that already carry it skip the SQL.
    adds_column: Option<(&'static str, &'static str)>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users_table",
        sql: include_str!("sql/001_create_users.sql"),
        adds_column: None,
    },
    Migration {
        version: 2,
        name: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
        adds_column: None,
    },
    Migration {
        version: 3,
        name: "add_error_to_jobs",
        sql: include_str!("sql/003_add_error_to_jobs.sql"),
        adds_column: Some(("jobs", "error")),
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Highest schema version this build knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Schema version recorded in the file; 0 for an unversioned file.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_migrations')",
        [],
        |r| r.get(0),
    )?;
    if !tracked {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to `latest_version()`. Returns how many migrations
/// were applied.
pub fn run_all(conn: &mut Connection) -> Result<usize, DatabaseError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(VERSION_TABLE)?;

    let current = schema_version(&tx)?;
    if current > latest_version() {
        return Err(DatabaseError::NewerSchema {
            found: current,
            supported: latest_version(),
        });
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let present = match migration.adds_column {
            Some((table, column)) => column_exists(&tx, table, column)?,
            None => false,
        };
        if present {
            log::info!(
                "Migration v{} ({}) skipped, column already present",
                migration.version,
                migration.name
            );
        } else {
            log::info!("Applying migration v{} ({})", migration.version, migration.name);
            tx.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        }
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        applied += 1;
    }

    tx.commit()?;
    Ok(applied)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    // PRAGMA arguments cannot be bound.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_fresh_file_reaches_latest_version() {
        let mut conn = fresh();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        let applied = run_all(&mut conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len());
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
        assert!(column_exists(&conn, "jobs", "error").unwrap());
        assert!(column_exists(&conn, "jobs", "result_ref").unwrap());
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();
        assert_eq!(run_all(&mut conn).unwrap(), 0);
        assert_eq!(schema_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_unversioned_file_with_error_column_is_adopted() {
        let mut conn = fresh();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT UNIQUE);
             CREATE TABLE jobs (id INTEGER PRIMARY KEY AUTOINCREMENT, uid TEXT NOT NULL UNIQUE,
                 filename TEXT NOT NULL, status TEXT NOT NULL, upload_time TEXT NOT NULL,
                 finish_time TEXT, result_ref TEXT, user_id INTEGER, error TEXT);",
        )
        .unwrap();
        // Recorded at v2 although the error column is already there.
        conn.execute_batch(
            "CREATE TABLE _migrations (version INTEGER PRIMARY KEY, description TEXT NOT NULL,
                 applied_at TEXT NOT NULL DEFAULT (datetime('now')));
             INSERT INTO _migrations (version, description) VALUES (1, 'x'), (2, 'y');",
        )
        .unwrap();

        assert_eq!(run_all(&mut conn).unwrap(), 1);
        assert_eq!(schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (99, 'future')",
            [],
        )
        .unwrap();

        let err = run_all(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::NewerSchema { found: 99, .. }
        ));
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let mut conn = fresh();
        // A conflicting object named like the jobs table makes v2 fail.
        conn.execute_batch("CREATE VIEW jobs AS SELECT 1 AS id;").unwrap();

        let err = run_all(&mut conn).unwrap_err();
        assert!(matches!(err, DatabaseError::Migration { version: 2, .. }));
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_column_exists_rejects_bad_identifier() {
        let conn = fresh();
        assert!(column_exists(&conn, "jobs; DROP TABLE jobs", "id").is_err());
    }
}
