//! User repository: owners of uploaded decks, keyed by email.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns the id of the user with `email`, if one exists.
pub fn find_by_email(db: &Database, email: &str) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let id = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    })
}

/// Returns the email of the user with `id`, if one exists.
pub fn email_for_id(db: &Database, id: i64) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let email: Option<Option<String>> = conn
            .query_row("SELECT email FROM users WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(email.flatten())
    })
}

/// Returns the id of the user with `email`, creating the user if needed.
pub fn find_or_create(db: &Database, email: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO users (email) VALUES (?1)",
            params![email],
        )?;
        let id = conn.query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_or_create_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let first = find_or_create(&db, "ann@example.com").unwrap();
        let second = find_or_create(&db, "ann@example.com").unwrap();
        assert_eq!(first, second);

        let other = find_or_create(&db, "bob@example.com").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_find_by_email() {
        let db = Database::open_in_memory().unwrap();
        assert!(find_by_email(&db, "ann@example.com").unwrap().is_none());

        let id = find_or_create(&db, "ann@example.com").unwrap();
        assert_eq!(find_by_email(&db, "ann@example.com").unwrap(), Some(id));
        assert_eq!(
            email_for_id(&db, id).unwrap().as_deref(),
            Some("ann@example.com")
        );
        assert!(email_for_id(&db, id + 100).unwrap().is_none());
    }
}
