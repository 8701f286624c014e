//! Stable opaque user identifiers for settings rows.

use rusqlite::{params, Connection};
use tracing;
use uuid::Uuid;

use super::DatabaseError;

/// New identifier in the 8-4-4-4-12 hex layout.
pub fn generate_user_id() -> String {
    Uuid::new_v4().to_string()
}

/// Return the row's identifier, generating and persisting one if absent.
///
/// `current` is the value the caller already read from the row. A non-empty
/// value is returned as-is without touching the store. The write only lands
/// on rows whose identifier is still empty, so a second backfill of the same
/// row can never replace the first one.
pub fn ensure_user_id(
    conn: &Connection,
    row_id: i64,
    current: Option<&str>,
) -> Result<String, DatabaseError> {
    if let Some(existing) = current.filter(|id| !id.is_empty()) {
        return Ok(existing.to_string());
    }

    let candidate = generate_user_id();
    let changed = conn.execute(
        "UPDATE user_settings SET user_id = ?1
         WHERE id = ?2 AND (user_id IS NULL OR user_id = '')",
        params![candidate, row_id],
    )?;

    if changed == 1 {
        tracing::info!(row_id, "Generated user identity");
        return Ok(candidate);
    }

    // Already backfilled since the caller read it, or the row is gone.
    let stored: Option<String> = conn
        .query_row(
            "SELECT user_id FROM user_settings WHERE id = ?1",
            params![row_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::Validation(format!("user settings row {row_id} does not exist"))
            }
            other => other.into(),
        })?;

    stored
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DatabaseError::Validation(format!("user settings row {row_id} has no identity")))
}

/// Give every settings row lacking an identifier its own. Returns rows touched.
pub fn backfill_missing_user_ids(conn: &Connection) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM user_settings WHERE user_id IS NULL OR user_id = '' ORDER BY id",
    )?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    for id in &ids {
        ensure_user_id(conn, *id, None)?;
    }
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn insert_settings_row(conn: &Connection, user_id: Option<&str>) -> i64 {
        conn.execute(
            "INSERT INTO user_settings (user_id, user_name, created_at)
             VALUES (?1, 'Anna', '2024-01-01 00:00:00+00:00')",
            params![user_id],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn total_changes(conn: &Connection) -> i64 {
        conn.query_row("SELECT total_changes()", [], |row| row.get(0))
            .unwrap()
    }

    fn stored_id(conn: &Connection, row_id: i64) -> Option<String> {
        conn.query_row(
            "SELECT user_id FROM user_settings WHERE id = ?1",
            params![row_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn generated_id_has_uuid_shape() {
        let id = generate_user_id();
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate_user_id(), generate_user_id());
    }

    #[test]
    fn existing_id_returned_without_write() {
        let conn = open_memory_database().unwrap();
        let row = insert_settings_row(&conn, Some("fixed-id"));
        let before = total_changes(&conn);

        let id = ensure_user_id(&conn, row, Some("fixed-id")).unwrap();

        assert_eq!(id, "fixed-id");
        assert_eq!(total_changes(&conn), before, "no write expected");
    }

    #[test]
    fn missing_id_is_generated_and_persisted() {
        let conn = open_memory_database().unwrap();
        let row = insert_settings_row(&conn, None);

        let id = ensure_user_id(&conn, row, None).unwrap();

        assert_eq!(stored_id(&conn, row).as_deref(), Some(id.as_str()));
    }

    #[test]
    fn empty_id_counts_as_missing() {
        let conn = open_memory_database().unwrap();
        let row = insert_settings_row(&conn, Some(""));
        let id = ensure_user_id(&conn, row, Some("")).unwrap();
        assert_eq!(id.len(), 36);
    }

    #[test]
    fn stale_read_does_not_backfill_twice() {
        let conn = open_memory_database().unwrap();
        let row = insert_settings_row(&conn, None);

        let first = ensure_user_id(&conn, row, None).unwrap();
        // Caller still holds the pre-backfill snapshot.
        let second = ensure_user_id(&conn, row, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(stored_id(&conn, row).as_deref(), Some(first.as_str()));
    }

    #[test]
    fn unknown_row_is_rejected() {
        let conn = open_memory_database().unwrap();
        let err = ensure_user_id(&conn, 999, None).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn backfill_touches_only_rows_without_id() {
        let conn = open_memory_database().unwrap();
        let keep = insert_settings_row(&conn, Some("keep-me"));
        let fill = insert_settings_row(&conn, None);

        assert_eq!(backfill_missing_user_ids(&conn).unwrap(), 1);
        assert_eq!(stored_id(&conn, keep).as_deref(), Some("keep-me"));
        assert!(stored_id(&conn, fill).is_some());
        assert_eq!(backfill_missing_user_ids(&conn).unwrap(), 0);
    }
}
