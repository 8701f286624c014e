//! Table creation and additive, versioned column migrations.
//!
//! Every table group ("scope") is created with its latest column set, then
//! walked through an ordered list of column steps. A step is only attempted
//! when the live table lacks the column, so running the whole list against
//! any store, old or new, is safe. Columns are never dropped or renamed.
//!
//! Each scope records the highest version whose steps all succeeded in
//! `schema_versions`. Stores with no recorded version (created before the
//! version table existed) fall back to introspecting every step. A skipped
//! non-critical column keeps the recorded version below it, so the next open
//! tries again.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};
use tracing;

use super::identity;
use super::sqlite::table_columns;
use super::DatabaseError;

/// One additive column introduced at `version`.
#[derive(Debug)]
pub struct ColumnStep {
    pub version: i64,
    pub table: &'static str,
    pub column: &'static str,
    /// Type and constraints as accepted by `ALTER TABLE ... ADD COLUMN`.
    pub definition: &'static str,
    /// Failure aborts the store open instead of being logged and skipped.
    pub critical: bool,
    /// Optional statement run right after the column is added.
    pub backfill: Option<&'static str>,
}

/// A group of tables migrated together under one version counter.
#[derive(Debug)]
pub struct SchemaScope {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub steps: &'static [ColumnStep],
}

impl SchemaScope {
    /// Version 1 is the first released table shape; steps count up from 2.
    pub fn latest_version(&self) -> i64 {
        self.steps.iter().map(|s| s.version).max().unwrap_or(1)
    }
}

pub const CORE: SchemaScope = SchemaScope {
    name: "core",
    create_sql: include_str!("../../resources/schema/core.sql"),
    steps: &[
        ColumnStep {
            version: 2,
            table: "test_results",
            column: "notes",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 3,
            table: "test_results",
            column: "analyzed_data",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 4,
            table: "user_settings",
            column: "user_id",
            definition: "TEXT",
            critical: true,
            backfill: None,
        },
        ColumnStep {
            version: 5,
            table: "user_settings",
            column: "doctor_email",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 6,
            table: "user_settings",
            column: "doctor_phone",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 7,
            table: "user_settings",
            column: "ai_provider",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 8,
            table: "user_settings",
            column: "ai_api_key",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 9,
            table: "chat_messages",
            column: "read",
            definition: "INTEGER NOT NULL DEFAULT 0",
            critical: false,
            backfill: Some("UPDATE chat_messages SET read = 0 WHERE read IS NULL"),
        },
        ColumnStep {
            version: 10,
            table: "user_settings",
            column: "created_at",
            definition: "TEXT",
            critical: false,
            backfill: Some(STAMP_USER_SETTINGS),
        },
        ColumnStep {
            version: 11,
            table: "user_settings",
            column: "updated_at",
            definition: "TEXT",
            critical: false,
            backfill: Some("UPDATE user_settings SET updated_at = created_at WHERE updated_at IS NULL"),
        },
        ColumnStep {
            version: 12,
            table: "test_result_shares",
            column: "created_at",
            definition: "TEXT",
            critical: false,
            backfill: Some(STAMP_SHARES),
        },
    ],
};

// Rows that predate `created_at` are stamped with the upgrade time, in the
// same text shape chrono writes.
const STAMP_USER_SETTINGS: &str = "UPDATE user_settings
    SET created_at = strftime('%Y-%m-%d %H:%M:%S+00:00', 'now') WHERE created_at IS NULL";
const STAMP_SHARES: &str = "UPDATE test_result_shares
    SET created_at = strftime('%Y-%m-%d %H:%M:%S+00:00', 'now') WHERE created_at IS NULL";
const STAMP_MEDICATIONS: &str = "UPDATE medications
    SET created_at = strftime('%Y-%m-%d %H:%M:%S+00:00', 'now') WHERE created_at IS NULL";
const STAMP_VACCINATIONS: &str = "UPDATE vaccinations
    SET created_at = strftime('%Y-%m-%d %H:%M:%S+00:00', 'now') WHERE created_at IS NULL";

pub const MEDICATIONS: SchemaScope = SchemaScope {
    name: "medications",
    create_sql: include_str!("../../resources/schema/medications.sql"),
    steps: &[
        ColumnStep {
            version: 2,
            table: "medications",
            column: "reminder_enabled",
            definition: "INTEGER NOT NULL DEFAULT 0",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 3,
            table: "medications",
            column: "reminder_times",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 4,
            table: "medications",
            column: "created_at",
            definition: "TEXT",
            critical: false,
            backfill: Some(STAMP_MEDICATIONS),
        },
    ],
};

pub const VACCINATIONS: SchemaScope = SchemaScope {
    name: "vaccinations",
    create_sql: include_str!("../../resources/schema/vaccinations.sql"),
    steps: &[
        ColumnStep {
            version: 2,
            table: "vaccinations",
            column: "notes",
            definition: "TEXT",
            critical: false,
            backfill: None,
        },
        ColumnStep {
            version: 3,
            table: "vaccinations",
            column: "created_at",
            definition: "TEXT",
            critical: false,
            backfill: Some(STAMP_VACCINATIONS),
        },
    ],
};

/// Bring the core tables up to date and backfill user identities.
///
/// Idempotent; runs once per store open.
pub fn ensure_schema(conn: &Connection) -> Result<(), DatabaseError> {
    ensure_scope(conn, &CORE)?;
    let backfilled = identity::backfill_missing_user_ids(conn)?;
    if backfilled > 0 {
        tracing::info!(rows = backfilled, "Backfilled user identities");
    }
    Ok(())
}

/// Lazily create a table group owned by a single repository.
pub fn ensure_lazy_table(conn: &Connection, scope: &SchemaScope) -> Result<(), DatabaseError> {
    tracing::debug!(scope = scope.name, "Checking lazy table");
    ensure_scope(conn, scope)
}

/// Create the scope's tables and apply any pending column steps.
pub fn ensure_scope(conn: &Connection, scope: &SchemaScope) -> Result<(), DatabaseError> {
    ensure_version_table(conn)?;
    conn.execute_batch(scope.create_sql)
        .map_err(|e| DatabaseError::MigrationFailed {
            version: 1,
            reason: format!("{}: {e}", scope.name),
        })?;

    let recorded = recorded_version(conn, scope.name)?;
    let latest = scope.latest_version();
    if recorded.is_some_and(|v| v >= latest) {
        return Ok(());
    }

    if recorded.is_none() {
        tracing::debug!(scope = scope.name, "No recorded schema version, introspecting");
    }

    let start = recorded.unwrap_or(1);
    let mut clean_through = start;
    let mut blocked = false;
    let mut live: HashMap<&'static str, HashSet<String>> = HashMap::new();

    for step in scope.steps.iter().filter(|s| s.version > start) {
        let columns = match live.entry(step.table) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(table_columns(conn, step.table)?),
        };

        if !columns.contains(step.column) {
            match apply_step(conn, step) {
                Ok(()) => {
                    columns.insert(step.column.to_string());
                }
                Err(e) if step.critical => {
                    tracing::error!(
                        table = step.table,
                        column = step.column,
                        error = %e,
                        "Critical column migration failed"
                    );
                    return Err(DatabaseError::MigrationFailed {
                        version: step.version,
                        reason: format!("{}.{}: {e}", step.table, step.column),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        table = step.table,
                        column = step.column,
                        error = %e,
                        "Skipping column migration"
                    );
                    blocked = true;
                    continue;
                }
            }
        }

        if !blocked {
            clean_through = step.version;
        }
    }

    if recorded.map_or(true, |v| clean_through > v) {
        record_version(conn, scope.name, clean_through)?;
        tracing::info!(scope = scope.name, version = clean_through, "Schema version recorded");
    }

    Ok(())
}

fn apply_step(conn: &Connection, step: &ColumnStep) -> Result<(), rusqlite::Error> {
    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        step.table, step.column, step.definition
    ))?;
    tracing::info!(table = step.table, column = step.column, "Added column");

    if let Some(sql) = step.backfill {
        if let Err(e) = conn.execute_batch(sql) {
            tracing::warn!(
                table = step.table,
                column = step.column,
                error = %e,
                "Column backfill failed"
            );
        }
    }
    Ok(())
}

fn ensure_version_table(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            scope TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;
    Ok(())
}

/// Recorded version for a scope, `None` for stores that predate versioning.
pub fn recorded_version(conn: &Connection, scope: &str) -> Result<Option<i64>, DatabaseError> {
    let result = conn.query_row(
        "SELECT version FROM schema_versions WHERE scope = ?1",
        params![scope],
        |row| row.get::<_, i64>(0),
    );

    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn record_version(conn: &Connection, scope: &str, version: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO schema_versions (scope, version, applied_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(scope) DO UPDATE SET version = excluded.version, applied_at = excluded.applied_at",
        params![scope, version],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::{open_memory_database, table_exists};

    fn legacy_core(conn: &Connection) {
        // Shape of the first release: no notes, identity, AI or read columns.
        conn.execute_batch(
            "CREATE TABLE test_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                test_type TEXT NOT NULL,
                image_path TEXT NOT NULL,
                results TEXT
            );
            CREATE TABLE user_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_name TEXT NOT NULL DEFAULT '',
                doctor_name TEXT
            );
            CREATE TABLE test_result_shares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_result_id INTEGER NOT NULL,
                doctor_name TEXT NOT NULL,
                doctor_email TEXT,
                expires_at TEXT NOT NULL
            );
            CREATE TABLE chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            INSERT INTO test_results (created_at, test_type, image_path, results)
                VALUES ('2023-05-01 10:00:00+00:00', 'blood', '/tmp/a.jpg', 'ok');
            INSERT INTO user_settings (user_name, doctor_name) VALUES ('Anna', 'Dr. Weber');
            INSERT INTO test_result_shares (test_result_id, doctor_name, expires_at)
                VALUES (1, 'Dr. Weber', '2023-06-01 10:00:00+00:00');
            INSERT INTO chat_messages (sender_id, receiver_id, message, created_at)
                VALUES ('a', 'b', 'hi', '2023-05-01 10:00:00+00:00');",
        )
        .unwrap();
    }

    fn column_snapshot(conn: &Connection) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        for table in ["test_results", "user_settings", "test_result_shares", "chat_messages"] {
            let mut cols: Vec<String> = table_columns(conn, table).unwrap().into_iter().collect();
            cols.sort();
            out.push((table.to_string(), cols));
        }
        out
    }

    #[test]
    fn fresh_store_records_latest_version() {
        let conn = open_memory_database().unwrap();
        assert_eq!(recorded_version(&conn, "core").unwrap(), Some(CORE.latest_version()));
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = open_memory_database().unwrap();
        let once = column_snapshot(&conn);
        for _ in 0..3 {
            ensure_schema(&conn).unwrap();
        }
        assert_eq!(column_snapshot(&conn), once);
    }

    #[test]
    fn legacy_store_gains_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        legacy_core(&conn);

        ensure_schema(&conn).unwrap();

        let results = table_columns(&conn, "test_results").unwrap();
        assert!(results.contains("notes"));
        assert!(results.contains("analyzed_data"));
        let settings = table_columns(&conn, "user_settings").unwrap();
        for col in [
            "user_id",
            "doctor_email",
            "doctor_phone",
            "ai_provider",
            "ai_api_key",
            "created_at",
            "updated_at",
        ] {
            assert!(settings.contains(col), "missing {col}");
        }
        assert!(table_columns(&conn, "test_result_shares").unwrap().contains("created_at"));
        assert!(table_columns(&conn, "chat_messages").unwrap().contains("read"));
        assert_eq!(recorded_version(&conn, "core").unwrap(), Some(CORE.latest_version()));
    }

    #[test]
    fn legacy_rows_survive_and_are_backfilled() {
        let conn = Connection::open_in_memory().unwrap();
        legacy_core(&conn);
        ensure_schema(&conn).unwrap();

        let results: String = conn
            .query_row("SELECT results FROM test_results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(results, "ok");

        let read: i64 = conn
            .query_row("SELECT read FROM chat_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(read, 0);

        let (user_id, created_at, updated_at): (Option<String>, Option<String>, Option<String>) = conn
            .query_row("SELECT user_id, created_at, updated_at FROM user_settings", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        assert_eq!(user_id.unwrap().len(), 36);
        assert!(created_at.is_some());
        assert_eq!(updated_at, created_at);

        let share_created: Option<String> = conn
            .query_row("SELECT created_at FROM test_result_shares", [], |row| row.get(0))
            .unwrap();
        assert!(share_created.is_some());
    }

    #[test]
    fn never_drops_unknown_columns() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch("ALTER TABLE test_results ADD COLUMN future_field TEXT")
            .unwrap();
        ensure_schema(&conn).unwrap();
        assert!(table_columns(&conn, "test_results").unwrap().contains("future_field"));
    }

    #[test]
    fn lazy_scope_creates_table_on_demand() {
        let conn = open_memory_database().unwrap();
        assert!(!table_exists(&conn, "medications").unwrap());
        ensure_lazy_table(&conn, &MEDICATIONS).unwrap();
        assert!(table_exists(&conn, "medications").unwrap());
        assert_eq!(recorded_version(&conn, "medications").unwrap(), Some(4));
    }

    #[test]
    fn lazy_scope_upgrades_old_medications_table() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(
            "CREATE TABLE medications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                dosage TEXT,
                frequency TEXT,
                notes TEXT
            );
            INSERT INTO medications (name) VALUES ('Ibuprofen');",
        )
        .unwrap();

        ensure_lazy_table(&conn, &MEDICATIONS).unwrap();

        let cols = table_columns(&conn, "medications").unwrap();
        assert!(cols.contains("reminder_enabled"));
        assert!(cols.contains("reminder_times"));
        assert!(cols.contains("created_at"));
        let (enabled, created_at): (i64, Option<String>) = conn
            .query_row("SELECT reminder_enabled, created_at FROM medications", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(enabled, 0);
        assert!(created_at.is_some());
    }

    #[test]
    fn lazy_scope_upgrades_old_vaccinations_table() {
        let conn = open_memory_database().unwrap();
        conn.execute_batch(
            "CREATE TABLE vaccinations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                date TEXT NOT NULL
            );
            INSERT INTO vaccinations (name, date) VALUES ('Tetanus', '2015-01-01');",
        )
        .unwrap();

        ensure_lazy_table(&conn, &VACCINATIONS).unwrap();

        let cols = table_columns(&conn, "vaccinations").unwrap();
        assert!(cols.contains("notes"));
        assert!(cols.contains("created_at"));
        assert_eq!(recorded_version(&conn, "vaccinations").unwrap(), Some(3));
    }

    const BROKEN_OPTIONAL: SchemaScope = SchemaScope {
        name: "broken_optional",
        create_sql: "CREATE TABLE IF NOT EXISTS broken (id INTEGER PRIMARY KEY);
                     INSERT OR IGNORE INTO broken (id) VALUES (1);",
        steps: &[
            // NOT NULL without a default cannot be added to a table with rows.
            ColumnStep {
                version: 2,
                table: "broken",
                column: "strict",
                definition: "TEXT NOT NULL",
                critical: false,
                backfill: None,
            },
            ColumnStep {
                version: 3,
                table: "broken",
                column: "relaxed",
                definition: "TEXT",
                critical: false,
                backfill: None,
            },
        ],
    };

    const BROKEN_CRITICAL: SchemaScope = SchemaScope {
        name: "broken_critical",
        create_sql: "CREATE TABLE IF NOT EXISTS broken_identity (id INTEGER PRIMARY KEY);
                     INSERT OR IGNORE INTO broken_identity (id) VALUES (1);",
        steps: &[ColumnStep {
            version: 2,
            table: "broken_identity",
            column: "identity",
            definition: "TEXT NOT NULL",
            critical: true,
            backfill: None,
        }],
    };

    #[test]
    fn non_critical_failure_skips_and_continues() {
        let conn = open_memory_database().unwrap();
        ensure_scope(&conn, &BROKEN_OPTIONAL).unwrap();

        let cols = table_columns(&conn, "broken").unwrap();
        assert!(!cols.contains("strict"));
        assert!(cols.contains("relaxed"), "unrelated column must still be added");
        // Version stays below the failed step so it is retried next open.
        assert_eq!(recorded_version(&conn, "broken_optional").unwrap(), Some(1));

        ensure_scope(&conn, &BROKEN_OPTIONAL).unwrap();
        assert!(table_columns(&conn, "broken").unwrap().contains("relaxed"));
    }

    #[test]
    fn critical_failure_is_fatal() {
        let conn = open_memory_database().unwrap();
        let err = ensure_scope(&conn, &BROKEN_CRITICAL).unwrap_err();
        assert!(matches!(err, DatabaseError::MigrationFailed { version: 2, .. }));
    }
}
