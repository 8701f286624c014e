use chrono::Utc;
use rusqlite::{params, Row};
use tracing;

use super::test_result::get_test_result;
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::patch::required_text;
use crate::models::*;

const COLUMNS: &str = "id, test_result_id, doctor_name, doctor_email, expires_at, created_at";

/// Shares are written once and never edited.
pub struct ShareRepository<'a> {
    store: &'a StoreGuardian,
}

impl<'a> ShareRepository<'a> {
    pub fn new(store: &'a StoreGuardian) -> Self {
        Self { store }
    }

    pub fn create(&self, new: &NewShare) -> Result<i64, DatabaseError> {
        let doctor_name = required_text("doctor_name", &new.doctor_name)?;

        let id = self.store.with_store(|conn| {
            if get_test_result(conn, new.test_result_id)?.is_none() {
                tracing::warn!(
                    test_result_id = new.test_result_id,
                    "Sharing a test result that does not exist"
                );
            }
            conn.execute(
                "INSERT INTO test_result_shares (test_result_id, doctor_name, doctor_email, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.test_result_id,
                    doctor_name,
                    new.doctor_email,
                    new.expires_at,
                    Utc::now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, test_result_id = new.test_result_id, "Share recorded");
        Ok(id)
    }

    /// All shares, newest first.
    pub fn get_all(&self) -> Result<Vec<TestResultShare>, DatabaseError> {
        self.store.with_store(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM test_result_shares ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], share_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<TestResultShare>, DatabaseError> {
        self.store.with_store(|conn| {
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM test_result_shares WHERE id = ?1"),
                params![id],
                share_from_row,
            );
            match result {
                Ok(share) => Ok(Some(share)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn for_test_result(&self, test_result_id: i64) -> Result<Vec<TestResultShare>, DatabaseError> {
        self.store.with_store(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM test_result_shares WHERE test_result_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![test_result_id], share_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        self.store.with_store(|conn| {
            conn.execute("DELETE FROM test_result_shares WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

fn share_from_row(row: &Row<'_>) -> rusqlite::Result<TestResultShare> {
    Ok(TestResultShare {
        id: row.get(0)?,
        test_result_id: row.get(1)?,
        doctor_name: row.get(2)?,
        doctor_email: row.get(3)?,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}
