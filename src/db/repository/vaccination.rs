use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing;

use super::Repository;
use crate::db::query::UpdateBuilder;
use crate::db::schema::{self, VACCINATIONS};
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::patch::required_text;
use crate::models::*;
use crate::vaccination_validity::{self, ValidityStatus};

const COLUMNS: &str = "id, name, date, notes, created_at";

/// Vaccinations live in a table created on first use.
pub struct VaccinationRepository<'a> {
    store: &'a StoreGuardian,
}

impl<'a> VaccinationRepository<'a> {
    pub fn new(store: &'a StoreGuardian) -> Self {
        Self { store }
    }

    /// Vaccinations expiring within `window_days` of `now`, or already overdue.
    pub fn due_soon(
        &self,
        now: DateTime<Utc>,
        window_days: i64,
    ) -> Result<Vec<(Vaccination, ValidityStatus)>, DatabaseError> {
        let all = self.get_all()?;
        Ok(all
            .into_iter()
            .filter_map(|v| {
                let status = vaccination_validity::status(&v.name, v.date, now);
                status.due_within(window_days).then_some((v, status))
            })
            .collect())
    }
}

impl Repository for VaccinationRepository<'_> {
    type Record = Vaccination;
    type New = NewVaccination;
    type Patch = VaccinationPatch;

    fn create(&self, new: &NewVaccination) -> Result<i64, DatabaseError> {
        let name = required_text("name", &new.name)?;

        let id = self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &VACCINATIONS)?;
            conn.execute(
                "INSERT INTO vaccinations (name, date, notes, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, new.date, new.notes, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, "Vaccination recorded");
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<Vaccination>, DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &VACCINATIONS)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM vaccinations ORDER BY date DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], vaccination_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Vaccination>, DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &VACCINATIONS)?;
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM vaccinations WHERE id = ?1"),
                params![id],
                vaccination_from_row,
            );
            match result {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update(&self, id: i64, patch: &VaccinationPatch) -> Result<(), DatabaseError> {
        let name = patch
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?;

        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &VACCINATIONS)?;
            UpdateBuilder::new("vaccinations")
                .set_if("name", name.clone())
                .set_if("date", patch.date)
                .set_if("notes", patch.notes.clone())
                .execute(conn, id)
        })?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &VACCINATIONS)?;
            conn.execute("DELETE FROM vaccinations WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

fn vaccination_from_row(row: &Row<'_>) -> rusqlite::Result<Vaccination> {
    Ok(Vaccination {
        id: row.get(0)?,
        name: row.get(1)?,
        date: row.get(2)?,
        notes: row.get(3)?,
        created_at: row.get(4)?,
    })
}
