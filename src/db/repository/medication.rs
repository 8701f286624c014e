use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing;

use super::Repository;
use crate::db::query::UpdateBuilder;
use crate::db::schema::{self, MEDICATIONS};
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::patch::required_text;
use crate::models::*;

const COLUMNS: &str =
    "id, name, dosage, frequency, notes, reminder_enabled, reminder_times, created_at";

/// Raw row; `reminder_times` is a JSON array decoded after the read.
struct MedicationRow {
    id: i64,
    name: String,
    dosage: Option<String>,
    frequency: Option<String>,
    notes: Option<String>,
    reminder_enabled: bool,
    reminder_times: Option<String>,
    created_at: DateTime<Utc>,
}

/// Medications live in a table created on first use.
pub struct MedicationRepository<'a> {
    store: &'a StoreGuardian,
}

impl<'a> MedicationRepository<'a> {
    pub fn new(store: &'a StoreGuardian) -> Self {
        Self { store }
    }

    /// Medications with reminders switched on, by name.
    pub fn with_reminders(&self) -> Result<Vec<Medication>, DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            query_medications(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM medications WHERE reminder_enabled = 1
                     ORDER BY name COLLATE NOCASE ASC, id ASC"
                ),
            )
        })
    }
}

impl Repository for MedicationRepository<'_> {
    type Record = Medication;
    type New = NewMedication;
    type Patch = MedicationPatch;

    fn create(&self, new: &NewMedication) -> Result<i64, DatabaseError> {
        let name = required_text("name", &new.name)?;
        let reminder_times = encode_reminder_times(&new.reminder_times)?;

        let id = self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            conn.execute(
                "INSERT INTO medications (name, dosage, frequency, notes, reminder_enabled,
                 reminder_times, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    name,
                    new.dosage,
                    new.frequency,
                    new.notes,
                    new.reminder_enabled,
                    reminder_times,
                    Utc::now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, "Medication created");
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<Medication>, DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            query_medications(
                conn,
                &format!("SELECT {COLUMNS} FROM medications ORDER BY name COLLATE NOCASE ASC, id ASC"),
            )
        })
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Medication>, DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM medications WHERE id = ?1"),
                params![id],
                medication_row_from_rusqlite,
            );
            match result {
                Ok(row) => Ok(Some(medication_from_row(row)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update(&self, id: i64, patch: &MedicationPatch) -> Result<(), DatabaseError> {
        let name = patch
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?;
        let reminder_times = patch
            .reminder_times
            .as_deref()
            .map(encode_reminder_times)
            .transpose()?;

        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            UpdateBuilder::new("medications")
                .set_if("name", name.clone())
                .set_if("dosage", patch.dosage.clone())
                .set_if("frequency", patch.frequency.clone())
                .set_if("notes", patch.notes.clone())
                .set_if("reminder_enabled", patch.reminder_enabled)
                .set_if("reminder_times", reminder_times.clone())
                .execute(conn, id)
        })?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        self.store.with_store(|conn| {
            schema::ensure_lazy_table(conn, &MEDICATIONS)?;
            conn.execute("DELETE FROM medications WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        tracing::info!(id, "Medication deleted");
        Ok(())
    }
}

fn query_medications(conn: &Connection, sql: &str) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], medication_row_from_rusqlite)?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row?)?);
    }
    Ok(meds)
}

/// Validate `HH:MM` entries and serialize them. An empty list is stored as NULL.
fn encode_reminder_times(times: &[String]) -> Result<Option<String>, DatabaseError> {
    for t in times {
        if t.len() != 5 || NaiveTime::parse_from_str(t, "%H:%M").is_err() {
            return Err(DatabaseError::Validation(format!(
                "reminder time '{t}' must be HH:MM"
            )));
        }
    }
    if times.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(times)?))
}

fn medication_row_from_rusqlite(row: &Row<'_>) -> rusqlite::Result<MedicationRow> {
    Ok(MedicationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        dosage: row.get(2)?,
        frequency: row.get(3)?,
        notes: row.get(4)?,
        reminder_enabled: row.get(5)?,
        reminder_times: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<Medication, DatabaseError> {
    let reminder_times = match row.reminder_times.as_deref() {
        None | Some("") => Vec::new(),
        Some(json) => serde_json::from_str(json)?,
    };

    Ok(Medication {
        id: row.id,
        name: row.name,
        dosage: row.dosage,
        frequency: row.frequency,
        notes: row.notes,
        reminder_enabled: row.reminder_enabled,
        reminder_times,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::fixture;
    use crate::db::sqlite::table_exists;

    fn med(name: &str) -> NewMedication {
        NewMedication {
            name: name.into(),
            dosage: Some("500 mg".into()),
            frequency: Some("twice daily".into()),
            ..Default::default()
        }
    }

    #[test]
    fn table_is_created_on_first_use() {
        let f = fixture();
        let exists = |g: &StoreGuardian| g.with_store(|conn| table_exists(conn, "medications")).unwrap();
        assert!(!exists(&f.guardian));

        MedicationRepository::new(&f.guardian).get_all().unwrap();

        assert!(exists(&f.guardian));
    }

    #[test]
    fn get_all_is_alphabetical_ignoring_case() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        for name in ["metformin", "Aspirin", "ibuprofen", "Zopiclone"] {
            repo.create(&med(name)).unwrap();
        }

        let names: Vec<String> = repo.get_all().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Aspirin", "ibuprofen", "metformin", "Zopiclone"]);
    }

    #[test]
    fn reminder_times_round_trip() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        let id = repo
            .create(&NewMedication {
                reminder_enabled: true,
                reminder_times: vec!["08:00".into(), "20:30".into()],
                ..med("Metformin")
            })
            .unwrap();

        let stored = repo.get_by_id(id).unwrap().unwrap();
        assert!(stored.reminder_enabled);
        assert_eq!(stored.reminder_times, vec!["08:00", "20:30"]);
        assert_eq!(repo.with_reminders().unwrap().len(), 1);
    }

    #[test]
    fn malformed_reminder_time_is_rejected() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        for bad in ["8:00", "25:00", "noon"] {
            let new = NewMedication {
                reminder_times: vec![bad.into()],
                ..med("Metformin")
            };
            assert!(matches!(repo.create(&new), Err(DatabaseError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn blank_name_is_rejected() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        assert!(matches!(repo.create(&med("   ")), Err(DatabaseError::Validation(_))));
        let id = repo.create(&med("Aspirin")).unwrap();
        let patch = MedicationPatch {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(repo.update(id, &patch), Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn partial_update_and_clear() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        let id = repo.create(&med("Metformin")).unwrap();

        repo.update(
            id,
            &MedicationPatch {
                dosage: Some(Some("850 mg".into())),
                frequency: Some(None),
                reminder_enabled: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let stored = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.dosage.as_deref(), Some("850 mg"));
        assert!(stored.frequency.is_none());
        assert!(stored.reminder_enabled);
        assert_eq!(stored.name, "Metformin");
    }

    #[test]
    fn empty_patch_is_noop() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        let id = repo.create(&med("Metformin")).unwrap();
        let before = repo.get_by_id(id).unwrap().unwrap();
        repo.update(id, &MedicationPatch::default()).unwrap();
        assert_eq!(repo.get_by_id(id).unwrap().unwrap(), before);
    }

    #[test]
    fn delete_then_absent() {
        let f = fixture();
        let repo = MedicationRepository::new(&f.guardian);
        let id = repo.create(&med("Metformin")).unwrap();
        repo.delete(id).unwrap();
        assert!(repo.get_by_id(id).unwrap().is_none());
        assert!(repo.delete(id).is_ok());
    }
}
