use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing;

use super::Repository;
use crate::db::identity::{self, generate_user_id};
use crate::db::query::UpdateBuilder;
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::patch::required_text;
use crate::models::*;

const COLUMNS: &str = "id, user_id, user_name, doctor_name, doctor_email, doctor_phone,
     ai_provider, ai_api_key, created_at, updated_at";

/// Raw row; `ai_provider` and `user_id` are checked after the read.
struct SettingsRow {
    id: i64,
    user_id: Option<String>,
    user_name: String,
    doctor_name: Option<String>,
    doctor_email: Option<String>,
    doctor_phone: Option<String>,
    ai_provider: Option<String>,
    ai_api_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

pub struct SettingsRepository<'a> {
    store: &'a StoreGuardian,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(store: &'a StoreGuardian) -> Self {
        Self { store }
    }

    /// The current profile: the most recent row, with its identity ensured.
    pub fn current(&self) -> Result<Option<UserSettings>, DatabaseError> {
        self.store.with_store(|conn| {
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM user_settings ORDER BY id DESC LIMIT 1"),
                [],
                settings_row_from_rusqlite,
            );
            match result {
                Ok(row) => Ok(Some(settings_from_row(conn, row)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Save the settings form. The first save creates the profile; later
    /// saves rewrite the current row and keep its `user_id`.
    pub fn save(&self, input: &SettingsInput) -> Result<UserSettings, DatabaseError> {
        let user_name = required_text("user_name", &input.user_name)?;

        let id = match self.current_id()? {
            Some(existing) => {
                self.store.with_store(|conn| {
                    UpdateBuilder::new("user_settings")
                        .set("user_name", user_name.clone())
                        .set("doctor_name", input.doctor_name.clone())
                        .set("doctor_email", input.doctor_email.clone())
                        .set("doctor_phone", input.doctor_phone.clone())
                        .set("ai_provider", input.ai_provider.map(|p| p.as_str()))
                        .set("ai_api_key", input.ai_api_key.clone())
                        .set("updated_at", Utc::now())
                        .execute(conn, existing)
                })?;
                tracing::info!(id = existing, "Settings updated");
                existing
            }
            None => self.create(input)?,
        };

        self.get_by_id(id)?
            .ok_or_else(|| DatabaseError::Validation(format!("settings row {id} vanished after save")))
    }

    /// Id of the current row, without decoding the rest of it.
    fn current_id(&self) -> Result<Option<i64>, DatabaseError> {
        self.store.with_store(|conn| {
            let result = conn.query_row(
                "SELECT id FROM user_settings ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            );
            match result {
                Ok(id) => Ok(Some(id)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// The row's identifier, generated and persisted on first request.
    pub fn ensure_user_id(&self, id: i64) -> Result<String, DatabaseError> {
        self.store.with_store(|conn| identity::ensure_user_id(conn, id, None))
    }
}

impl Repository for SettingsRepository<'_> {
    type Record = UserSettings;
    type New = SettingsInput;
    type Patch = SettingsPatch;

    fn create(&self, new: &SettingsInput) -> Result<i64, DatabaseError> {
        let user_name = required_text("user_name", &new.user_name)?;
        let user_id = generate_user_id();

        let id = self.store.with_store(|conn| {
            conn.execute(
                "INSERT INTO user_settings (user_id, user_name, doctor_name, doctor_email,
                 doctor_phone, ai_provider, ai_api_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user_id,
                    user_name,
                    new.doctor_name,
                    new.doctor_email,
                    new.doctor_phone,
                    new.ai_provider.map(|p| p.as_str()),
                    new.ai_api_key,
                    Utc::now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, "Settings profile created");
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<UserSettings>, DatabaseError> {
        self.store.with_store(|conn| {
            let rows = {
                let mut stmt =
                    conn.prepare(&format!("SELECT {COLUMNS} FROM user_settings ORDER BY id DESC"))?;
                let rows = stmt.query_map([], settings_row_from_rusqlite)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            rows.into_iter()
                .map(|row| settings_from_row(conn, row))
                .collect()
        })
    }

    fn get_by_id(&self, id: i64) -> Result<Option<UserSettings>, DatabaseError> {
        self.store.with_store(|conn| {
            let result = conn.query_row(
                &format!("SELECT {COLUMNS} FROM user_settings WHERE id = ?1"),
                params![id],
                settings_row_from_rusqlite,
            );
            match result {
                Ok(row) => Ok(Some(settings_from_row(conn, row)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update(&self, id: i64, patch: &SettingsPatch) -> Result<(), DatabaseError> {
        let user_name = patch
            .user_name
            .as_deref()
            .map(|n| required_text("user_name", n))
            .transpose()?;

        self.store.with_store(|conn| {
            let builder = UpdateBuilder::new("user_settings")
                .set_if("user_name", user_name.clone())
                .set_if("doctor_name", patch.doctor_name.clone())
                .set_if("doctor_email", patch.doctor_email.clone())
                .set_if("doctor_phone", patch.doctor_phone.clone())
                .set_if("ai_provider", patch.ai_provider.map(|p| p.map(|p| p.as_str())))
                .set_if("ai_api_key", patch.ai_api_key.clone());
            if builder.is_empty() {
                return Ok(0);
            }
            builder.set("updated_at", Utc::now()).execute(conn, id)
        })?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        self.store.with_store(|conn| {
            conn.execute("DELETE FROM user_settings WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

fn settings_row_from_rusqlite(row: &Row<'_>) -> rusqlite::Result<SettingsRow> {
    Ok(SettingsRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        doctor_name: row.get(3)?,
        doctor_email: row.get(4)?,
        doctor_phone: row.get(5)?,
        ai_provider: row.get(6)?,
        ai_api_key: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn settings_from_row(conn: &Connection, row: SettingsRow) -> Result<UserSettings, DatabaseError> {
    let user_id = identity::ensure_user_id(conn, row.id, row.user_id.as_deref())?;
    let ai_provider = row
        .ai_provider
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<AiProvider>())
        .transpose()?;

    Ok(UserSettings {
        id: row.id,
        user_id,
        user_name: row.user_name,
        doctor_name: row.doctor_name,
        doctor_email: row.doctor_email,
        doctor_phone: row.doctor_phone,
        ai_provider,
        ai_api_key: row.ai_api_key,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
