use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::present;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: i64,
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub notes: Option<String>,
    pub reminder_enabled: bool,
    /// Times of day as `HH:MM`.
    pub reminder_times: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub reminder_enabled: bool,
    #[serde(default)]
    pub reminder_times: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub dosage: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub frequency: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    #[serde(default)]
    pub reminder_enabled: Option<bool>,
    #[serde(default)]
    pub reminder_times: Option<Vec<String>>,
}
