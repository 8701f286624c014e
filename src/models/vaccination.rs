use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::patch::present;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccination {
    pub id: i64,
    pub name: String,
    /// Administration date.
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVaccination {
    pub name: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccinationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}
