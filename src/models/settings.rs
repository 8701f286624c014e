use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::AiProvider;
use super::patch::present;

/// The local user's profile. The most recent row is the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: i64,
    pub user_id: String,
    pub user_name: String,
    pub doctor_name: Option<String>,
    pub doctor_email: Option<String>,
    pub doctor_phone: Option<String>,
    pub ai_provider: Option<AiProvider>,
    #[serde(skip_serializing)]
    pub ai_api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserSettings {
    pub fn has_api_key(&self) -> bool {
        self.ai_api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Full settings form as submitted by the settings screen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsInput {
    pub user_name: String,
    pub doctor_name: Option<String>,
    pub doctor_email: Option<String>,
    pub doctor_phone: Option<String>,
    pub ai_provider: Option<AiProvider>,
    pub ai_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub doctor_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub doctor_email: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub doctor_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub ai_provider: Option<Option<AiProvider>>,
    #[serde(default, deserialize_with = "present")]
    pub ai_api_key: Option<Option<String>>,
}
