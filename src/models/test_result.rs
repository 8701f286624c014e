use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::present;

/// A scanned or imported document image with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub test_type: String,
    pub image_path: String,
    pub results: Option<String>,
    pub notes: Option<String>,
    pub analyzed_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTestResult {
    pub test_type: String,
    /// Path returned by the blob store.
    pub image_path: String,
    pub results: Option<String>,
    pub notes: Option<String>,
    pub analyzed_data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResultPatch {
    #[serde(default)]
    pub test_type: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub results: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub analyzed_data: Option<Option<String>>,
}
