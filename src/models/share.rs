use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record of a test result shared with a doctor.
///
/// `expires_at` is informational; nothing prunes or blocks expired shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultShare {
    pub id: i64,
    pub test_result_id: i64,
    pub doctor_name: String,
    pub doctor_email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TestResultShare {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShare {
    pub test_result_id: i64,
    pub doctor_name: String,
    pub doctor_email: Option<String>,
    pub expires_at: DateTime<Utc>,
}
