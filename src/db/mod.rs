pub mod guardian;
pub mod identity;
pub mod query;
pub mod repository;
pub mod schema;
pub mod sqlite;

pub use guardian::*;
pub use repository::*;
pub use sqlite::*;

use thiserror::Error;

use crate::blob_store::BlobError;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store not initialized: {0}")]
    NotInitialized(String),

    #[error("Store connection lost: {0}")]
    ConnectionLost(String),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// True when the handle itself is gone or unusable and reopening may help.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionLost(_) => true,
            Self::Sqlite(err) => sqlite_handle_unusable(err),
            _ => false,
        }
    }
}

fn sqlite_handle_unusable(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi::ErrorCode;

    if let rusqlite::Error::SqliteFailure(e, _) = err {
        if matches!(
            e.code,
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::ApiMisuse
        ) {
            return true;
        }
    }

    let message = err.to_string().to_lowercase();
    message.contains("closed") || message.contains("not open") || message.contains("unusable")
}
