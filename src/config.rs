use std::path::{Path, PathBuf};

/// Application-level constants
pub const APP_NAME: &str = "Vitadoc";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Overrides the documents root (tests, portable installs).
pub const DATA_DIR_ENV: &str = "VITADOC_DATA_DIR";

const IMAGES_DIR_NAME: &str = "medical_tests";
const DATABASE_FILE_NAME: &str = "vitadoc.db";

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "vitadoc_lib=info,warn"
}

/// Root for everything the app persists: ~/Documents/Vitadoc by default
pub fn documents_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Directory holding scanned images
pub fn images_dir(root: &Path) -> PathBuf {
    root.join(IMAGES_DIR_NAME)
}

/// SQLite file inside the documents root
pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE_NAME)
}
