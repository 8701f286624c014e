pub mod analysis;
pub mod blob_store;
pub mod config;
pub mod conversations;
pub mod db;
pub mod logging;
pub mod models;
pub mod store;
pub mod vaccination_validity;

pub use store::{HealthStore, StoreConfig};

/// Initialize logging and open the default store.
pub fn run() -> Result<HealthStore, db::DatabaseError> {
    logging::init_tracing();

    let store = HealthStore::new(StoreConfig::default_paths());
    store.init_store()?;
    Ok(store)
}
