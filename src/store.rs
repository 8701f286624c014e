//! `HealthStore`, the composition root for local persistence.
//!
//! Owns the one store handle (through [`StoreGuardian`]) and the image
//! directory, and hands out repositories that borrow both. Nothing here is
//! global: the application creates one `HealthStore` at startup and passes it
//! by reference.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing;

use crate::blob_store::{BlobStore, StoreStats};
use crate::config;
use crate::db::{
    ChatRepository, DatabaseError, MedicationRepository, SettingsRepository, ShareRepository,
    StoreGuardian, StoreLocation, StoreState, TestResultRepository, VaccinationRepository,
};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// App documents root; images go to `<root>/medical_tests`.
    pub documents_root: PathBuf,
    pub location: StoreLocation,
}

impl StoreConfig {
    /// Database and images under [`config::documents_dir`].
    pub fn default_paths() -> Self {
        Self::at(config::documents_dir())
    }

    /// Database file and images under `root`.
    pub fn at(root: PathBuf) -> Self {
        Self {
            location: StoreLocation::File(config::database_path(&root)),
            documents_root: root,
        }
    }

    /// In-memory database with images under `root`.
    pub fn in_memory(root: PathBuf) -> Self {
        Self {
            documents_root: root,
            location: StoreLocation::Memory,
        }
    }
}

/// Sizes reported to the storage screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReport {
    pub test_results: i64,
    pub images: StoreStats,
}

pub struct HealthStore {
    guardian: StoreGuardian,
    blobs: BlobStore,
}

impl HealthStore {
    /// Build the store without touching disk; the handle opens on first use.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            blobs: BlobStore::new(config::images_dir(&config.documents_root)),
            guardian: StoreGuardian::new(config.location),
        }
    }

    /// Open the handle and bring the schema up to date. Idempotent.
    pub fn init_store(&self) -> Result<(), DatabaseError> {
        self.guardian.open()?;
        tracing::info!(app = config::APP_NAME, "Store ready");
        Ok(())
    }

    pub fn close(&self) -> Result<(), DatabaseError> {
        self.guardian.close()
    }

    pub fn state(&self) -> StoreState {
        self.guardian.state()
    }

    /// File count and total bytes of the image directory.
    pub fn store_stats(&self) -> StoreStats {
        self.blobs.stats()
    }

    pub fn report(&self) -> Result<StoreReport, DatabaseError> {
        Ok(StoreReport {
            test_results: self.test_results().count()?,
            images: self.store_stats(),
        })
    }

    pub fn guardian(&self) -> &StoreGuardian {
        &self.guardian
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn test_results(&self) -> TestResultRepository<'_> {
        TestResultRepository::new(&self.guardian, &self.blobs)
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.guardian)
    }

    pub fn shares(&self) -> ShareRepository<'_> {
        ShareRepository::new(&self.guardian)
    }

    pub fn chat(&self) -> ChatRepository<'_> {
        ChatRepository::new(&self.guardian)
    }

    pub fn medications(&self) -> MedicationRepository<'_> {
        MedicationRepository::new(&self.guardian)
    }

    pub fn vaccinations(&self) -> VaccinationRepository<'_> {
        VaccinationRepository::new(&self.guardian)
    }
}
