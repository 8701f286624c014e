use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing;

use super::Repository;
use crate::blob_store::BlobStore;
use crate::db::query::UpdateBuilder;
use crate::db::{DatabaseError, StoreGuardian};
use crate::models::patch::required_text;
use crate::models::*;

const COLUMNS: &str = "id, created_at, test_type, image_path, results, notes, analyzed_data";

pub struct TestResultRepository<'a> {
    store: &'a StoreGuardian,
    blobs: &'a BlobStore,
}

impl<'a> TestResultRepository<'a> {
    pub fn new(store: &'a StoreGuardian, blobs: &'a BlobStore) -> Self {
        Self { store, blobs }
    }

    /// Results of one kind, newest first.
    pub fn get_by_type(&self, test_type: &str) -> Result<Vec<TestResult>, DatabaseError> {
        self.store.with_store(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM test_results WHERE test_type = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![test_type], test_result_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.store
            .with_store(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM test_results", [], |r| r.get(0))?))
    }
}

impl Repository for TestResultRepository<'_> {
    type Record = TestResult;
    type New = NewTestResult;
    type Patch = TestResultPatch;

    fn create(&self, new: &NewTestResult) -> Result<i64, DatabaseError> {
        let test_type = required_text("test_type", &new.test_type)?;
        let image_path = required_text("image_path", &new.image_path)?;
        let image = Path::new(&image_path);
        if !self.blobs.owns(image) {
            return Err(DatabaseError::Validation(format!(
                "image {image_path} was not stored by the image store"
            )));
        }
        if !image.is_file() {
            return Err(DatabaseError::Validation(format!("image {image_path} does not exist")));
        }

        let id = self.store.with_store(|conn| {
            conn.execute(
                "INSERT INTO test_results (created_at, test_type, image_path, results, notes, analyzed_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Utc::now(),
                    test_type,
                    image_path,
                    new.results,
                    new.notes,
                    new.analyzed_data,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, test_type = %test_type, "Test result created");
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<TestResult>, DatabaseError> {
        self.store.with_store(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM test_results ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], test_result_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn get_by_id(&self, id: i64) -> Result<Option<TestResult>, DatabaseError> {
        self.store.with_store(|conn| get_test_result(conn, id))
    }

    fn update(&self, id: i64, patch: &TestResultPatch) -> Result<(), DatabaseError> {
        let test_type = patch
            .test_type
            .as_deref()
            .map(|t| required_text("test_type", t))
            .transpose()?;

        self.store.with_store(|conn| {
            UpdateBuilder::new("test_results")
                .set_if("test_type", test_type.clone())
                .set_if("results", patch.results.clone())
                .set_if("notes", patch.notes.clone())
                .set_if("analyzed_data", patch.analyzed_data.clone())
                .execute(conn, id)
        })?;
        Ok(())
    }

    /// Remove the backing image (best effort), then the row.
    fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        let Some(existing) = self.get_by_id(id)? else {
            return Ok(());
        };

        match self.blobs.remove(Path::new(&existing.image_path)) {
            Ok(true) => tracing::debug!(id, "Removed test result image"),
            Ok(false) => tracing::debug!(id, "Test result image already gone"),
            Err(e) => tracing::warn!(id, error = %e, "Could not remove test result image"),
        }

        self.store.with_store(|conn| {
            conn.execute("DELETE FROM test_results WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        tracing::info!(id, "Test result deleted");
        Ok(())
    }
}

pub(crate) fn get_test_result(conn: &Connection, id: i64) -> Result<Option<TestResult>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {COLUMNS} FROM test_results WHERE id = ?1"),
        params![id],
        test_result_from_row,
    );

    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn test_result_from_row(row: &Row<'_>) -> rusqlite::Result<TestResult> {
    Ok(TestResult {
        id: row.get(0)?,
        created_at: row.get::<_, DateTime<Utc>>(1)?,
        test_type: row.get(2)?,
        image_path: row.get(3)?,
        results: row.get(4)?,
        notes: row.get(5)?,
        analyzed_data: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::fixture;

    fn new_result(blobs: &BlobStore, test_type: &str) -> NewTestResult {
        let path = blobs.save_image_bytes(b"scan").unwrap();
        NewTestResult {
            test_type: test_type.into(),
            image_path: path.to_string_lossy().into_owned(),
            results: Some("Hb 13.5".into()),
            notes: None,
            analyzed_data: None,
        }
    }

    #[test]
    fn create_and_read_back() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);

        let id = repo.create(&new_result(&f.blobs, "blood")).unwrap();
        let stored = repo.get_by_id(id).unwrap().unwrap();

        assert_eq!(stored.test_type, "blood");
        assert_eq!(stored.results.as_deref(), Some("Hb 13.5"));
        assert!(stored.notes.is_none());
    }

    #[test]
    fn missing_id_is_none() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        assert!(repo.get_by_id(404).unwrap().is_none());
    }

    #[test]
    fn blank_type_is_rejected_before_io() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let err = repo.create(&new_result(&f.blobs, "  ")).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
        assert_eq!(f.guardian.open_count(), 0);
    }

    #[test]
    fn foreign_image_path_is_rejected() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let mut new = new_result(&f.blobs, "blood");
        new.image_path = "/tmp/somewhere/else.jpg".into();
        assert!(matches!(repo.create(&new), Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn escaping_image_path_is_rejected_and_outside_file_kept() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let outside = f.blobs.root().parent().unwrap().join("precious.txt");
        std::fs::write(&outside, b"keep").unwrap();

        let mut new = new_result(&f.blobs, "blood");
        new.image_path = f
            .blobs
            .root()
            .join("..")
            .join("precious.txt")
            .to_string_lossy()
            .into_owned();

        assert!(matches!(repo.create(&new), Err(DatabaseError::Validation(_))));
        assert_eq!(repo.count().unwrap(), 0);
        assert!(outside.exists());
    }

    #[test]
    fn image_path_must_exist() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let mut new = new_result(&f.blobs, "blood");
        new.image_path = f
            .blobs
            .root()
            .join("test_1.jpg")
            .to_string_lossy()
            .into_owned();
        assert!(matches!(repo.create(&new), Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn get_all_is_newest_first() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let old = repo.create(&new_result(&f.blobs, "urine")).unwrap();
        let new = repo.create(&new_result(&f.blobs, "blood")).unwrap();
        f.guardian
            .with_store(|conn| {
                conn.execute(
                    "UPDATE test_results SET created_at = '2020-01-01 00:00:00+00:00' WHERE id = ?1",
                    params![old],
                )?;
                Ok(())
            })
            .unwrap();

        let all = repo.get_all().unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![new, old]);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[test]
    fn get_by_type_filters() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        repo.create(&new_result(&f.blobs, "blood")).unwrap();
        repo.create(&new_result(&f.blobs, "x_ray")).unwrap();
        assert_eq!(repo.get_by_type("x_ray").unwrap().len(), 1);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn empty_patch_leaves_row_unchanged() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let id = repo.create(&new_result(&f.blobs, "blood")).unwrap();
        let before = repo.get_by_id(id).unwrap().unwrap();

        repo.update(id, &TestResultPatch::default()).unwrap();

        assert_eq!(repo.get_by_id(id).unwrap().unwrap(), before);
    }

    #[test]
    fn patch_touches_only_supplied_fields() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let id = repo.create(&new_result(&f.blobs, "blood")).unwrap();

        repo.update(
            id,
            &TestResultPatch {
                notes: Some(Some("fasting".into())),
                results: Some(None),
                ..Default::default()
            },
        )
        .unwrap();

        let stored = repo.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.notes.as_deref(), Some("fasting"));
        assert!(stored.results.is_none());
        assert_eq!(stored.test_type, "blood");
    }

    #[test]
    fn update_unknown_id_is_silent() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let patch = TestResultPatch {
            notes: Some(Some("ghost".into())),
            ..Default::default()
        };
        assert!(repo.update(99, &patch).is_ok());
    }

    #[test]
    fn delete_removes_row_and_image() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let new = new_result(&f.blobs, "blood");
        let path = std::path::PathBuf::from(&new.image_path);
        let id = repo.create(&new).unwrap();

        repo.delete(id).unwrap();

        assert!(repo.get_by_id(id).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn delete_with_missing_image_still_removes_row() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        let new = new_result(&f.blobs, "blood");
        let id = repo.create(&new).unwrap();
        std::fs::remove_file(&new.image_path).unwrap();

        repo.delete(id).unwrap();

        assert!(repo.get_by_id(id).unwrap().is_none());
    }

    #[test]
    fn delete_unknown_id_is_ok() {
        let f = fixture();
        let repo = TestResultRepository::new(&f.guardian, &f.blobs);
        assert!(repo.delete(7).is_ok());
    }
}
