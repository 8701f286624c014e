//! Entity-scoped store operations.
//!
//! Every repository borrows the process-wide [`StoreGuardian`] and runs each
//! statement through `with_store`, so a lost handle is recovered in one place.
//! Repositories never hold a connection of their own.

mod chat;
mod medication;
mod settings;
mod share;
mod test_result;
mod vaccination;

use super::DatabaseError;

/// Uniform record operations.
///
/// `get_by_id` reports absence as `Ok(None)`. `update` writes only the fields
/// present in the patch; an empty patch or an unknown id changes nothing and
/// still succeeds.
pub trait Repository {
    type Record;
    type New;
    type Patch;

    fn create(&self, new: &Self::New) -> Result<i64, DatabaseError>;
    fn get_all(&self) -> Result<Vec<Self::Record>, DatabaseError>;
    fn get_by_id(&self, id: i64) -> Result<Option<Self::Record>, DatabaseError>;
    fn update(&self, id: i64, patch: &Self::Patch) -> Result<(), DatabaseError>;
    fn delete(&self, id: i64) -> Result<(), DatabaseError>;
}

pub use chat::*;
pub use medication::*;
pub use settings::*;
pub use share::*;
pub use test_result::*;
pub use vaccination::*;
