//! Owns the single store handle for the process.
//!
//! The handle is opened lazily on first use (running the schema migrations as
//! part of the open) and reused afterwards. When an operation reports the
//! handle as closed or unusable, the guardian drops it, reopens, and runs the
//! operation one more time. A second failure goes back to the caller as-is.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing;

use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Fresh in-memory database on every open (tests, previews).
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Closed,
    Opening,
    Open,
}

type Opener = Box<dyn Fn() -> Result<Connection, DatabaseError> + Send + Sync>;

struct Slot {
    conn: Option<Connection>,
    state: StoreState,
}

pub struct StoreGuardian {
    opener: Opener,
    slot: Mutex<Slot>,
    opens: AtomicU32,
}

impl StoreGuardian {
    pub fn new(location: StoreLocation) -> Self {
        match location {
            StoreLocation::File(path) => Self::with_opener(move || open_database(&path)),
            StoreLocation::Memory => Self::with_opener(open_memory_database),
        }
    }

    /// Guardian over a custom open sequence. The opener must leave the
    /// schema current, like `open_database` does.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Connection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            slot: Mutex::new(Slot {
                conn: None,
                state: StoreState::Closed,
            }),
            opens: AtomicU32::new(0),
        }
    }

    /// Open the store now instead of on first use. Idempotent.
    pub fn open(&self) -> Result<(), DatabaseError> {
        let mut slot = self.lock()?;
        self.ensure_open(&mut slot)?;
        Ok(())
    }

    /// Drop the handle. The next operation reopens it.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let mut slot = self.lock()?;
        if slot.conn.take().is_some() {
            tracing::info!("Store closed");
        }
        slot.state = StoreState::Closed;
        Ok(())
    }

    pub fn state(&self) -> StoreState {
        self.slot
            .lock()
            .map(|slot| slot.state)
            .unwrap_or(StoreState::Closed)
    }

    /// Number of successful open sequences so far.
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Run `op` against the live handle, reopening and retrying once if the
    /// handle turns out to be lost.
    pub fn with_store<T, F>(&self, mut op: F) -> Result<T, DatabaseError>
    where
        F: FnMut(&Connection) -> Result<T, DatabaseError>,
    {
        let mut slot = self.lock()?;

        let first = {
            let conn = self.ensure_open(&mut slot)?;
            op(conn)
        };

        match first {
            Err(e) if e.is_connection_lost() => {
                tracing::warn!(error = %e, "Store handle lost, reopening and retrying once");
                slot.conn = None;
                slot.state = StoreState::Closed;
                let conn = self.ensure_open(&mut slot)?;
                op(conn)
            }
            other => other,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot>, DatabaseError> {
        self.slot.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn ensure_open<'a>(&self, slot: &'a mut Slot) -> Result<&'a Connection, DatabaseError> {
        if slot.conn.is_none() {
            slot.state = StoreState::Opening;
            match (self.opener)() {
                Ok(conn) => {
                    slot.conn = Some(conn);
                    slot.state = StoreState::Open;
                    self.opens.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    slot.state = StoreState::Closed;
                    tracing::error!(error = %e, "Store open failed");
                    return Err(match e {
                        DatabaseError::NotInitialized(reason) => {
                            DatabaseError::NotInitialized(reason)
                        }
                        other => DatabaseError::NotInitialized(other.to_string()),
                    });
                }
            }
        }

        slot.conn
            .as_ref()
            .ok_or_else(|| DatabaseError::NotInitialized("store handle missing after open".into()))
    }
}
