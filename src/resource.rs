//! The transactional resource the coordinator drives.
//!
//! A resource hands out connections, each of which carries at most one
//! physical transaction between `open_physical` and `close`. The coordinator
//! never interprets resource failures; it passes them to its caller inside
//! `TransactionError::Resource`.

pub mod memory;

use std::time::Duration;
use thiserror::Error;

use crate::transaction::TransactionOptions;

pub use memory::{ConnectionId, MemoryConnection, MemoryDatabase, PhysicalEvent, Row};

/// Marker for a partial-rollback point inside a physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointId(pub u32);

impl std::fmt::Display for SavepointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SAVEPOINT_{}", self.0)
    }
}

/// Failures reported by a resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Failed to open connection: {0}")]
    ConnectionFailed(String),

    #[error("Physical commit failed: {0}")]
    CommitFailed(String),

    #[error("Physical rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Transaction timed out after exceeding {limit:?}")]
    TimedOut { limit: Duration },

    #[error("Resource does not support savepoints")]
    SavepointsUnsupported,

    #[error("Unknown savepoint: {0}")]
    UnknownSavepoint(SavepointId),

    #[error("Write attempted through read-only connection {0}")]
    ReadOnly(String),
}

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// A single transactional resource, e.g. one database.
///
/// Every method is a synchronous call. Implementations must be shareable
/// across execution contexts; per-transaction state lives in the connection.
pub trait Resource: Send + Sync {
    type Connection;

    /// Acquires a connection and starts a physical transaction on it with the
    /// given options (the timeout, if any, is the resource's to enforce).
    fn open_physical(&self, options: &TransactionOptions) -> ResourceResult<Self::Connection>;

    fn physical_commit(&self, connection: &mut Self::Connection) -> ResourceResult<()>;

    fn physical_rollback(&self, connection: &mut Self::Connection) -> ResourceResult<()>;

    /// Returns the connection. Called exactly once per opened connection.
    fn close(&self, connection: Self::Connection) -> ResourceResult<()>;

    fn supports_savepoints(&self) -> bool {
        false
    }

    fn create_savepoint(&self, _connection: &mut Self::Connection) -> ResourceResult<SavepointId> {
        Err(ResourceError::SavepointsUnsupported)
    }

    /// Undoes everything done on the connection since `savepoint` was created.
    /// The savepoint itself stays valid until released.
    fn rollback_to_savepoint(
        &self,
        _connection: &mut Self::Connection,
        _savepoint: SavepointId,
    ) -> ResourceResult<()> {
        Err(ResourceError::SavepointsUnsupported)
    }

    fn release_savepoint(
        &self,
        _connection: &mut Self::Connection,
        _savepoint: SavepointId,
    ) -> ResourceResult<()> {
        Err(ResourceError::SavepointsUnsupported)
    }
}
