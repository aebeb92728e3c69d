//! Transaction coordinator error types.

use thiserror::Error;

use super::id::TransactionId;
use crate::resource::ResourceError;

/// Errors returned by the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("No existing transaction found for propagation MANDATORY")]
    NoTransaction,

    #[error("Existing transaction found for propagation NEVER")]
    ExistingTransaction,

    #[error("Illegal transaction state for {id}: {reason}")]
    IllegalState { id: TransactionId, reason: String },

    #[error("Transaction {id} silently rolled back because it has been marked as rollback-only")]
    UnexpectedRollback { id: TransactionId },

    #[error("Nested transactions are not supported: {0}")]
    NestedNotSupported(String),

    #[error("Invalid transaction timeout: {0:?}")]
    InvalidTimeout(std::time::Duration),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
}

impl TransactionError {
    pub(crate) fn illegal_state(id: TransactionId, reason: impl Into<String>) -> Self {
        Self::IllegalState {
            id,
            reason: reason.into(),
        }
    }

    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, Self::UnexpectedRollback { .. })
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
