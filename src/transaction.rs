//! Transaction coordination.
//!
//! This module provides propagation-aware transaction support, including:
//! - Logical transaction handles over a single physical transaction
//! - Propagation modes (REQUIRED, REQUIRES_NEW, NESTED, ...)
//! - Rollback-only tracking and the resulting unexpected rollbacks
//! - Scoped acquisition and policy-driven completion

pub mod context;
pub mod definition;
pub mod error;
pub mod id;
pub mod manager;
pub mod policy;
pub mod scope;
pub mod state;
pub mod template;

// Re-export commonly used types
pub use context::{PhysicalTransaction, TransactionContext};
pub use definition::{Isolation, Propagation, TransactionDefinition, TransactionOptions};
pub use error::{Result, TransactionError};
pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::{ContextOf, HandleOf, TransactionCoordinator};
pub use policy::{Classify, ErrorClass, Outcome, RollbackPolicy};
pub use scope::TransactionScope;
pub use state::{HandleKind, TransactionHandle, TransactionState};
pub use template::TransactionTemplate;
