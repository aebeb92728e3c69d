//! Logical transaction handles and their lifecycle state.

use std::time::{Duration, Instant};

use super::context::PhysicalTransaction;
use super::definition::TransactionDefinition;
use super::id::TransactionId;
use crate::resource::SavepointId;

/// Where a handle is in its lifecycle. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// How a handle relates to the physical transaction it runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Started the physical transaction and ends it.
    New,
    /// Joined a physical transaction owned by an outer handle.
    Participating,
    /// Runs inside the outer physical transaction behind a savepoint.
    Nested(SavepointId),
    /// Runs without any transaction.
    Empty,
}

/// One logical transaction, produced by `TransactionCoordinator::begin` and
/// completed by exactly one of `commit` / `rollback`.
#[derive(Debug)]
pub struct TransactionHandle<C> {
    id: TransactionId,
    kind: HandleKind,
    definition: TransactionDefinition,
    state: TransactionState,
    local_rollback_only: bool,
    started: Instant,
    /// Outer physical transaction set aside while this handle runs.
    pub(crate) suspended: Option<PhysicalTransaction<C>>,
}

impl<C> TransactionHandle<C> {
    pub(crate) fn new(
        id: TransactionId,
        kind: HandleKind,
        definition: TransactionDefinition,
        suspended: Option<PhysicalTransaction<C>>,
    ) -> Self {
        Self {
            id,
            kind,
            definition,
            state: TransactionState::Active,
            local_rollback_only: false,
            started: Instant::now(),
            suspended,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// True iff this handle started a new physical transaction.
    pub fn is_new(&self) -> bool {
        self.kind == HandleKind::New
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, HandleKind::Nested(_))
    }

    /// False for handles that proceed without a transaction.
    pub fn has_transaction(&self) -> bool {
        self.kind != HandleKind::Empty
    }

    pub fn has_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_finished()
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    /// Marks this logical transaction so that a later `commit` rolls it back
    /// instead. Unlike a participant's rollback, this is an expected outcome:
    /// the owner's commit does not report `UnexpectedRollback` for it.
    pub fn set_rollback_only(&mut self) {
        self.local_rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.local_rollback_only
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn finish(&mut self, state: TransactionState) {
        debug_assert!(self.state.is_active());
        debug_assert!(state.is_finished());
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(kind: HandleKind) -> TransactionHandle<()> {
        TransactionHandle::new(
            TransactionId::new(1),
            kind,
            TransactionDefinition::default(),
            None,
        )
    }

    #[test]
    fn test_transaction_state() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Active.is_finished());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::RolledBack.is_finished());
        assert_eq!(TransactionState::RolledBack.to_string(), "RolledBack");
    }

    #[test]
    fn test_handle_kinds() {
        assert!(handle(HandleKind::New).is_new());
        assert!(!handle(HandleKind::Participating).is_new());
        assert!(handle(HandleKind::Nested(SavepointId(1))).is_nested());
        assert!(!handle(HandleKind::Empty).has_transaction());
        assert!(handle(HandleKind::Participating).has_transaction());
    }

    #[test]
    fn test_handle_finish() {
        let mut h = handle(HandleKind::New);
        assert!(!h.is_completed());

        h.finish(TransactionState::Committed);
        assert!(h.is_completed());
        assert_eq!(h.state(), TransactionState::Committed);
    }

    #[test]
    fn test_local_rollback_only() {
        let mut h = handle(HandleKind::Participating);
        assert!(!h.is_rollback_only());
        h.set_rollback_only();
        assert!(h.is_rollback_only());
    }
}
