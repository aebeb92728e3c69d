//! Per-execution-context transaction state.
//!
//! One `TransactionContext` belongs to one logical call chain (a request, a
//! task, a test). It holds the single physical-transaction slot of that chain
//! and is passed explicitly to every coordinator call, so separate chains
//! never share state and need no locking.

use super::definition::{Isolation, TransactionOptions};
use super::id::TransactionId;

/// The physical transaction currently bound to a context, or suspended
/// inside a handle.
#[derive(Debug)]
pub struct PhysicalTransaction<C> {
    /// Handle that started it and is the only one allowed to end it.
    pub(crate) owner: TransactionId,
    pub(crate) connection: C,
    /// Set by a failing participant; never cleared.
    pub(crate) rollback_only: bool,
    /// Logical transactions currently inside this physical one.
    pub(crate) depth: usize,
    /// Options applied when it was opened.
    pub(crate) options: TransactionOptions,
}

impl<C> PhysicalTransaction<C> {
    pub(crate) fn new(owner: TransactionId, connection: C, options: TransactionOptions) -> Self {
        Self {
            owner,
            connection,
            rollback_only: false,
            depth: 1,
            options,
        }
    }

    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }
}

/// Transaction state of one execution context.
#[derive(Debug)]
pub struct TransactionContext<C> {
    active: Option<PhysicalTransaction<C>>,
    /// Ids of handles begun in this context and not yet completed, innermost last.
    open: Vec<TransactionId>,
}

impl<C> TransactionContext<C> {
    pub fn new() -> Self {
        Self {
            active: None,
            open: Vec::new(),
        }
    }

    /// True when a physical transaction is bound, i.e. data access through
    /// this context runs inside a transaction.
    pub fn is_actual_transaction_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_rollback_only(&self) -> bool {
        self.active.as_ref().map_or(false, |tx| tx.rollback_only)
    }

    /// Logical transactions nested in the active physical transaction; 0 when
    /// none is active.
    pub fn depth(&self) -> usize {
        self.active.as_ref().map_or(0, |tx| tx.depth)
    }

    pub fn is_current_read_only(&self) -> bool {
        self.active.as_ref().map_or(false, |tx| tx.options.read_only)
    }

    pub fn current_isolation(&self) -> Option<Isolation> {
        self.active.as_ref().map(|tx| tx.options.isolation)
    }

    pub fn active(&self) -> Option<&PhysicalTransaction<C>> {
        self.active.as_ref()
    }

    /// The connection bound to the active physical transaction. Data access
    /// code should write through it when present and auto-commit otherwise.
    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.active.as_mut().map(|tx| &mut tx.connection)
    }

    pub fn connection(&self) -> Option<&C> {
        self.active.as_ref().map(|tx| &tx.connection)
    }

    /// Handles begun and not yet completed in this context.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn innermost(&self) -> Option<TransactionId> {
        self.open.last().copied()
    }

    pub(crate) fn push_open(&mut self, id: TransactionId) {
        self.open.push(id);
    }

    pub(crate) fn pop_open(&mut self) -> Option<TransactionId> {
        self.open.pop()
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut PhysicalTransaction<C>> {
        self.active.as_mut()
    }

    pub(crate) fn bind(&mut self, tx: PhysicalTransaction<C>) {
        debug_assert!(self.active.is_none());
        self.active = Some(tx);
    }

    /// Unbinds the active physical transaction (suspend or teardown).
    pub(crate) fn unbind(&mut self) -> Option<PhysicalTransaction<C>> {
        self.active.take()
    }
}

impl<C> Default for TransactionContext<C> {
    fn default() -> Self {
        Self::new()
    }
}
