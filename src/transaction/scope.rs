//! Scoped transaction acquisition.

use log::{debug, error};

use super::definition::TransactionDefinition;
use super::error::Result;
use super::manager::{ContextOf, HandleOf, TransactionCoordinator};
use crate::resource::Resource;

/// A logical transaction bound to the context it was begun in.
///
/// Rolls back on drop unless committed or rolled back explicitly. Inner
/// scopes borrow their parent mutably, so they always end first.
pub struct TransactionScope<'a, R: Resource> {
    coordinator: &'a TransactionCoordinator<R>,
    ctx: &'a mut ContextOf<R>,
    handle: HandleOf<R>,
}

impl<'a, R: Resource> TransactionScope<'a, R> {
    pub fn begin(
        coordinator: &'a TransactionCoordinator<R>,
        ctx: &'a mut ContextOf<R>,
        definition: &TransactionDefinition,
    ) -> Result<Self> {
        let handle = coordinator.begin(ctx, definition)?;
        Ok(Self {
            coordinator,
            ctx,
            handle,
        })
    }

    /// Begins an inner logical transaction in the same context.
    pub fn nested(&mut self, definition: &TransactionDefinition) -> Result<TransactionScope<'_, R>> {
        TransactionScope::begin(self.coordinator, self.ctx, definition)
    }

    pub fn handle(&self) -> &HandleOf<R> {
        &self.handle
    }

    pub fn is_new(&self) -> bool {
        self.handle.is_new()
    }

    pub fn set_rollback_only(&mut self) {
        self.handle.set_rollback_only();
    }

    pub fn context(&self) -> &ContextOf<R> {
        &*self.ctx
    }

    /// The context itself, for code that begins its own transactions.
    pub fn context_mut(&mut self) -> &mut ContextOf<R> {
        &mut *self.ctx
    }

    pub fn connection_mut(&mut self) -> Option<&mut R::Connection> {
        self.ctx.connection_mut()
    }

    pub fn commit(mut self) -> Result<()> {
        self.coordinator.commit(self.ctx, &mut self.handle)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.coordinator.rollback(self.ctx, &mut self.handle)
    }
}

impl<R: Resource> Drop for TransactionScope<'_, R> {
    fn drop(&mut self) {
        if self.handle.is_completed() {
            return;
        }
        debug!("Scope of {} ended without completion, rolling back", self.handle.id());
        if let Err(e) = self.coordinator.rollback(self.ctx, &mut self.handle) {
            error!("Rollback of abandoned transaction {} failed: {}", self.handle.id(), e);
        }
    }
}
