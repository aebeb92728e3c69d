//! The propagation-aware transaction coordinator.
//!
//! Logical transactions (handles) map onto at most one physical transaction
//! per execution context. Only the handle that opened a physical transaction
//! ever commits or rolls it back; every other handle just adjusts the shared
//! bookkeeping in the context.

use log::{debug, warn};
use std::sync::Arc;

use super::context::{PhysicalTransaction, TransactionContext};
use super::definition::{Isolation, Propagation, TransactionDefinition};
use super::error::{Result, TransactionError};
use super::id::{TransactionId, TransactionIdGenerator};
use super::state::{HandleKind, TransactionHandle, TransactionState};
use crate::config::CoordinatorConfig;
use crate::resource::{Resource, ResourceResult};

/// Context type for a coordinator over resource `R`.
pub type ContextOf<R> = TransactionContext<<R as Resource>::Connection>;
/// Handle type for a coordinator over resource `R`.
pub type HandleOf<R> = TransactionHandle<<R as Resource>::Connection>;

/// Drives one resource on behalf of any number of execution contexts.
///
/// The coordinator is shareable across threads; all per-call-chain state is
/// in the `TransactionContext` each call receives.
pub struct TransactionCoordinator<R: Resource> {
    resource: Arc<R>,
    config: CoordinatorConfig,
    id_generator: TransactionIdGenerator,
}

impl<R: Resource> TransactionCoordinator<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self::with_config(resource, CoordinatorConfig::default())
    }

    pub fn with_config(resource: Arc<R>, config: CoordinatorConfig) -> Self {
        Self {
            resource,
            config,
            id_generator: TransactionIdGenerator::new(),
        }
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Creates an empty context for a new execution context.
    pub fn new_context(&self) -> ContextOf<R> {
        TransactionContext::new()
    }

    /// Begins a logical transaction according to `definition.propagation`.
    pub fn begin(
        &self,
        ctx: &mut ContextOf<R>,
        definition: &TransactionDefinition,
    ) -> Result<HandleOf<R>> {
        if let Some(timeout) = definition.options.timeout {
            if timeout.is_zero() {
                return Err(TransactionError::InvalidTimeout(timeout));
            }
        }

        let id = self.id_generator.next();
        let active = ctx.is_actual_transaction_active();

        let handle = match (definition.propagation, active) {
            (Propagation::Mandatory, false) => return Err(TransactionError::NoTransaction),
            (Propagation::Never, true) => return Err(TransactionError::ExistingTransaction),
            (Propagation::Required | Propagation::Supports | Propagation::Mandatory, true) => {
                self.participate(ctx, id, definition)?
            }
            (Propagation::Required | Propagation::RequiresNew | Propagation::Nested, false) => {
                debug!("Creating new transaction {} [{}]", id, definition.label());
                self.start_new(ctx, id, definition, None)?
            }
            (Propagation::RequiresNew, true) => {
                debug!(
                    "Suspending current transaction, creating new transaction {} [{}]",
                    id,
                    definition.label()
                );
                let suspended = ctx.unbind();
                self.start_new(ctx, id, definition, suspended)?
            }
            (Propagation::NotSupported, true) => {
                debug!("Suspending current transaction for non-transactional {}", id);
                let suspended = ctx.unbind();
                TransactionHandle::new(id, HandleKind::Empty, definition.clone(), suspended)
            }
            (Propagation::Supports | Propagation::NotSupported | Propagation::Never, false) => {
                TransactionHandle::new(id, HandleKind::Empty, definition.clone(), None)
            }
            (Propagation::Nested, true) => self.start_nested(ctx, id, definition)?,
        };

        ctx.push_open(id);
        Ok(handle)
    }

    /// Commits the logical transaction. Only a handle that owns its physical
    /// transaction causes a physical commit; if that transaction was marked
    /// rollback-only it is rolled back instead and `UnexpectedRollback` is
    /// returned.
    pub fn commit(&self, ctx: &mut ContextOf<R>, handle: &mut HandleOf<R>) -> Result<()> {
        self.check_completable(ctx, handle)?;

        if handle.is_rollback_only() {
            debug!("Transactional code of {} requested rollback", handle.id());
            return self.complete_rollback(ctx, handle);
        }

        ctx.pop_open();
        match handle.kind() {
            HandleKind::Participating => {
                handle.finish(TransactionState::Committed);
                let tx = self.leave_active(ctx, handle.id())?;
                if tx.rollback_only && self.config.fail_early_on_global_rollback_only {
                    return Err(TransactionError::UnexpectedRollback { id: tx.owner });
                }
                Ok(())
            }
            HandleKind::Nested(savepoint) => {
                handle.finish(TransactionState::Committed);
                let tx = self.leave_active(ctx, handle.id())?;
                debug!("Releasing savepoint {} of nested transaction {}", savepoint, handle.id());
                self.resource
                    .release_savepoint(&mut tx.connection, savepoint)?;
                Ok(())
            }
            HandleKind::Empty => {
                handle.finish(TransactionState::Committed);
                self.resume(ctx, handle);
                Ok(())
            }
            HandleKind::New => {
                let mut tx = self.take_owned(ctx, handle.id())?;
                if tx.rollback_only {
                    debug!(
                        "Transaction {} is marked rollback-only but commit was requested; rolling back",
                        handle.id()
                    );
                    let outcome = self.resource.physical_rollback(&mut tx.connection);
                    handle.finish(TransactionState::RolledBack);
                    self.release(ctx, handle, tx, outcome)?;
                    return Err(TransactionError::UnexpectedRollback { id: handle.id() });
                }

                debug!("Initiating physical commit of {}", handle.id());
                let outcome = self.resource.physical_commit(&mut tx.connection);
                handle.finish(if outcome.is_ok() {
                    TransactionState::Committed
                } else {
                    TransactionState::RolledBack
                });
                self.release(ctx, handle, tx, outcome)
            }
        }
    }

    /// Rolls back the logical transaction. A participant only marks the
    /// physical transaction rollback-only; a nested handle rolls back to its
    /// savepoint; the owner rolls back physically.
    pub fn rollback(&self, ctx: &mut ContextOf<R>, handle: &mut HandleOf<R>) -> Result<()> {
        self.check_completable(ctx, handle)?;
        self.complete_rollback(ctx, handle)
    }

    fn complete_rollback(&self, ctx: &mut ContextOf<R>, handle: &mut HandleOf<R>) -> Result<()> {
        ctx.pop_open();
        handle.finish(TransactionState::RolledBack);

        match handle.kind() {
            HandleKind::Participating => {
                let mark = self.config.global_rollback_on_participation_failure;
                let tx = self.leave_active(ctx, handle.id())?;
                if mark {
                    debug!(
                        "Participating transaction {} failed - marking {} as rollback-only",
                        handle.id(),
                        tx.owner
                    );
                    tx.rollback_only = true;
                } else {
                    debug!(
                        "Participating transaction {} failed - leaving rollback decision to {}",
                        handle.id(),
                        tx.owner
                    );
                }
                Ok(())
            }
            HandleKind::Nested(savepoint) => {
                let tx = self.leave_active(ctx, handle.id())?;
                debug!("Rolling back nested transaction {} to {}", handle.id(), savepoint);
                self.resource
                    .rollback_to_savepoint(&mut tx.connection, savepoint)?;
                self.resource
                    .release_savepoint(&mut tx.connection, savepoint)?;
                Ok(())
            }
            HandleKind::Empty => {
                self.resume(ctx, handle);
                Ok(())
            }
            HandleKind::New => {
                let mut tx = self.take_owned(ctx, handle.id())?;
                debug!("Initiating physical rollback of {}", handle.id());
                let outcome = self.resource.physical_rollback(&mut tx.connection);
                self.release(ctx, handle, tx, outcome)
            }
        }
    }

    fn participate(
        &self,
        ctx: &mut ContextOf<R>,
        id: TransactionId,
        definition: &TransactionDefinition,
    ) -> Result<HandleOf<R>> {
        let tx = ctx
            .active_mut()
            .ok_or_else(|| TransactionError::illegal_state(id, "no transaction to join"))?;

        if self.config.validate_existing_transaction {
            let requested = definition.options.isolation;
            if requested != Isolation::Default && requested != tx.options.isolation {
                return Err(TransactionError::illegal_state(
                    id,
                    format!(
                        "requested isolation {:?} is incompatible with existing {:?}",
                        requested, tx.options.isolation
                    ),
                ));
            }
            if !definition.options.read_only && tx.options.read_only {
                return Err(TransactionError::illegal_state(
                    id,
                    "read-write transaction cannot join a read-only transaction",
                ));
            }
        }

        debug!("Participating in existing transaction {} as {}", tx.owner, id);
        tx.depth += 1;
        Ok(TransactionHandle::new(
            id,
            HandleKind::Participating,
            definition.clone(),
            None,
        ))
    }

    fn start_new(
        &self,
        ctx: &mut ContextOf<R>,
        id: TransactionId,
        definition: &TransactionDefinition,
        suspended: Option<PhysicalTransaction<R::Connection>>,
    ) -> Result<HandleOf<R>> {
        let mut options = definition.options;
        if options.timeout.is_none() {
            options.timeout = self.config.default_timeout;
        }

        let connection = match self.resource.open_physical(&options) {
            Ok(connection) => connection,
            Err(e) => {
                if let Some(outer) = suspended {
                    debug!("Resuming {} after failed begin of {}", outer.owner, id);
                    ctx.bind(outer);
                }
                return Err(e.into());
            }
        };

        ctx.bind(PhysicalTransaction::new(id, connection, options));
        Ok(TransactionHandle::new(
            id,
            HandleKind::New,
            definition.clone(),
            suspended,
        ))
    }

    fn start_nested(
        &self,
        ctx: &mut ContextOf<R>,
        id: TransactionId,
        definition: &TransactionDefinition,
    ) -> Result<HandleOf<R>> {
        if !self.config.nested_transaction_allowed {
            return Err(TransactionError::NestedNotSupported(
                "disabled by configuration".into(),
            ));
        }
        if !self.resource.supports_savepoints() {
            return Err(TransactionError::NestedNotSupported(
                "resource does not support savepoints".into(),
            ));
        }

        let tx = ctx
            .active_mut()
            .ok_or_else(|| TransactionError::illegal_state(id, "no transaction to nest in"))?;
        let savepoint = self.resource.create_savepoint(&mut tx.connection)?;
        tx.depth += 1;

        debug!(
            "Creating nested transaction {} [{}] at {} inside {}",
            id,
            definition.label(),
            savepoint,
            tx.owner
        );
        Ok(TransactionHandle::new(
            id,
            HandleKind::Nested(savepoint),
            definition.clone(),
            None,
        ))
    }

    fn check_completable(&self, ctx: &ContextOf<R>, handle: &HandleOf<R>) -> Result<()> {
        if handle.is_completed() {
            return Err(TransactionError::illegal_state(
                handle.id(),
                "transaction is already completed - do not call commit or rollback more than once per transaction",
            ));
        }
        match ctx.innermost() {
            Some(innermost) if innermost == handle.id() => Ok(()),
            Some(innermost) => Err(TransactionError::illegal_state(
                handle.id(),
                format!("inner transaction {} must complete first", innermost),
            )),
            None => Err(TransactionError::illegal_state(
                handle.id(),
                "transaction was not begun in this context",
            )),
        }
    }

    /// Decrements the depth of the active physical transaction for a
    /// completing participant or nested handle.
    fn leave_active<'c>(
        &self,
        ctx: &'c mut ContextOf<R>,
        id: TransactionId,
    ) -> Result<&'c mut PhysicalTransaction<R::Connection>> {
        let tx = ctx
            .active_mut()
            .ok_or_else(|| TransactionError::illegal_state(id, "no active transaction"))?;
        tx.depth = tx.depth.saturating_sub(1);
        Ok(tx)
    }

    fn take_owned(
        &self,
        ctx: &mut ContextOf<R>,
        id: TransactionId,
    ) -> Result<PhysicalTransaction<R::Connection>> {
        match ctx.active() {
            Some(tx) if tx.owner == id => {}
            _ => {
                return Err(TransactionError::illegal_state(
                    id,
                    "active physical transaction is not owned by this handle",
                ))
            }
        }
        let mut tx = ctx
            .unbind()
            .ok_or_else(|| TransactionError::illegal_state(id, "no active transaction"))?;
        tx.depth = 0;
        Ok(tx)
    }

    /// Closes the connection of a finished physical transaction and restores
    /// whatever the handle had suspended. The slot is released whatever the
    /// outcome; the first failure is returned.
    fn release(
        &self,
        ctx: &mut ContextOf<R>,
        handle: &mut HandleOf<R>,
        tx: PhysicalTransaction<R::Connection>,
        outcome: ResourceResult<()>,
    ) -> Result<()> {
        let closed = self.resource.close(tx.connection);
        self.resume(ctx, handle);

        match (outcome, closed) {
            (Err(e), Err(close_err)) => {
                warn!(
                    "Failed to close connection of {} after earlier failure: {}",
                    handle.id(),
                    close_err
                );
                Err(e.into())
            }
            (Err(e), Ok(())) => Err(e.into()),
            (Ok(()), Err(close_err)) => Err(close_err.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn resume(&self, ctx: &mut ContextOf<R>, handle: &mut HandleOf<R>) {
        if let Some(outer) = handle.suspended.take() {
            debug!(
                "Resuming suspended transaction {} after completion of {}",
                outer.owner,
                handle.id()
            );
            ctx.bind(outer);
        }
    }
}
