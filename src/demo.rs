//! Demo services built on the coordinator.
//!
//! A member sign-up that also writes an audit log, and an order flow whose
//! payment step can fail in a recoverable or unrecoverable way. Each service
//! and repository can be placed inside or outside a transaction boundary to
//! show how propagation decides the final outcome.

pub mod member;
pub mod order;

use std::sync::Arc;

pub use member::{LogRepository, MemberService, MemberRepository, RepositoryError};
pub use order::{OrderError, OrderRepository, OrderService, PayStatus};

use crate::resource::MemoryDatabase;
use crate::transaction::{
    Classify, ContextOf, RollbackPolicy, TransactionCoordinator, TransactionDefinition,
    TransactionError, TransactionTemplate,
};

/// Execution context type used by the demo services.
pub type DemoContext = ContextOf<MemoryDatabase>;

/// A transaction boundary around a service or repository method: either a
/// definition to run the method under, or nothing at all.
#[derive(Clone)]
pub struct Transactional {
    coordinator: Arc<TransactionCoordinator<MemoryDatabase>>,
    definition: Option<TransactionDefinition>,
}

impl Transactional {
    pub fn new(
        coordinator: Arc<TransactionCoordinator<MemoryDatabase>>,
        definition: TransactionDefinition,
    ) -> Self {
        Self {
            coordinator,
            definition: Some(definition),
        }
    }

    /// No boundary; the method runs in whatever the caller provides.
    pub fn none(coordinator: Arc<TransactionCoordinator<MemoryDatabase>>) -> Self {
        Self {
            coordinator,
            definition: None,
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.definition.is_some()
    }

    pub fn run<T, E>(
        &self,
        ctx: &mut DemoContext,
        work: impl FnOnce(&mut DemoContext) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: Classify + From<TransactionError> + std::fmt::Display + 'static,
    {
        self.run_with(ctx, &RollbackPolicy::default(), work)
    }

    pub fn run_with<T, E>(
        &self,
        ctx: &mut DemoContext,
        policy: &RollbackPolicy<E>,
        work: impl FnOnce(&mut DemoContext) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<TransactionError> + std::fmt::Display,
    {
        match &self.definition {
            Some(definition) => TransactionTemplate::new(&*self.coordinator, definition.clone())
                .execute_with(ctx, policy, |scope| work(scope.context_mut())),
            None => work(ctx),
        }
    }
}

impl std::fmt::Debug for Transactional {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactional")
            .field("definition", &self.definition)
            .finish()
    }
}
