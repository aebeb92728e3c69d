//! Run a closure inside a transaction and complete it according to a
//! rollback policy.
//!
//! This is the explicit counterpart of declarative, interceptor-driven
//! transaction demarcation: begin before the work, commit when it succeeds,
//! and let the policy decide when it fails.

use log::{debug, error};

use super::definition::TransactionDefinition;
use super::error::TransactionError;
use super::manager::{ContextOf, TransactionCoordinator};
use super::policy::{Classify, Outcome, RollbackPolicy};
use super::scope::TransactionScope;
use crate::resource::Resource;

pub struct TransactionTemplate<'c, R: Resource> {
    coordinator: &'c TransactionCoordinator<R>,
    definition: TransactionDefinition,
}

impl<'c, R: Resource> TransactionTemplate<'c, R> {
    pub fn new(coordinator: &'c TransactionCoordinator<R>, definition: TransactionDefinition) -> Self {
        Self {
            coordinator,
            definition,
        }
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    /// Runs `work` with the default policy of its error type.
    pub fn execute<T, E, F>(&self, ctx: &mut ContextOf<R>, work: F) -> Result<T, E>
    where
        E: Classify + From<TransactionError> + std::fmt::Display + 'static,
        F: FnOnce(&mut TransactionScope<'_, R>) -> Result<T, E>,
    {
        self.execute_with(ctx, &RollbackPolicy::default(), work)
    }

    /// Runs `work` in a transaction begun from this template's definition.
    ///
    /// `Ok` commits. `Err` rolls back or commits as `policy` decides and then
    /// returns the error. If completing the transaction fails, that failure
    /// is returned instead and the work's error is logged.
    pub fn execute_with<T, E, F>(
        &self,
        ctx: &mut ContextOf<R>,
        policy: &RollbackPolicy<E>,
        work: F,
    ) -> Result<T, E>
    where
        E: From<TransactionError> + std::fmt::Display,
        F: FnOnce(&mut TransactionScope<'_, R>) -> Result<T, E>,
    {
        let mut scope = TransactionScope::begin(self.coordinator, ctx, &self.definition)?;

        match work(&mut scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                let id = scope.handle().id();
                let completion = match policy.decide(&err) {
                    Outcome::Rollback => {
                        debug!("Rolling back {} after error: {}", id, err);
                        scope.rollback()
                    }
                    Outcome::Commit => {
                        debug!("Committing {} despite error: {}", id, err);
                        scope.commit()
                    }
                };
                if let Err(completion_err) = completion {
                    error!(
                        "Error of {} overridden by completion failure {}: {}",
                        id, completion_err, err
                    );
                    return Err(completion_err.into());
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryDatabase;
    use crate::transaction::policy::ErrorClass;
    use std::sync::Arc;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum WorkError {
        #[error("business rule violated")]
        Business,
        #[error("system failure")]
        System,
        #[error(transparent)]
        Transaction(#[from] TransactionError),
    }

    impl Classify for WorkError {
        fn classify(&self) -> ErrorClass {
            match self {
                Self::Business => ErrorClass::Recoverable,
                _ => ErrorClass::Unrecoverable,
            }
        }
    }

    fn setup() -> (Arc<MemoryDatabase>, TransactionCoordinator<MemoryDatabase>) {
        let db = Arc::new(MemoryDatabase::new());
        (Arc::clone(&db), TransactionCoordinator::new(db))
    }

    fn write(
        db: &MemoryDatabase,
        scope: &mut TransactionScope<'_, MemoryDatabase>,
    ) -> Result<(), WorkError> {
        db.insert(scope.connection_mut(), "t", &[("k", "v")])
            .map_err(|e| WorkError::Transaction(e.into()))?;
        Ok(())
    }

    #[test]
    fn test_success_commits() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        let template = TransactionTemplate::new(&coordinator, TransactionDefinition::required());

        let value = template
            .execute(&mut ctx, |scope| {
                write(&db, scope)?;
                Ok::<_, WorkError>(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(db.rows("t").len(), 1);
        assert_eq!(db.commit_count(), 1);
    }

    #[test]
    fn test_unrecoverable_error_rolls_back() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        let template = TransactionTemplate::new(&coordinator, TransactionDefinition::required());

        let err = template
            .execute(&mut ctx, |scope| -> Result<(), WorkError> {
                write(&db, scope)?;
                Err(WorkError::System)
            })
            .unwrap_err();

        assert!(matches!(err, WorkError::System));
        assert!(db.rows("t").is_empty());
        assert_eq!(db.rollback_count(), 1);
    }

    #[test]
    fn test_recoverable_error_commits() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        let template = TransactionTemplate::new(&coordinator, TransactionDefinition::required());

        let err = template
            .execute(&mut ctx, |scope| -> Result<(), WorkError> {
                write(&db, scope)?;
                Err(WorkError::Business)
            })
            .unwrap_err();

        assert!(matches!(err, WorkError::Business));
        assert_eq!(db.rows("t").len(), 1);
    }

    #[test]
    fn test_policy_override() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        let template = TransactionTemplate::new(&coordinator, TransactionDefinition::required());
        let policy =
            RollbackPolicy::<WorkError>::default().rollback_for(|e| matches!(e, WorkError::Business));

        let err = template
            .execute_with(&mut ctx, &policy, |scope| -> Result<(), WorkError> {
                write(&db, scope)?;
                Err(WorkError::Business)
            })
            .unwrap_err();

        assert!(matches!(err, WorkError::Business));
        assert!(db.rows("t").is_empty());
    }

    #[test]
    fn test_commit_after_inner_failure_is_unexpected_rollback() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        let outer_template =
            TransactionTemplate::new(&coordinator, TransactionDefinition::required());
        let inner_template =
            TransactionTemplate::new(&coordinator, TransactionDefinition::required());

        let err = outer_template
            .execute(&mut ctx, |scope| -> Result<(), WorkError> {
                let inner = inner_template.execute(scope.context_mut(), |_| -> Result<(), WorkError> {
                    Err(WorkError::System)
                });
                assert!(matches!(inner, Err(WorkError::System)));
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            WorkError::Transaction(TransactionError::UnexpectedRollback { .. })
        ));
        assert_eq!(db.rollback_count(), 1);
    }

    #[test]
    fn test_begin_failure_is_converted() {
        let (db, coordinator) = setup();
        let mut ctx = coordinator.new_context();
        db.fail_next_open();
        let template = TransactionTemplate::new(&coordinator, TransactionDefinition::required());

        let err = template
            .execute(&mut ctx, |_| Ok::<_, WorkError>(()))
            .unwrap_err();
        assert!(matches!(err, WorkError::Transaction(TransactionError::Resource(_))));
    }
}
