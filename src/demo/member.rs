//! Member sign-up with an audit log entry.

use log::info;
use std::sync::Arc;
use thiserror::Error;

use super::{DemoContext, Transactional};
use crate::resource::{MemoryDatabase, ResourceError, Row};
use crate::transaction::{Classify, ErrorClass, TransactionError};

pub const MEMBER_TABLE: &str = "member";
pub const LOG_TABLE: &str = "log";

/// Log messages containing this marker make `LogRepository::save` fail after
/// it has written.
pub const LOG_FAILURE_MARKER: &str = "log-error";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to save log message '{0}'")]
    LogSaveFailed(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl Classify for RepositoryError {
    fn classify(&self) -> ErrorClass {
        ErrorClass::Unrecoverable
    }
}

pub struct MemberRepository {
    db: Arc<MemoryDatabase>,
    boundary: Transactional,
}

impl MemberRepository {
    pub fn new(db: Arc<MemoryDatabase>, boundary: Transactional) -> Self {
        Self { db, boundary }
    }

    pub fn save(&self, ctx: &mut DemoContext, username: &str) -> Result<u64, RepositoryError> {
        self.boundary.run(ctx, |ctx| {
            info!("Saving member {}", username);
            Ok(self
                .db
                .insert(ctx.connection_mut(), MEMBER_TABLE, &[("username", username)])?)
        })
    }

    pub fn find(&self, username: &str) -> Option<Row> {
        self.db.find(MEMBER_TABLE, "username", username)
    }
}

pub struct LogRepository {
    db: Arc<MemoryDatabase>,
    boundary: Transactional,
}

impl LogRepository {
    pub fn new(db: Arc<MemoryDatabase>, boundary: Transactional) -> Self {
        Self { db, boundary }
    }

    pub fn save(&self, ctx: &mut DemoContext, message: &str) -> Result<u64, RepositoryError> {
        self.boundary.run(ctx, |ctx| {
            info!("Saving log message {}", message);
            let id = self
                .db
                .insert(ctx.connection_mut(), LOG_TABLE, &[("message", message)])?;
            if message.contains(LOG_FAILURE_MARKER) {
                return Err(RepositoryError::LogSaveFailed(message.to_string()));
            }
            Ok(id)
        })
    }

    pub fn find(&self, message: &str) -> Option<Row> {
        self.db.find(LOG_TABLE, "message", message)
    }
}

/// Registers a member and records the registration in the log table.
pub struct MemberService {
    members: MemberRepository,
    logs: LogRepository,
    boundary: Transactional,
}

impl MemberService {
    pub fn new(members: MemberRepository, logs: LogRepository, boundary: Transactional) -> Self {
        Self {
            members,
            logs,
            boundary,
        }
    }

    pub fn members(&self) -> &MemberRepository {
        &self.members
    }

    pub fn logs(&self) -> &LogRepository {
        &self.logs
    }

    /// Saves the member and the log entry; any failure propagates.
    pub fn join_v1(&self, ctx: &mut DemoContext, username: &str) -> Result<(), RepositoryError> {
        self.boundary.run(ctx, |ctx| {
            self.members.save(ctx, username)?;
            self.logs.save(ctx, username)?;
            Ok(())
        })
    }

    /// Like `join_v1`, but a failed log write is swallowed so the member
    /// registration can still succeed.
    pub fn join_v2(&self, ctx: &mut DemoContext, username: &str) -> Result<(), RepositoryError> {
        self.boundary.run(ctx, |ctx| {
            self.members.save(ctx, username)?;
            if let Err(e) = self.logs.save(ctx, username) {
                info!("Log save failed for {}, continuing: {}", username, e);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionCoordinator, TransactionDefinition};

    fn service(
        service_tx: bool,
        repository_tx: bool,
    ) -> (Arc<MemoryDatabase>, MemberService, DemoContext) {
        let db = Arc::new(MemoryDatabase::new());
        let coordinator = Arc::new(TransactionCoordinator::new(Arc::clone(&db)));
        let boundary = |on: bool| {
            if on {
                Transactional::new(Arc::clone(&coordinator), TransactionDefinition::required())
            } else {
                Transactional::none(Arc::clone(&coordinator))
            }
        };
        let svc = MemberService::new(
            MemberRepository::new(Arc::clone(&db), boundary(repository_tx)),
            LogRepository::new(Arc::clone(&db), boundary(repository_tx)),
            boundary(service_tx),
        );
        let ctx = coordinator.new_context();
        (db, svc, ctx)
    }

    #[test]
    fn test_join_single_transaction() {
        let (db, svc, mut ctx) = service(true, false);
        svc.join_v1(&mut ctx, "single").unwrap();

        assert!(svc.members().find("single").is_some());
        assert!(svc.logs().find("single").is_some());
        assert_eq!(db.open_count(), 1);
        assert_eq!(db.commit_count(), 1);
    }

    #[test]
    fn test_log_failure_without_outer_transaction_keeps_member() {
        let (_db, svc, mut ctx) = service(false, true);
        let name = "log-error-outer-off";

        let err = svc.join_v1(&mut ctx, name).unwrap_err();
        assert!(matches!(err, RepositoryError::LogSaveFailed(_)));
        assert!(svc.members().find(name).is_some());
        assert!(svc.logs().find(name).is_none());
    }

    #[test]
    fn test_log_failure_with_outer_transaction_discards_all() {
        let (db, svc, mut ctx) = service(true, true);
        let name = "log-error-outer-on";

        let err = svc.join_v1(&mut ctx, name).unwrap_err();
        assert!(matches!(err, RepositoryError::LogSaveFailed(_)));
        assert!(svc.members().find(name).is_none());
        assert!(svc.logs().find(name).is_none());
        assert_eq!(db.rollback_count(), 1);
    }

    #[test]
    fn test_auto_commit_without_any_transaction() {
        let (db, svc, mut ctx) = service(false, false);
        svc.join_v1(&mut ctx, "plain").unwrap();

        assert!(svc.members().find("plain").is_some());
        assert!(db.events().is_empty());
    }
}
