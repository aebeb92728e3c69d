//! Order placement with a payment step.
//!
//! - Payment succeeds: the order is stored with status `complete`.
//! - A system failure: nothing is stored.
//! - Insufficient funds: a business outcome, not a failure of the system.
//!   The order is stored with status `pending` and the caller receives
//!   `OrderError::NotEnoughMoney` so it can ask the customer to pay another
//!   way.

use log::info;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::{DemoContext, Transactional};
use crate::resource::{MemoryDatabase, ResourceError, Row};
use crate::transaction::{Classify, ErrorClass, RollbackPolicy, TransactionError};

pub const ORDER_TABLE: &str = "orders";

/// Usernames that trigger the two failure paths.
pub const SYSTEM_FAILURE_USER: &str = "system-error";
pub const INSUFFICIENT_FUNDS_USER: &str = "insufficient-funds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayStatus {
    Pending,
    Complete,
}

impl PayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
        }
    }
}

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Not enough money: {0}")]
    NotEnoughMoney(String),

    #[error("System failure during payment: {0}")]
    System(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl Classify for OrderError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::NotEnoughMoney(_) => ErrorClass::Recoverable,
            _ => ErrorClass::Unrecoverable,
        }
    }
}

pub struct OrderRepository {
    db: Arc<MemoryDatabase>,
}

impl OrderRepository {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }

    pub fn save(&self, ctx: &mut DemoContext, username: &str) -> Result<u64, OrderError> {
        Ok(self
            .db
            .insert(ctx.connection_mut(), ORDER_TABLE, &[("username", username)])?)
    }

    pub fn set_pay_status(
        &self,
        ctx: &mut DemoContext,
        id: u64,
        status: PayStatus,
    ) -> Result<(), OrderError> {
        Ok(self
            .db
            .update(ctx.connection_mut(), ORDER_TABLE, id, "pay_status", status.as_str())?)
    }

    pub fn find_by_username(&self, username: &str) -> Option<Row> {
        self.db.find(ORDER_TABLE, "username", username)
    }
}

pub struct OrderService {
    repository: OrderRepository,
    boundary: Transactional,
    policy: RollbackPolicy<OrderError>,
}

impl OrderService {
    pub fn new(repository: OrderRepository, boundary: Transactional) -> Self {
        Self {
            repository,
            boundary,
            policy: RollbackPolicy::default(),
        }
    }

    /// Replaces the default policy (recoverable errors commit).
    pub fn with_policy(mut self, policy: RollbackPolicy<OrderError>) -> Self {
        self.policy = policy;
        self
    }

    pub fn repository(&self) -> &OrderRepository {
        &self.repository
    }

    pub fn order(&self, ctx: &mut DemoContext, username: &str) -> Result<u64, OrderError> {
        self.boundary.run_with(ctx, &self.policy, |ctx| {
            info!("Placing order for {}", username);
            let id = self.repository.save(ctx, username)?;

            match username {
                SYSTEM_FAILURE_USER => {
                    info!("Payment system failure");
                    Err(OrderError::System("payment gateway unavailable".into()))
                }
                INSUFFICIENT_FUNDS_USER => {
                    info!("Insufficient funds, order left pending");
                    self.repository.set_pay_status(ctx, id, PayStatus::Pending)?;
                    Err(OrderError::NotEnoughMoney(
                        "balance too low, pay by bank transfer".into(),
                    ))
                }
                _ => {
                    info!("Payment approved");
                    self.repository.set_pay_status(ctx, id, PayStatus::Complete)?;
                    Ok(id)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionCoordinator, TransactionDefinition};

    fn service() -> (Arc<MemoryDatabase>, OrderService, DemoContext) {
        let db = Arc::new(MemoryDatabase::new());
        let coordinator = Arc::new(TransactionCoordinator::new(Arc::clone(&db)));
        let svc = OrderService::new(
            OrderRepository::new(Arc::clone(&db)),
            Transactional::new(Arc::clone(&coordinator), TransactionDefinition::required()),
        );
        let ctx = coordinator.new_context();
        (db, svc, ctx)
    }

    #[test]
    fn test_order_complete() {
        let (_db, svc, mut ctx) = service();
        svc.order(&mut ctx, "customer").unwrap();

        let row = svc.repository().find_by_username("customer").unwrap();
        assert_eq!(row.get("pay_status"), Some("complete"));
    }

    #[test]
    fn test_order_system_failure_rolls_back() {
        let (db, svc, mut ctx) = service();
        let err = svc.order(&mut ctx, SYSTEM_FAILURE_USER).unwrap_err();

        assert!(matches!(err, OrderError::System(_)));
        assert!(svc.repository().find_by_username(SYSTEM_FAILURE_USER).is_none());
        assert_eq!(db.rollback_count(), 1);
    }

    #[test]
    fn test_order_insufficient_funds_commits_pending() {
        let (db, svc, mut ctx) = service();
        let err = svc.order(&mut ctx, INSUFFICIENT_FUNDS_USER).unwrap_err();

        assert!(matches!(err, OrderError::NotEnoughMoney(_)));
        let row = svc
            .repository()
            .find_by_username(INSUFFICIENT_FUNDS_USER)
            .unwrap();
        assert_eq!(row.get("pay_status"), Some("pending"));
        assert_eq!(db.commit_count(), 1);
    }

    #[test]
    fn test_order_rollback_for_business_error() {
        let (_db, svc, mut ctx) = service();
        let svc = svc.with_policy(
            RollbackPolicy::<OrderError>::default()
                .rollback_for(|e| matches!(e, OrderError::NotEnoughMoney(_))),
        );

        assert!(svc.order(&mut ctx, INSUFFICIENT_FUNDS_USER).is_err());
        assert!(svc
            .repository()
            .find_by_username(INSUFFICIENT_FUNDS_USER)
            .is_none());
    }
}
