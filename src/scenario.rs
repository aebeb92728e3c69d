//! Named propagation scenarios run by the `txprop` binary.
//!
//! Each scenario gets a fresh database and coordinator, drives them the way a
//! service would, and reports the outcome together with the physical calls
//! that actually reached the database.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::demo::member::{LOG_TABLE, MEMBER_TABLE};
use crate::demo::order::{INSUFFICIENT_FUNDS_USER, ORDER_TABLE, SYSTEM_FAILURE_USER};
use crate::demo::{
    LogRepository, MemberRepository, MemberService, OrderError, OrderRepository, OrderService,
    Transactional,
};
use crate::resource::{MemoryDatabase, Row};
use crate::transaction::{
    Propagation, RollbackPolicy, TransactionCoordinator, TransactionDefinition,
    TransactionScope,
};

/// Fresh state for one scenario run.
pub struct Env {
    pub db: Arc<MemoryDatabase>,
    pub coordinator: Arc<TransactionCoordinator<MemoryDatabase>>,
}

impl Env {
    pub fn new(config: CoordinatorConfig) -> Self {
        let db = Arc::new(MemoryDatabase::new());
        let coordinator = Arc::new(TransactionCoordinator::with_config(Arc::clone(&db), config));
        Self { db, coordinator }
    }

    fn boundary(&self, definition: Option<TransactionDefinition>) -> Transactional {
        match definition {
            Some(definition) => Transactional::new(Arc::clone(&self.coordinator), definition),
            None => Transactional::none(Arc::clone(&self.coordinator)),
        }
    }

    /// Member service with the given boundaries on the service, the member
    /// repository and the log repository.
    fn member_service(
        &self,
        service: Option<TransactionDefinition>,
        members: Option<TransactionDefinition>,
        logs: Option<TransactionDefinition>,
    ) -> MemberService {
        MemberService::new(
            MemberRepository::new(Arc::clone(&self.db), self.boundary(members)),
            LogRepository::new(Arc::clone(&self.db), self.boundary(logs)),
            self.boundary(service),
        )
    }

    fn order_service(&self) -> OrderService {
        OrderService::new(
            OrderRepository::new(Arc::clone(&self.db)),
            self.boundary(Some(TransactionDefinition::required())),
        )
    }
}

pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    run: fn(&Env) -> Result<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub description: String,
    /// `None` when the scenario ran to completion without error.
    pub error: Option<String>,
    pub physical: Vec<String>,
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl Scenario {
    pub fn run(&self, config: &CoordinatorConfig) -> ScenarioReport {
        let env = Env::new(config.clone());
        let error = (self.run)(&env).err().map(|e| format!("{:#}", e));

        let tables = [MEMBER_TABLE, LOG_TABLE, ORDER_TABLE, SCRATCH_TABLE]
            .into_iter()
            .map(|t| (t.to_string(), env.db.rows(t)))
            .filter(|(_, rows)| !rows.is_empty())
            .collect();

        ScenarioReport {
            name: self.name.to_string(),
            description: self.description.to_string(),
            error,
            physical: env.db.events().iter().map(|e| e.to_string()).collect(),
            tables,
        }
    }
}

impl std::fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "== {} ==", self.name)?;
        writeln!(f, "{}", self.description)?;
        match &self.error {
            Some(e) => writeln!(f, "result: error: {}", e)?,
            None => writeln!(f, "result: ok")?,
        }
        writeln!(f, "physical calls:")?;
        if self.physical.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for call in &self.physical {
            writeln!(f, "  {}", call)?;
        }
        writeln!(f, "data:")?;
        if self.tables.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for (table, rows) in &self.tables {
            for row in rows {
                let columns: Vec<String> =
                    row.columns.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                writeln!(f, "  {}#{} {}", table, row.id, columns.join(" "))?;
            }
        }
        Ok(())
    }
}

const SCRATCH_TABLE: &str = "scratch";

pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

static SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "commit",
        description: "One REQUIRED transaction, committed.",
        run: single_commit,
    },
    Scenario {
        name: "rollback",
        description: "One REQUIRED transaction, rolled back.",
        run: single_rollback,
    },
    Scenario {
        name: "double-commit-rollback",
        description: "Two independent transactions in a row: the first commits, the second rolls back.",
        run: double_commit_rollback,
    },
    Scenario {
        name: "inner-commit",
        description: "Inner REQUIRED joins the outer; only the outer commit is physical.",
        run: inner_commit,
    },
    Scenario {
        name: "outer-rollback",
        description: "Inner REQUIRED commits, outer rolls back; the inner work is lost too.",
        run: outer_rollback,
    },
    Scenario {
        name: "inner-rollback",
        description: "Inner REQUIRED rolls back, outer commits; the outer commit fails as an unexpected rollback.",
        run: inner_rollback,
    },
    Scenario {
        name: "inner-rollback-requires-new",
        description: "Inner REQUIRES_NEW rolls back on its own connection; the outer still commits.",
        run: inner_rollback_requires_new,
    },
    Scenario {
        name: "nested-rollback",
        description: "Inner NESTED rolls back to its savepoint; the outer commits its own work.",
        run: nested_rollback,
    },
    Scenario {
        name: "read-only",
        description: "A write through a read-only transaction is refused by the database.",
        run: read_only_write,
    },
    Scenario {
        name: "order-complete",
        description: "Order paid: stored with status complete.",
        run: order_complete,
    },
    Scenario {
        name: "order-system-error",
        description: "Payment system failure (unrecoverable): the order is rolled back.",
        run: order_system_error,
    },
    Scenario {
        name: "order-insufficient-funds",
        description: "Insufficient funds (recoverable): the order is committed as pending and the error returned.",
        run: order_insufficient_funds,
    },
    Scenario {
        name: "order-rollback-for",
        description: "Insufficient funds with a policy that rolls back that error too.",
        run: order_rollback_for,
    },
    Scenario {
        name: "member-outer-off-fail",
        description: "No service transaction, one per repository; the log fails, the member stays.",
        run: member_outer_off_fail,
    },
    Scenario {
        name: "member-single-tx",
        description: "Only the service is transactional; both repositories share its connection.",
        run: member_single_tx,
    },
    Scenario {
        name: "member-outer-on-success",
        description: "Service and repositories all REQUIRED; one physical commit.",
        run: member_outer_on_success,
    },
    Scenario {
        name: "member-outer-on-fail",
        description: "Service and repositories all REQUIRED; the log fails and everything rolls back.",
        run: member_outer_on_fail,
    },
    Scenario {
        name: "member-recover-fail",
        description: "The service swallows the log failure, but the log repository already marked the transaction rollback-only.",
        run: member_recover_fail,
    },
    Scenario {
        name: "member-recover-requires-new",
        description: "The log repository runs REQUIRES_NEW; its failure is isolated and the member is committed.",
        run: member_recover_requires_new,
    },
];

fn required() -> TransactionDefinition {
    TransactionDefinition::required()
}

fn scratch(env: &Env, ctx: &mut crate::demo::DemoContext, value: &str) -> Result<()> {
    env.db
        .insert(ctx.connection_mut(), SCRATCH_TABLE, &[("value", value)])
        .context("scratch write failed")?;
    Ok(())
}

fn single_commit(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut tx = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "tx1")?;
    c.commit(&mut ctx, &mut tx)?;
    Ok(())
}

fn single_rollback(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut tx = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "tx1")?;
    c.rollback(&mut ctx, &mut tx)?;
    Ok(())
}

fn double_commit_rollback(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut tx1 = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "tx1")?;
    c.commit(&mut ctx, &mut tx1)?;

    let mut tx2 = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "tx2")?;
    c.rollback(&mut ctx, &mut tx2)?;
    Ok(())
}

fn inner_commit(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut outer = c.begin(&mut ctx, &required())?;
    let mut inner = c.begin(&mut ctx, &required())?;
    if !outer.is_new() || inner.is_new() {
        bail!("inner transaction should have joined the outer one");
    }
    scratch(env, &mut ctx, "inner")?;
    c.commit(&mut ctx, &mut inner)?;
    c.commit(&mut ctx, &mut outer)?;
    Ok(())
}

fn outer_rollback(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut outer = c.begin(&mut ctx, &required())?;
    let mut inner = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "inner")?;
    c.commit(&mut ctx, &mut inner)?;
    c.rollback(&mut ctx, &mut outer)?;
    Ok(())
}

fn inner_rollback(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut outer = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "outer")?;
    let mut inner = c.begin(&mut ctx, &required())?;
    c.rollback(&mut ctx, &mut inner)?;
    c.commit(&mut ctx, &mut outer)
        .context("outer commit after inner rollback")?;
    Ok(())
}

fn inner_rollback_requires_new(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut outer = c.begin(&mut ctx, &required())?;
    scratch(env, &mut ctx, "outer")?;
    let mut inner = c.begin(&mut ctx, &TransactionDefinition::requires_new())?;
    scratch(env, &mut ctx, "inner")?;
    c.rollback(&mut ctx, &mut inner)?;
    c.commit(&mut ctx, &mut outer)?;
    Ok(())
}

fn nested_rollback(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    let mut outer = TransactionScope::begin(&*env.coordinator, &mut ctx, &required())?;
    scratch(env, outer.context_mut(), "outer")?;
    {
        let mut nested = outer
            .nested(&TransactionDefinition::new(Propagation::Nested))
            .context("begin nested transaction")?;
        scratch(env, nested.context_mut(), "nested")?;
        nested.rollback()?;
    }
    outer.commit()?;
    Ok(())
}

fn read_only_write(env: &Env) -> Result<()> {
    let c = &env.coordinator;
    let mut ctx = c.new_context();
    let mut tx = c.begin(&mut ctx, &required().with_read_only(true))?;
    let written = scratch(env, &mut ctx, "forbidden");
    c.rollback(&mut ctx, &mut tx)?;
    written
}

fn order_complete(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.order_service().order(&mut ctx, "customer")?;
    Ok(())
}

fn order_system_error(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.order_service().order(&mut ctx, SYSTEM_FAILURE_USER)?;
    Ok(())
}

fn order_insufficient_funds(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.order_service()
        .order(&mut ctx, INSUFFICIENT_FUNDS_USER)
        .context("order returned a business error")?;
    Ok(())
}

fn order_rollback_for(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    let policy = RollbackPolicy::<OrderError>::default()
        .rollback_for(|e| matches!(e, OrderError::NotEnoughMoney(_)));
    env.order_service()
        .with_policy(policy)
        .order(&mut ctx, INSUFFICIENT_FUNDS_USER)?;
    Ok(())
}

fn member_outer_off_fail(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(None, Some(required()), Some(required()))
        .join_v1(&mut ctx, "log-error-outer-off")?;
    Ok(())
}

fn member_single_tx(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(Some(required()), None, None)
        .join_v1(&mut ctx, "single-tx")?;
    Ok(())
}

fn member_outer_on_success(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(Some(required()), Some(required()), Some(required()))
        .join_v1(&mut ctx, "outer-on")?;
    Ok(())
}

fn member_outer_on_fail(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(Some(required()), Some(required()), Some(required()))
        .join_v1(&mut ctx, "log-error-outer-on")?;
    Ok(())
}

fn member_recover_fail(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(Some(required()), Some(required()), Some(required()))
        .join_v2(&mut ctx, "log-error-recover")?;
    Ok(())
}

fn member_recover_requires_new(env: &Env) -> Result<()> {
    let mut ctx = env.coordinator.new_context();
    env.member_service(
        Some(required()),
        Some(required()),
        Some(TransactionDefinition::requires_new()),
    )
    .join_v2(&mut ctx, "log-error-recover-requires-new")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_unique() {
        let mut names: Vec<_> = all().iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all().len());
    }

    #[test]
    fn test_find() {
        assert!(find("inner-rollback").is_some());
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn test_report_display() {
        let report = find("commit").unwrap().run(&CoordinatorConfig::default());
        let text = report.to_string();
        assert!(text.contains("result: ok"));
        assert!(text.contains("conn0: commit"));
        assert!(text.contains("scratch#1 value=tx1"));
    }
}
