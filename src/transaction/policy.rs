//! Commit/rollback decisions for failed transactional work.
//!
//! The coordinator executes whatever the caller asks for. Deciding whether a
//! failure should roll the work back is the caller's business, expressed as a
//! classification function over the caller's own error type.

use super::error::TransactionError;
use crate::resource::ResourceError;

/// What to do with a transaction whose work returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// Broad class of an application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// An expected business condition; the work done so far stays valid.
    Recoverable,
    /// A system failure; the work done so far must not persist.
    Unrecoverable,
}

/// Errors that know their own class.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

impl Classify for TransactionError {
    fn classify(&self) -> ErrorClass {
        ErrorClass::Unrecoverable
    }
}

impl Classify for ResourceError {
    fn classify(&self) -> ErrorClass {
        ErrorClass::Unrecoverable
    }
}

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Maps an error to an `Outcome`.
///
/// Override rules are checked newest first; the first match decides. Errors
/// no rule matches fall through to the base classification.
pub struct RollbackPolicy<E> {
    base: Box<dyn Fn(&E) -> Outcome + Send + Sync>,
    rules: Vec<(Predicate<E>, Outcome)>,
}

impl<E> RollbackPolicy<E> {
    /// Uses `classify` for every error not matched by a later rule.
    pub fn from_fn(classify: impl Fn(&E) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            base: Box::new(classify),
            rules: Vec::new(),
        }
    }

    pub fn rollback_on_any() -> Self {
        Self::from_fn(|_| Outcome::Rollback)
    }

    /// Roll back for errors matching `pred`, even recoverable ones.
    pub fn rollback_for(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.rules.push((Box::new(pred), Outcome::Rollback));
        self
    }

    /// Commit for errors matching `pred`, even unrecoverable ones.
    pub fn no_rollback_for(mut self, pred: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.rules.push((Box::new(pred), Outcome::Commit));
        self
    }

    pub fn decide(&self, error: &E) -> Outcome {
        self.rules
            .iter()
            .rev()
            .find(|(pred, _)| pred(error))
            .map(|(_, outcome)| *outcome)
            .unwrap_or_else(|| (self.base)(error))
    }
}

impl<E: Classify + 'static> RollbackPolicy<E> {
    /// Unrecoverable errors roll back, recoverable ones commit.
    pub fn by_class() -> Self {
        Self::from_fn(|error: &E| match error.classify() {
            ErrorClass::Recoverable => Outcome::Commit,
            ErrorClass::Unrecoverable => Outcome::Rollback,
        })
    }
}

impl<E: Classify + 'static> Default for RollbackPolicy<E> {
    fn default() -> Self {
        Self::by_class()
    }
}

impl<E> std::fmt::Debug for RollbackPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackPolicy")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum PaymentError {
        InsufficientFunds,
        CardDeclined,
        GatewayDown,
    }

    impl Classify for PaymentError {
        fn classify(&self) -> ErrorClass {
            match self {
                Self::InsufficientFunds | Self::CardDeclined => ErrorClass::Recoverable,
                Self::GatewayDown => ErrorClass::Unrecoverable,
            }
        }
    }

    #[test]
    fn test_default_by_class() {
        let policy = RollbackPolicy::<PaymentError>::default();
        assert_eq!(policy.decide(&PaymentError::InsufficientFunds), Outcome::Commit);
        assert_eq!(policy.decide(&PaymentError::GatewayDown), Outcome::Rollback);
    }

    #[test]
    fn test_rollback_for_overrides_class() {
        let policy = RollbackPolicy::<PaymentError>::default()
            .rollback_for(|e| matches!(e, PaymentError::InsufficientFunds));

        assert_eq!(policy.decide(&PaymentError::InsufficientFunds), Outcome::Rollback);
        assert_eq!(policy.decide(&PaymentError::CardDeclined), Outcome::Commit);
    }

    #[test]
    fn test_newest_rule_wins() {
        let policy = RollbackPolicy::<PaymentError>::default()
            .no_rollback_for(|e| matches!(e, PaymentError::GatewayDown))
            .rollback_for(|_| true);

        assert_eq!(policy.decide(&PaymentError::GatewayDown), Outcome::Rollback);

        let policy = RollbackPolicy::<PaymentError>::default()
            .rollback_for(|_| true)
            .no_rollback_for(|e| matches!(e, PaymentError::GatewayDown));

        assert_eq!(policy.decide(&PaymentError::GatewayDown), Outcome::Commit);
        assert_eq!(policy.decide(&PaymentError::CardDeclined), Outcome::Rollback);
    }

    #[test]
    fn test_from_fn() {
        let policy = RollbackPolicy::<String>::from_fn(|msg| {
            if msg.starts_with("retry") {
                Outcome::Commit
            } else {
                Outcome::Rollback
            }
        });
        assert_eq!(policy.decide(&"retry later".to_string()), Outcome::Commit);
        assert_eq!(policy.decide(&"fatal".to_string()), Outcome::Rollback);
        assert_eq!(
            RollbackPolicy::<String>::rollback_on_any().decide(&"retry".to_string()),
            Outcome::Rollback
        );
    }

    #[test]
    fn test_coordinator_errors_roll_back() {
        let policy = RollbackPolicy::<TransactionError>::default();
        assert_eq!(policy.decide(&TransactionError::NoTransaction), Outcome::Rollback);
    }
}
