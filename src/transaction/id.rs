//! Logical transaction identifiers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one logical transaction, i.e. one begin/complete pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Hands out unique ids to every handle a coordinator creates, across all
/// execution contexts sharing that coordinator.
#[derive(Debug)]
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a generator whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the most recently issued id (0 if none was issued yet).
    pub fn current(&self) -> TransactionId {
        let id = self.next_id.load(Ordering::Relaxed);
        TransactionId::new(id.saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_display() {
        assert_eq!(TransactionId::new(7).to_string(), "tx-7");
    }

    #[test]
    fn test_generator_sequence() {
        let generator = TransactionIdGenerator::new();
        assert_eq!(generator.current().value(), 0);

        assert_eq!(generator.next().value(), 1);
        assert_eq!(generator.next().value(), 2);
        assert_eq!(generator.current().value(), 2);
    }

    #[test]
    fn test_generator_unique_across_threads() {
        use std::sync::Arc;
        use std::thread;

        let generator = Arc::new(TransactionIdGenerator::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gen = Arc::clone(&generator);
                thread::spawn(move || (0..250).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<_> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 2000);
    }
}
