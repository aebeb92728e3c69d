//! Coordinator configuration.
//!
//! Loadable from a JSON file; every field is optional and falls back to the
//! default below.
//!
//! ```json
//! {
//!   "nested_transaction_allowed": true,
//!   "global_rollback_on_participation_failure": true,
//!   "fail_early_on_global_rollback_only": false,
//!   "validate_existing_transaction": false,
//!   "default_timeout": 30000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::transaction::definition::timeout_millis;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid default timeout: {0:?}")]
    InvalidTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Allow NESTED inside an active transaction (needs savepoint support).
    pub nested_transaction_allowed: bool,
    /// A rolled-back participant marks the whole physical transaction
    /// rollback-only. When off, the participant's rollback is a no-op and the
    /// owner decides alone.
    pub global_rollback_on_participation_failure: bool,
    /// A participant committing into a rollback-only transaction fails with
    /// `UnexpectedRollback` right away instead of leaving it to the owner.
    pub fail_early_on_global_rollback_only: bool,
    /// Reject joins whose isolation or read-only setting contradicts the
    /// active transaction.
    pub validate_existing_transaction: bool,
    /// Timeout forwarded to the resource when a definition carries none.
    #[serde(with = "timeout_millis")]
    pub default_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            nested_transaction_allowed: true,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            validate_existing_transaction: false,
            default_timeout: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.default_timeout {
            Some(timeout) if timeout.is_zero() => Err(ConfigError::InvalidTimeout(timeout)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert!(config.nested_transaction_allowed);
        assert!(config.global_rollback_on_participation_failure);
        assert!(!config.fail_early_on_global_rollback_only);
        assert!(!config.validate_existing_transaction);
        assert_eq!(config.default_timeout, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CoordinatorConfig::from_json(r#"{"nested_transaction_allowed": false, "default_timeout": 250}"#)
                .unwrap();
        assert!(!config.nested_transaction_allowed);
        assert!(config.global_rollback_on_participation_failure);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = CoordinatorConfig::from_json(r#"{"default_timeout": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"fail_early_on_global_rollback_only": true}}"#).unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert!(config.fail_early_on_global_rollback_only);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            CoordinatorConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
