//! What a caller asks for when beginning a logical transaction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a new logical transaction relates to the physical transaction that is
/// already active in the execution context, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active transaction, or start one.
    #[default]
    Required,
    /// Always start a new physical transaction, suspending the active one.
    RequiresNew,
    /// Join the active transaction, or run without one.
    Supports,
    /// Always run without a transaction, suspending the active one.
    NotSupported,
    /// Join the active transaction; there must be one.
    Mandatory,
    /// Run without a transaction; there must not be one.
    Never,
    /// Savepoint-scoped transaction inside the active one, or a new one.
    Nested,
}

impl Propagation {
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Supports,
        Propagation::NotSupported,
        Propagation::Mandatory,
        Propagation::Never,
        Propagation::Nested,
    ];
}

impl std::fmt::Display for Propagation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Required => "REQUIRED",
            Self::RequiresNew => "REQUIRES_NEW",
            Self::Supports => "SUPPORTS",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Mandatory => "MANDATORY",
            Self::Never => "NEVER",
            Self::Nested => "NESTED",
        };
        write!(f, "{}", name)
    }
}

/// Isolation level requested for a physical transaction.
///
/// `Default` leaves the choice to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Settings that only take effect when a begin call starts a genuinely new
/// physical transaction. A handle joining an existing transaction inherits
/// whatever the owner applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionOptions {
    #[serde(default)]
    pub isolation: Isolation,
    /// Forwarded to the resource on open; `None` means the coordinator's
    /// configured default (which may itself be unbounded).
    #[serde(default, with = "timeout_millis")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// Full request passed to `begin`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub options: TransactionOptions,
    /// Shows up in log output only.
    pub name: Option<String>,
}

impl TransactionDefinition {
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn nested() -> Self {
        Self::new(Propagation::Nested)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.options.isolation = isolation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.options.read_only = read_only;
        self
    }

    /// Name for log lines: the explicit name, or the propagation mode.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.propagation.to_string(),
        }
    }
}

pub(crate) mod timeout_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
