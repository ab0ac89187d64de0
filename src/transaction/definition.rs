use crate::core::IsolationLevel;

/// How a new request relates to a transaction already bound to the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the current transaction or begin a new one
    #[default]
    Required,
    /// Join the current transaction; fail when there is none
    Mandatory,
}

/// Attributes requested when beginning a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    /// Label used in log output
    pub name: Option<String>,

    pub read_only: bool,

    /// Isolation to apply; `None` keeps the connection's current level
    pub isolation: Option<IsolationLevel>,

    pub propagation: Propagation,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self::read_write()
    }
}

impl TransactionDefinition {
    pub fn read_write() -> Self {
        Self {
            name: None,
            read_only: false,
            isolation: None,
            propagation: Propagation::Required,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::read_write()
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
