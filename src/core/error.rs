use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No transaction: {0}")]
    NoTransaction(String),

    #[error("Illegal transaction state: {0}")]
    IllegalTransactionState(String),

    #[error("Transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection is read-only: {0}")]
    ReadOnly(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Lock error: {0}")]
    LockError(String),

    /// A transactional callback failed with an error outside this crate's taxonomy.
    #[error("Transaction callback threw undeclared error: {0}")]
    UndeclaredThrowable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl StoreError {
    /// Wraps an arbitrary callback failure, keeping it as the source.
    pub fn undeclared(err: anyhow::Error) -> Self {
        Self::UndeclaredThrowable(err.into())
    }
}
