// ============================================================================
// Transaction Management Module
// ============================================================================
//
// The externally managed side of the bridge: a manager that owns
// transaction boundaries and binds one connection per thread, plus the
// callback helpers everything else uses to run work inside a transaction.
//
// ============================================================================

pub mod connection;
pub mod definition;
pub mod manager;
pub mod status;

pub use connection::{TransactionalConnection, TransactionalDataSource};
pub use definition::{Propagation, TransactionDefinition};
pub use manager::DataSourceTransactionManager;
pub use status::{TransactionId, TransactionState, TransactionStatus};

use crate::core::Result;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Begin, commit and roll back transactions
///
/// A status returned by `get_transaction` must be handed to exactly one of
/// `commit` or `rollback`.
pub trait TransactionManager: Send + Sync {
    fn get_transaction(&self, definition: &TransactionDefinition) -> Result<TransactionStatus>;

    fn commit(&self, status: &TransactionStatus) -> Result<()>;

    fn rollback(&self, status: &TransactionStatus) -> Result<()>;
}

/// Run a unit of work inside a transaction
///
/// The transaction commits when the callback returns `Ok`, and rolls back
/// once when it returns `Err` or panics. The callback's error is returned
/// unchanged and a panic resumes after the rollback.
pub trait TransactionOperations {
    fn execute<R, F>(&self, definition: &TransactionDefinition, callback: F) -> Result<R>
    where
        F: FnOnce(&TransactionStatus) -> Result<R>;

    fn execute_read<R, F>(&self, callback: F) -> Result<R>
    where
        F: FnOnce(&TransactionStatus) -> Result<R>,
    {
        self.execute(&TransactionDefinition::read_only(), callback)
    }

    fn execute_write<R, F>(&self, callback: F) -> Result<R>
    where
        F: FnOnce(&TransactionStatus) -> Result<R>,
    {
        self.execute(&TransactionDefinition::read_write(), callback)
    }
}

impl<M: TransactionManager + ?Sized> TransactionOperations for M {
    fn execute<R, F>(&self, definition: &TransactionDefinition, callback: F) -> Result<R>
    where
        F: FnOnce(&TransactionStatus) -> Result<R>,
    {
        let status = self.get_transaction(definition)?;

        match panic::catch_unwind(AssertUnwindSafe(|| callback(&status))) {
            Ok(Ok(value)) => {
                self.commit(&status)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                rollback_on_failure(self, &status, &err.to_string());
                Err(err)
            }
            Err(payload) => {
                rollback_on_failure(self, &status, "callback panicked");
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Single rollback attempt after a failed callback; never masks the failure
pub(crate) fn rollback_on_failure<M: TransactionManager + ?Sized>(
    manager: &M,
    status: &TransactionStatus,
    cause: &str,
) {
    debug!(
        "Initiating rollback of {} on application failure: {}",
        status.id(),
        cause
    );
    if let Err(err) = manager.rollback(status) {
        warn!(
            "Application failure in {} overridden by rollback failure: {}",
            status.id(),
            err
        );
    }
}
