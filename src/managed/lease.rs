use crate::core::{Result, StoreError};
use crate::transaction::{TransactionDefinition, TransactionManager, TransactionStatus, rollback_on_failure};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// A transaction begun in one call and completed in a later one
///
/// The lease is the only path that completes its transaction: `commit` or
/// `rollback` finish it once and later calls do nothing. Dropping an open
/// lease commits it (rolls it back while unwinding) and logs a warning,
/// because the owner was expected to close it explicitly.
pub struct TransactionLease {
    manager: Arc<dyn TransactionManager>,
    status: Option<TransactionStatus>,
}

impl TransactionLease {
    pub fn new(manager: Arc<dyn TransactionManager>, status: TransactionStatus) -> Self {
        Self {
            manager,
            status: Some(status),
        }
    }

    pub fn status(&self) -> Option<&TransactionStatus> {
        self.status.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.status.is_some()
    }

    pub fn commit(&mut self) -> Result<()> {
        match self.status.take() {
            Some(status) => {
                debug!("Lease committing {}", status.id());
                self.manager.commit(&status)
            }
            None => Ok(()),
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        match self.status.take() {
            Some(status) => {
                debug!("Lease rolling back {}", status.id());
                self.manager.rollback(&status)
            }
            None => Ok(()),
        }
    }
}

impl Drop for TransactionLease {
    fn drop(&mut self) {
        let Some(status) = self.status.take() else {
            return;
        };
        if thread::panicking() {
            if let Err(err) = self.manager.rollback(&status) {
                warn!("Rollback of {} during unwinding failed: {}", status.id(), err);
            }
            return;
        }
        warn!("Transaction {} was never closed; committing on drop", status.id());
        if let Err(err) = self.manager.commit(&status) {
            warn!("Commit of dropped lease {} failed: {}", status.id(), err);
        }
    }
}

/// Begin a read-only transaction and run `operation` in it, leaving it open
///
/// On success the transaction stays open; `operation` is expected to move the
/// status into a [`TransactionLease`] held by whatever it returns. On failure
/// the transaction is rolled back once: crate errors are returned unchanged,
/// any other error becomes [`StoreError::UndeclaredThrowable`] with the
/// original as its source, and a panic resumes after the rollback.
pub fn read_only_operation<Z, F>(manager: &Arc<dyn TransactionManager>, operation: F) -> Result<Z>
where
    F: FnOnce(&TransactionStatus) -> anyhow::Result<Z>,
{
    let status = manager.get_transaction(&TransactionDefinition::read_only())?;

    match panic::catch_unwind(AssertUnwindSafe(|| operation(&status))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            rollback_on_failure(manager.as_ref(), &status, &err.to_string());
            match err.downcast::<StoreError>() {
                Ok(store_error) => Err(store_error),
                Err(other) => Err(StoreError::undeclared(other)),
            }
        }
        Err(payload) => {
            rollback_on_failure(manager.as_ref(), &status, "operation panicked");
            panic::resume_unwind(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataSource;
    use crate::transaction::{DataSourceTransactionManager, TransactionState};

    fn manager() -> (Arc<DataSourceTransactionManager>, Arc<dyn TransactionManager>) {
        let concrete = Arc::new(DataSourceTransactionManager::new(
            "lease",
            Arc::new(MemoryDataSource::new("lease")),
        ));
        let shared: Arc<dyn TransactionManager> = concrete.clone();
        (concrete, shared)
    }

    #[test]
    fn test_operation_success_leaves_transaction_open() {
        let (concrete, manager) = manager();

        let mut lease = read_only_operation(&manager, |status| {
            Ok(TransactionLease::new(Arc::clone(&manager), status.clone()))
        })
        .unwrap();

        assert!(concrete.is_transaction_active());
        lease.commit().unwrap();
        lease.commit().unwrap();
        assert!(!concrete.is_transaction_active());
    }

    #[test]
    fn test_store_error_returned_unchanged() {
        let (concrete, manager) = manager();

        let result: Result<()> = read_only_operation(&manager, |_| {
            Err(StoreError::NoSuchElement("nothing".into()).into())
        });

        assert!(matches!(result, Err(StoreError::NoSuchElement(_))));
        assert!(!concrete.is_transaction_active());
    }

    #[test]
    fn test_foreign_error_wrapped_as_undeclared() {
        let (concrete, manager) = manager();

        let result: Result<()> =
            read_only_operation(&manager, |_| Err(anyhow::anyhow!("checked failure")));

        let Err(StoreError::UndeclaredThrowable(source)) = result else {
            panic!("expected undeclared throwable");
        };
        assert_eq!(source.to_string(), "checked failure");
        assert!(!concrete.is_transaction_active());
    }

    #[test]
    fn test_panic_rolls_back_and_resumes() {
        let (concrete, manager) = manager();

        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<()> = read_only_operation(&manager, |_| panic!("fatal"));
        }));

        assert!(caught.is_err());
        assert!(!concrete.is_transaction_active());
    }

    #[test]
    fn test_dropped_lease_commits() {
        let (concrete, manager) = manager();
        let status = manager
            .get_transaction(&TransactionDefinition::read_only())
            .unwrap();

        drop(TransactionLease::new(Arc::clone(&manager), status.clone()));

        assert_eq!(status.state(), TransactionState::Committed);
        assert!(!concrete.is_transaction_active());
    }
}
