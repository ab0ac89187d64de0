// ============================================================================
// Data Source Transaction Manager
// ============================================================================
//
// Binds one connection per thread for the duration of a transaction.
// Nested requests on the same thread join the bound transaction; only the
// outermost status commits or rolls back the connection. A joined status
// that rolls back marks the whole transaction rollback-only.
//
// ============================================================================

use super::connection::TransactionalDataSource;
use super::{
    Propagation, TransactionDefinition, TransactionId, TransactionManager, TransactionState,
    TransactionStatus,
};
use crate::connection::{Connection, DataSource};
use crate::core::{IsolationLevel, Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Connection settings to put back once the transaction is over
struct RestoreState {
    read_only: bool,
    isolation: Option<IsolationLevel>,
}

struct ConnectionHolder {
    transaction: TransactionId,
    connection: Arc<dyn Connection>,
    rollback_only: bool,
    restore: RestoreState,
}

/// Thread-bound connections, shared with the transactional data source
#[derive(Default)]
pub(crate) struct ResourceRegistry {
    bound: Mutex<HashMap<ThreadId, ConnectionHolder>>,
}

impl ResourceRegistry {
    /// Transaction and connection currently bound to `thread`
    pub(crate) fn binding_for(
        &self,
        thread: ThreadId,
    ) -> Result<Option<(TransactionId, Arc<dyn Connection>)>> {
        let bound = self.bound.lock()?;
        Ok(bound
            .get(&thread)
            .map(|holder| (holder.transaction, Arc::clone(&holder.connection))))
    }

    fn transaction_for(&self, thread: ThreadId) -> Result<Option<TransactionId>> {
        let bound = self.bound.lock()?;
        Ok(bound.get(&thread).map(|holder| holder.transaction))
    }

    fn bind(&self, thread: ThreadId, holder: ConnectionHolder) -> Result<()> {
        let mut bound = self.bound.lock()?;
        if bound.contains_key(&thread) {
            return Err(StoreError::IllegalTransactionState(
                "a connection is already bound to this thread".into(),
            ));
        }
        bound.insert(thread, holder);
        Ok(())
    }

    fn unbind(&self, thread: ThreadId, transaction: TransactionId) -> Result<ConnectionHolder> {
        let mut bound = self.bound.lock()?;
        match bound.get(&thread) {
            Some(holder) if holder.transaction == transaction => {}
            _ => {
                return Err(StoreError::IllegalTransactionState(format!(
                    "no connection bound for transaction {}",
                    transaction
                )));
            }
        }
        bound.remove(&thread).ok_or_else(|| {
            StoreError::IllegalTransactionState(format!(
                "no connection bound for transaction {}",
                transaction
            ))
        })
    }

    fn mark_rollback_only(&self, thread: ThreadId, transaction: TransactionId) -> Result<()> {
        let mut bound = self.bound.lock()?;
        if let Some(holder) = bound.get_mut(&thread)
            && holder.transaction == transaction
        {
            holder.rollback_only = true;
        }
        Ok(())
    }
}

pub struct DataSourceTransactionManager {
    name: String,
    data_source: Arc<dyn DataSource>,
    resources: Arc<ResourceRegistry>,
}

impl DataSourceTransactionManager {
    pub fn new(name: impl Into<String>, data_source: Arc<dyn DataSource>) -> Self {
        Self {
            name: name.into(),
            data_source,
            resources: Arc::new(ResourceRegistry::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    /// Data source handing out the connection bound to the calling thread
    pub fn transactional_data_source(&self) -> Arc<TransactionalDataSource> {
        Arc::new(TransactionalDataSource::new(
            self.name.clone(),
            Arc::clone(&self.resources),
        ))
    }

    /// Whether the calling thread currently has a transaction bound
    pub fn is_transaction_active(&self) -> bool {
        matches!(
            self.resources.transaction_for(thread::current().id()),
            Ok(Some(_))
        )
    }

    fn prepare(connection: &Arc<dyn Connection>, definition: &TransactionDefinition) -> Result<RestoreState> {
        let isolation = match definition.isolation {
            Some(level) => {
                let previous = connection.isolation()?;
                if previous != level {
                    connection.set_isolation(level)?;
                    Some(previous)
                } else {
                    None
                }
            }
            None => None,
        };
        if definition.read_only {
            connection.set_read_only(true)?;
        }
        connection.set_auto_commit(false)?;

        Ok(RestoreState {
            read_only: definition.read_only,
            isolation,
        })
    }

    fn release(&self, holder: ConnectionHolder) {
        let ConnectionHolder {
            transaction,
            connection,
            restore,
            ..
        } = holder;

        if let Err(err) = connection.set_auto_commit(true) {
            warn!("Could not reset auto-commit after {}: {}", transaction, err);
        }
        if restore.read_only
            && let Err(err) = connection.set_read_only(false)
        {
            warn!("Could not reset read-only flag after {}: {}", transaction, err);
        }
        if let Some(level) = restore.isolation
            && let Err(err) = connection.set_isolation(level)
        {
            warn!("Could not reset isolation level after {}: {}", transaction, err);
        }
        if let Err(err) = connection.close() {
            warn!("Could not close connection after {}: {}", transaction, err);
        }
    }
}

impl TransactionManager for DataSourceTransactionManager {
    fn get_transaction(&self, definition: &TransactionDefinition) -> Result<TransactionStatus> {
        let thread = thread::current().id();

        if let Some(existing) = self.resources.transaction_for(thread)? {
            debug!(
                "Participating in existing transaction {} on '{}'",
                existing, self.name
            );
            return Ok(TransactionStatus::new(existing, definition, false));
        }

        if definition.propagation == Propagation::Mandatory {
            return Err(StoreError::NoTransaction(
                "no existing transaction found for transaction marked with propagation 'mandatory'"
                    .into(),
            ));
        }

        let connection = self.data_source.connection()?;
        let restore = match Self::prepare(&connection, definition) {
            Ok(restore) => restore,
            Err(err) => {
                if let Err(close_err) = connection.close() {
                    warn!("Could not close connection after failed begin: {}", close_err);
                }
                return Err(err);
            }
        };

        let status = TransactionStatus::new(TransactionId::new(), definition, true);
        self.resources.bind(
            thread,
            ConnectionHolder {
                transaction: status.id(),
                connection,
                rollback_only: false,
                restore,
            },
        )?;

        debug!(
            "Began {} transaction {} on '{}'",
            if definition.read_only { "read-only" } else { "read-write" },
            status.id(),
            self.name
        );
        Ok(status)
    }

    fn commit(&self, status: &TransactionStatus) -> Result<()> {
        status.mark_completing()?;

        if !status.is_new_transaction() {
            if status.is_rollback_only() {
                self.resources
                    .mark_rollback_only(status.thread(), status.id())?;
            }
            status.mark_completed(TransactionState::Committed);
            return Ok(());
        }

        let holder = self.resources.unbind(status.thread(), status.id())?;

        if holder.rollback_only || status.is_rollback_only() {
            debug!(
                "Transaction {} is marked rollback-only, rolling back instead of committing",
                status.id()
            );
            let result = holder.connection.rollback();
            self.release(holder);
            status.mark_completed(TransactionState::RolledBack);
            result?;
            return Err(StoreError::UnexpectedRollback);
        }

        debug!("Committing transaction {} on '{}'", status.id(), self.name);
        match holder.connection.commit() {
            Ok(()) => {
                self.release(holder);
                status.mark_completed(TransactionState::Committed);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = holder.connection.rollback() {
                    warn!(
                        "Rollback after failed commit of {} also failed: {}",
                        status.id(),
                        rollback_err
                    );
                }
                self.release(holder);
                status.mark_completed(TransactionState::RolledBack);
                Err(err)
            }
        }
    }

    fn rollback(&self, status: &TransactionStatus) -> Result<()> {
        status.mark_completing()?;

        if !status.is_new_transaction() {
            debug!(
                "Participating request failed - marking transaction {} rollback-only",
                status.id()
            );
            self.resources
                .mark_rollback_only(status.thread(), status.id())?;
            status.mark_completed(TransactionState::RolledBack);
            return Ok(());
        }

        let holder = self.resources.unbind(status.thread(), status.id())?;
        debug!("Rolling back transaction {} on '{}'", status.id(), self.name);
        let result = holder.connection.rollback();
        self.release(holder);
        status.mark_completed(TransactionState::RolledBack);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataSource;
    use crate::transaction::TransactionOperations;

    fn manager() -> (Arc<MemoryDataSource>, DataSourceTransactionManager) {
        let source = Arc::new(MemoryDataSource::new("manager"));
        let manager = DataSourceTransactionManager::new("manager", source.clone());
        (source, manager)
    }

    #[test]
    fn test_new_and_participating_status() {
        let (source, manager) = manager();

        let outer = manager
            .get_transaction(&TransactionDefinition::read_write())
            .unwrap();
        let inner = manager
            .get_transaction(&TransactionDefinition::read_only())
            .unwrap();

        assert!(outer.is_new_transaction());
        assert!(!inner.is_new_transaction());
        assert_eq!(inner.id(), outer.id());
        assert_eq!(source.stats().opened, 1);

        manager.commit(&inner).unwrap();
        assert!(manager.is_transaction_active());
        manager.commit(&outer).unwrap();
        assert!(!manager.is_transaction_active());
        assert_eq!(source.stats().active, 0);
    }

    #[test]
    fn test_double_commit_is_rejected() {
        let (_source, manager) = manager();
        let status = manager
            .get_transaction(&TransactionDefinition::read_only())
            .unwrap();

        manager.commit(&status).unwrap();
        assert!(matches!(
            manager.commit(&status),
            Err(StoreError::IllegalTransactionState(_))
        ));
        assert!(matches!(
            manager.rollback(&status),
            Err(StoreError::IllegalTransactionState(_))
        ));
    }

    #[test]
    fn test_inner_rollback_marks_outer_rollback_only() {
        let (_source, manager) = manager();
        let outer = manager
            .get_transaction(&TransactionDefinition::read_write())
            .unwrap();
        let inner = manager
            .get_transaction(&TransactionDefinition::read_write())
            .unwrap();

        manager.rollback(&inner).unwrap();
        assert!(matches!(
            manager.commit(&outer),
            Err(StoreError::UnexpectedRollback)
        ));
        assert_eq!(outer.state(), TransactionState::RolledBack);
        assert!(!manager.is_transaction_active());
    }

    #[test]
    fn test_mandatory_without_transaction() {
        let (_source, manager) = manager();
        let definition =
            TransactionDefinition::read_write().with_propagation(Propagation::Mandatory);
        assert!(matches!(
            manager.get_transaction(&definition),
            Err(StoreError::NoTransaction(_))
        ));
    }

    #[test]
    fn test_isolation_applied_and_restored() {
        let (_source, manager) = manager();
        let transactional = manager.transactional_data_source();

        let definition =
            TransactionDefinition::read_write().with_isolation(IsolationLevel::Serializable);
        let seen = manager
            .execute(&definition, |_| transactional.connection()?.isolation())
            .unwrap();
        assert_eq!(seen, IsolationLevel::Serializable);
    }

    #[test]
    fn test_execute_rolls_back_on_error() {
        let (source, manager) = manager();
        let transactional = manager.transactional_data_source();
        manager
            .execute_write(|_| {
                transactional
                    .connection()?
                    .create_statement()?
                    .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            })
            .unwrap();

        let result: Result<()> = manager.execute_write(|_| {
            transactional
                .connection()?
                .create_statement()?
                .execute_update("INSERT INTO t VALUES (1)")?;
            Err(StoreError::ExecutionError("boom".into()))
        });

        assert!(matches!(result, Err(StoreError::ExecutionError(msg)) if msg == "boom"));
        assert_eq!(source.database().row_count("t").unwrap(), 0);
        assert_eq!(source.stats().active, 0);
    }

    #[test]
    fn test_execute_rolls_back_on_panic() {
        let (source, manager) = manager();
        let manager = Arc::new(manager);

        let caught = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<()> = manager.execute_read(|_| panic!("inside transaction"));
        }));

        assert!(caught.is_err());
        assert!(!manager.is_transaction_active());
        assert_eq!(source.stats().active, 0);
    }

    use std::panic::AssertUnwindSafe;
}
