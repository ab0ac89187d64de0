// ============================================================================
// Transaction-Bound Connection Proxy
// ============================================================================
//
// Hands out the connection bound to the calling thread by the transaction
// manager. Each proxy is pinned to the transaction it was obtained in and
// reports a closed connection once that transaction completes. The proxy is
// a thin forwarder: statements it creates come straight from the bound
// driver connection and report that connection, not the proxy.
//
// ============================================================================

use super::manager::ResourceRegistry;
use super::status::TransactionId;
use crate::connection::{Array, CallableStatement, Connection, DataSource, PreparedStatement, Statement};
use crate::core::{IsolationLevel, Result, StoreError, Value};
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub struct TransactionalDataSource {
    name: String,
    resources: Arc<ResourceRegistry>,
}

impl TransactionalDataSource {
    pub(crate) fn new(name: String, resources: Arc<ResourceRegistry>) -> Self {
        Self { name, resources }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl DataSource for TransactionalDataSource {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        let thread = thread::current().id();
        let Some((transaction, _)) = self.resources.binding_for(thread)? else {
            return Err(StoreError::NoTransaction(format!(
                "no transaction bound to the current thread for '{}'",
                self.name
            )));
        };

        Ok(Arc::new(TransactionalConnection {
            name: self.name.clone(),
            resources: Arc::clone(&self.resources),
            thread,
            transaction,
        }))
    }
}

/// Proxy for the connection of one transaction on one thread
pub struct TransactionalConnection {
    name: String,
    resources: Arc<ResourceRegistry>,
    thread: ThreadId,
    transaction: TransactionId,
}

impl TransactionalConnection {
    fn target(&self) -> Result<Arc<dyn Connection>> {
        match self.resources.binding_for(self.thread)? {
            Some((bound, connection)) if bound == self.transaction => Ok(connection),
            _ => Err(StoreError::ConnectionClosed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }
}

impl Connection for TransactionalConnection {
    fn create_statement(&self) -> Result<Arc<dyn Statement>> {
        self.target()?.create_statement()
    }

    fn prepare_statement(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>> {
        self.target()?.prepare_statement(sql)
    }

    fn prepare_call(&self, sql: &str) -> Result<Arc<dyn CallableStatement>> {
        self.target()?.prepare_call(sql)
    }

    fn create_array_of(&self, type_name: &str, elements: Vec<Value>) -> Result<Arc<dyn Array>> {
        self.target()?.create_array_of(type_name, elements)
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.target()?.set_auto_commit(auto_commit)
    }

    fn auto_commit(&self) -> Result<bool> {
        self.target()?.auto_commit()
    }

    fn commit(&self) -> Result<()> {
        self.target()?.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.target()?.rollback()
    }

    fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.target()?.set_read_only(read_only)
    }

    fn is_read_only(&self) -> Result<bool> {
        self.target()?.is_read_only()
    }

    fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.target()?.set_isolation(level)
    }

    fn isolation(&self) -> Result<IsolationLevel> {
        self.target()?.isolation()
    }

    /// Released by the transaction manager on completion
    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        match self.target() {
            Ok(connection) => connection.is_closed(),
            Err(_) => true,
        }
    }
}
