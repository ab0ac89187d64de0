// ============================================================================
// Connection Contract
// ============================================================================
//
// JDBC-style traits shared by the in-memory driver, the transaction-bound
// proxy and the identity bridge. Every object is handed out behind an `Arc`
// (or a `Box` for single-reader result sets) so that wrappers can be stacked
// without the caller knowing how many layers sit underneath.
//
// ============================================================================

pub mod linked;

use crate::core::{IsolationLevel, Result, Value};
use std::sync::Arc;

pub use linked::{LinkedArray, LinkedConnection, LinkedDataSource, LinkedResultSet, LinkedStatement};

/// Source of connections (a pool, a driver or a proxy over either)
pub trait DataSource: Send + Sync {
    fn connection(&self) -> Result<Arc<dyn Connection>>;

    /// Obtain a connection for explicit credentials
    ///
    /// Sources without authentication ignore the credentials.
    fn connection_with(&self, _username: &str, _password: &str) -> Result<Arc<dyn Connection>> {
        self.connection()
    }
}

/// Database connection handle
pub trait Connection: Send + Sync {
    fn create_statement(&self) -> Result<Arc<dyn Statement>>;

    fn prepare_statement(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>>;

    fn prepare_call(&self, sql: &str) -> Result<Arc<dyn CallableStatement>>;

    fn create_array_of(&self, type_name: &str, elements: Vec<Value>) -> Result<Arc<dyn Array>>;

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    fn auto_commit(&self) -> Result<bool>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn set_read_only(&self, read_only: bool) -> Result<()>;

    fn is_read_only(&self) -> Result<bool>;

    fn set_isolation(&self, level: IsolationLevel) -> Result<()>;

    fn isolation(&self) -> Result<IsolationLevel>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Statement executing ad-hoc SQL text
pub trait Statement: Send + Sync {
    /// The connection that created this statement
    fn connection(&self) -> Result<Arc<dyn Connection>>;

    /// Execute any SQL; returns `true` when the last command produced a result set
    fn execute(&self, sql: &str) -> Result<bool>;

    fn execute_query(&self, sql: &str) -> Result<Box<dyn ResultSet>>;

    fn execute_update(&self, sql: &str) -> Result<u64>;

    /// Result set of the last execution, handed out at most once
    fn result_set(&self) -> Result<Option<Box<dyn ResultSet>>>;

    fn update_count(&self) -> Result<Option<u64>>;

    fn generated_keys(&self) -> Result<Box<dyn ResultSet>>;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Statement with bound SQL text and positional parameters
pub trait PreparedStatement: Statement {
    /// Bind a parameter (1-based, like JDBC)
    fn set_value(&self, index: usize, value: Value) -> Result<()>;

    fn clear_parameters(&self) -> Result<()>;

    fn execute_prepared(&self) -> Result<bool>;

    fn execute_query_prepared(&self) -> Result<Box<dyn ResultSet>>;

    fn execute_update_prepared(&self) -> Result<u64>;

    /// Queue the currently bound parameters for batch execution
    fn add_batch(&self) -> Result<()>;

    fn execute_batch(&self) -> Result<Vec<u64>>;
}

pub trait CallableStatement: PreparedStatement {
    /// Read an output value of the last call (1-based)
    fn out_value(&self, index: usize) -> Result<Value>;
}

/// Forward-only cursor over rows
pub trait ResultSet: Send {
    /// Statement that produced these rows, if any
    fn statement(&self) -> Result<Option<Arc<dyn Statement>>>;

    fn next(&mut self) -> Result<bool>;

    /// Column value of the current row (1-based)
    fn get(&self, index: usize) -> Result<Value>;

    fn get_by_name(&self, column: &str) -> Result<Value>;

    fn columns(&self) -> Vec<String>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

pub trait Array: Send + Sync {
    fn base_type_name(&self) -> Result<String>;

    fn values(&self) -> Result<Vec<Value>>;

    /// Rows of `(index, value)`, index starting at 1
    fn result_set(&self) -> Result<Box<dyn ResultSet>>;

    fn result_set_range(&self, index: usize, count: usize) -> Result<Box<dyn ResultSet>>;

    fn free(&self) -> Result<()>;
}

/// Identity comparison of two connection handles
pub fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
