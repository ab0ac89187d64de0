// ============================================================================
// Connection Identity Bridge
// ============================================================================
//
// Forwarding wrappers that keep every statement, result set and array
// produced from one logical connection pointing back at that connection.
// Pools and transaction proxies hand out statements created by the
// underlying driver connection; asking those statements for their connection
// would otherwise leak the driver object past the proxy.
//
// Only methods whose return value must be re-wrapped do any work. Everything
// else forwards to the delegate, and delegate errors pass through untouched.
//
// ============================================================================

use super::{
    Array, CallableStatement, Connection, DataSource, PreparedStatement, ResultSet, Statement,
};
use crate::core::{IsolationLevel, Result, StoreError, Value};
use std::sync::{Arc, Weak};

/// Data source whose connections are wrapped in [`LinkedConnection`]
pub struct LinkedDataSource {
    delegate: Arc<dyn DataSource>,
}

impl LinkedDataSource {
    pub fn new(delegate: Arc<dyn DataSource>) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &Arc<dyn DataSource> {
        &self.delegate
    }
}

impl DataSource for LinkedDataSource {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        Ok(LinkedConnection::wrap(self.delegate.connection()?))
    }

    fn connection_with(&self, username: &str, password: &str) -> Result<Arc<dyn Connection>> {
        Ok(LinkedConnection::wrap(
            self.delegate.connection_with(username, password)?,
        ))
    }
}

/// The logical connection
///
/// Holds a weak reference to itself so that statements created through it
/// can be given the wrapper (not the delegate) as their connection.
pub struct LinkedConnection {
    delegate: Arc<dyn Connection>,
    this: Weak<LinkedConnection>,
}

impl LinkedConnection {
    pub fn wrap(delegate: Arc<dyn Connection>) -> Arc<LinkedConnection> {
        Arc::new_cyclic(|this| Self {
            delegate,
            this: this.clone(),
        })
    }

    pub fn delegate(&self) -> &Arc<dyn Connection> {
        &self.delegate
    }

    fn logical(&self) -> Result<Arc<dyn Connection>> {
        match self.this.upgrade() {
            Some(this) => Ok(this),
            None => Err(StoreError::ConnectionClosed),
        }
    }
}

impl Connection for LinkedConnection {
    fn create_statement(&self) -> Result<Arc<dyn Statement>> {
        let statement = self.delegate.create_statement()?;
        Ok(LinkedStatement::wrap(statement, self.logical()?))
    }

    fn prepare_statement(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>> {
        let statement = self.delegate.prepare_statement(sql)?;
        Ok(LinkedStatement::wrap(statement, self.logical()?))
    }

    fn prepare_call(&self, sql: &str) -> Result<Arc<dyn CallableStatement>> {
        let statement = self.delegate.prepare_call(sql)?;
        Ok(LinkedStatement::wrap(statement, self.logical()?))
    }

    fn create_array_of(&self, type_name: &str, elements: Vec<Value>) -> Result<Arc<dyn Array>> {
        let array = self.delegate.create_array_of(type_name, elements)?;
        Ok(Arc::new(LinkedArray::new(array, self.logical()?)))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.delegate.set_auto_commit(auto_commit)
    }

    fn auto_commit(&self) -> Result<bool> {
        self.delegate.auto_commit()
    }

    fn commit(&self) -> Result<()> {
        self.delegate.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.delegate.rollback()
    }

    fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.delegate.set_read_only(read_only)
    }

    fn is_read_only(&self) -> Result<bool> {
        self.delegate.is_read_only()
    }

    fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.delegate.set_isolation(level)
    }

    fn isolation(&self) -> Result<IsolationLevel> {
        self.delegate.isolation()
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}

/// Statement bound to a logical connection
///
/// One wrapper serves plain, prepared and callable statements: `S` is the
/// capability being wrapped (`dyn Statement`, `dyn PreparedStatement` or
/// `dyn CallableStatement`) and the matching trait impls apply.
pub struct LinkedStatement<S: ?Sized> {
    delegate: Arc<S>,
    connection: Arc<dyn Connection>,
    this: Weak<LinkedStatement<S>>,
}

impl<S: ?Sized + 'static> LinkedStatement<S> {
    pub fn wrap(delegate: Arc<S>, connection: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            delegate,
            connection,
            this: this.clone(),
        })
    }

    pub fn delegate(&self) -> &Arc<S> {
        &self.delegate
    }
}

impl<S: Statement + ?Sized + 'static> LinkedStatement<S> {
    fn owner(&self) -> Option<Arc<dyn Statement>> {
        self.this
            .upgrade()
            .map(|this| this as Arc<dyn Statement>)
    }

    fn link(&self, result_set: Box<dyn ResultSet>) -> Box<dyn ResultSet> {
        Box::new(LinkedResultSet::new(
            result_set,
            self.owner(),
            Arc::clone(&self.connection),
        ))
    }
}

impl<S: Statement + ?Sized + 'static> Statement for LinkedStatement<S> {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::clone(&self.connection))
    }

    fn execute(&self, sql: &str) -> Result<bool> {
        self.delegate.execute(sql)
    }

    fn execute_query(&self, sql: &str) -> Result<Box<dyn ResultSet>> {
        let result_set = self.delegate.execute_query(sql)?;
        Ok(self.link(result_set))
    }

    fn execute_update(&self, sql: &str) -> Result<u64> {
        self.delegate.execute_update(sql)
    }

    fn result_set(&self) -> Result<Option<Box<dyn ResultSet>>> {
        Ok(self.delegate.result_set()?.map(|rs| self.link(rs)))
    }

    fn update_count(&self) -> Result<Option<u64>> {
        self.delegate.update_count()
    }

    fn generated_keys(&self) -> Result<Box<dyn ResultSet>> {
        let keys = self.delegate.generated_keys()?;
        Ok(self.link(keys))
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}

impl<S: PreparedStatement + ?Sized + 'static> PreparedStatement for LinkedStatement<S> {
    fn set_value(&self, index: usize, value: Value) -> Result<()> {
        self.delegate.set_value(index, value)
    }

    fn clear_parameters(&self) -> Result<()> {
        self.delegate.clear_parameters()
    }

    fn execute_prepared(&self) -> Result<bool> {
        self.delegate.execute_prepared()
    }

    fn execute_query_prepared(&self) -> Result<Box<dyn ResultSet>> {
        let result_set = self.delegate.execute_query_prepared()?;
        Ok(self.link(result_set))
    }

    fn execute_update_prepared(&self) -> Result<u64> {
        self.delegate.execute_update_prepared()
    }

    fn add_batch(&self) -> Result<()> {
        self.delegate.add_batch()
    }

    fn execute_batch(&self) -> Result<Vec<u64>> {
        self.delegate.execute_batch()
    }
}

impl<S: CallableStatement + ?Sized + 'static> CallableStatement for LinkedStatement<S> {
    fn out_value(&self, index: usize) -> Result<Value> {
        self.delegate.out_value(index)
    }
}

/// Result set remembering its owning statement and logical connection
pub struct LinkedResultSet {
    delegate: Box<dyn ResultSet>,
    statement: Option<Arc<dyn Statement>>,
    connection: Arc<dyn Connection>,
}

impl LinkedResultSet {
    pub fn new(
        delegate: Box<dyn ResultSet>,
        statement: Option<Arc<dyn Statement>>,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            delegate,
            statement,
            connection,
        }
    }
}

impl ResultSet for LinkedResultSet {
    fn statement(&self) -> Result<Option<Arc<dyn Statement>>> {
        if let Some(statement) = &self.statement {
            return Ok(Some(Arc::clone(statement)));
        }

        // Owner unknown: pair whatever the driver reports with the logical connection
        Ok(self.delegate.statement()?.map(|driver| {
            LinkedStatement::wrap(driver, Arc::clone(&self.connection)) as Arc<dyn Statement>
        }))
    }

    fn next(&mut self) -> Result<bool> {
        self.delegate.next()
    }

    fn get(&self, index: usize) -> Result<Value> {
        self.delegate.get(index)
    }

    fn get_by_name(&self, column: &str) -> Result<Value> {
        self.delegate.get_by_name(column)
    }

    fn columns(&self) -> Vec<String> {
        self.delegate.columns()
    }

    fn close(&mut self) -> Result<()> {
        self.delegate.close()
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}

pub struct LinkedArray {
    delegate: Arc<dyn Array>,
    connection: Arc<dyn Connection>,
}

impl LinkedArray {
    pub fn new(delegate: Arc<dyn Array>, connection: Arc<dyn Connection>) -> Self {
        Self {
            delegate,
            connection,
        }
    }
}

impl Array for LinkedArray {
    fn base_type_name(&self) -> Result<String> {
        self.delegate.base_type_name()
    }

    fn values(&self) -> Result<Vec<Value>> {
        self.delegate.values()
    }

    fn result_set(&self) -> Result<Box<dyn ResultSet>> {
        Ok(Box::new(LinkedResultSet::new(
            self.delegate.result_set()?,
            None,
            Arc::clone(&self.connection),
        )))
    }

    fn result_set_range(&self, index: usize, count: usize) -> Result<Box<dyn ResultSet>> {
        Ok(Box::new(LinkedResultSet::new(
            self.delegate.result_set_range(index, count)?,
            None,
            Arc::clone(&self.connection),
        )))
    }

    fn free(&self) -> Result<()> {
        self.delegate.free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::same_connection;
    use crate::storage::MemoryDataSource;

    fn linked_connection() -> Arc<dyn Connection> {
        let source = LinkedDataSource::new(Arc::new(MemoryDataSource::new("linked")));
        let connection = source.connection().unwrap();
        connection
            .create_statement()
            .unwrap()
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        connection
    }

    fn statement_connection(rs: &dyn ResultSet) -> Arc<dyn Connection> {
        rs.statement().unwrap().unwrap().connection().unwrap()
    }

    #[test]
    fn test_statement_reports_logical_connection() {
        let connection = linked_connection();

        let plain = connection.create_statement().unwrap();
        let prepared = connection.prepare_statement("SELECT * FROM items").unwrap();
        let callable = connection.prepare_call("SELECT * FROM items").unwrap();

        assert!(same_connection(&plain.connection().unwrap(), &connection));
        assert!(same_connection(&prepared.connection().unwrap(), &connection));
        assert!(same_connection(&callable.connection().unwrap(), &connection));
    }

    #[test]
    fn test_result_sets_resolve_to_logical_connection() {
        let connection = linked_connection();
        let statement = connection.create_statement().unwrap();

        statement
            .execute_update("INSERT INTO items VALUES (1, 'one')")
            .unwrap();
        let keys = statement.generated_keys().unwrap();
        assert!(same_connection(&statement_connection(keys.as_ref()), &connection));

        let rs = statement.execute_query("SELECT * FROM items").unwrap();
        assert!(same_connection(&statement_connection(rs.as_ref()), &connection));

        assert!(statement.execute("SELECT name FROM items").unwrap());
        let rs = statement.result_set().unwrap().unwrap();
        assert!(same_connection(&statement_connection(rs.as_ref()), &connection));
    }

    #[test]
    fn test_prepared_result_set_owner_is_the_wrapper() {
        let connection = linked_connection();
        let prepared = connection
            .prepare_statement("SELECT * FROM items WHERE id = ?")
            .unwrap();
        prepared.set_value(1, Value::Integer(1)).unwrap();

        let rs = prepared.execute_query_prepared().unwrap();
        let owner = rs.statement().unwrap().unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&owner), Arc::as_ptr(&prepared)));
    }

    #[test]
    fn test_unowned_result_set_wraps_driver_statement() {
        let driver = MemoryDataSource::new("raw");
        let raw_connection = driver.connection().unwrap();
        let raw_statement = raw_connection.create_statement().unwrap();
        raw_statement
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        let raw_rs = raw_statement.execute_query("SELECT * FROM t").unwrap();

        let logical = linked_connection();
        let rs = LinkedResultSet::new(raw_rs, None, Arc::clone(&logical));

        let reported = statement_connection(&rs);
        assert!(same_connection(&reported, &logical));
        assert!(!same_connection(&reported, &raw_connection));
    }

    #[test]
    fn test_array_result_set_has_no_statement() {
        let connection = linked_connection();
        let array = connection
            .create_array_of("INTEGER", vec![Value::Integer(1), Value::Integer(2)])
            .unwrap();

        let mut rs = array.result_set().unwrap();
        assert!(rs.statement().unwrap().is_none());
        assert!(rs.next().unwrap());
        assert_eq!(rs.get(2).unwrap(), Value::Integer(1));

        let mut tail = array.result_set_range(2, 1).unwrap();
        assert!(tail.next().unwrap());
        assert_eq!(tail.get(2).unwrap(), Value::Integer(2));
        assert!(!tail.next().unwrap());
    }

    #[test]
    fn test_delegate_errors_pass_through() {
        let connection = linked_connection();
        let statement = connection.create_statement().unwrap();

        let err = statement.execute_query("SELECT * FROM missing").err().unwrap();
        assert!(matches!(err, StoreError::TableNotFound(name) if name == "missing"));
    }
}
