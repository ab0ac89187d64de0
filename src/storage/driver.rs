// ============================================================================
// In-Memory Driver
// ============================================================================
//
// Connection, statement and result-set objects over a `MemoryDatabase`.
// Statements report the driver connection that created them and result
// sets report the driver statement, exactly like a real JDBC driver would.
//
// ============================================================================

use super::memory::{Change, MemoryDatabase, Outcome, RowSet, Tables, execute_atomic};
use super::sql::{self, Command};
use crate::connection::{
    Array, CallableStatement, Connection, DataSource, PreparedStatement, ResultSet, Statement,
};
use crate::core::{IsolationLevel, Result, Row, StoreError, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Connection usage of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSourceStats {
    pub opened: u64,
    pub closed: u64,
    pub active: u64,
}

impl std::fmt::Display for DataSourceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DataSource Stats: {} active, {} opened, {} closed",
            self.active, self.opened, self.closed
        )
    }
}

/// Data source handing out connections to one in-memory database
pub struct MemoryDataSource {
    name: String,
    database: Arc<MemoryDatabase>,
    counters: Arc<Counters>,
    next_id: AtomicU64,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let database = Arc::new(MemoryDatabase::new(name.clone()));
        Self::with_database(name, database)
    }

    pub fn with_database(name: impl Into<String>, database: Arc<MemoryDatabase>) -> Self {
        Self {
            name: name.into(),
            database,
            counters: Arc::new(Counters::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub fn stats(&self) -> DataSourceStats {
        let opened = self.counters.opened.load(Ordering::SeqCst);
        let closed = self.counters.closed.load(Ordering::SeqCst);
        DataSourceStats {
            opened,
            closed,
            active: opened.saturating_sub(closed),
        }
    }
}

impl DataSource for MemoryDataSource {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection::open(
            id,
            Arc::clone(&self.database),
            Arc::clone(&self.counters),
        ))
    }
}

struct ConnectionState {
    auto_commit: bool,
    read_only: bool,
    isolation: IsolationLevel,
    /// Private copy of the tables while a manual-commit transaction is open
    workspace: Option<Workspace>,
}

struct Workspace {
    tables: Tables,
    changes: Vec<Change>,
}

impl Workspace {
    fn begin(database: &MemoryDatabase) -> Result<Self> {
        Ok(Self {
            tables: database.snapshot()?,
            changes: Vec::new(),
        })
    }
}

pub struct MemoryConnection {
    id: u64,
    database: Arc<MemoryDatabase>,
    counters: Arc<Counters>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    this: Weak<MemoryConnection>,
}

impl MemoryConnection {
    fn open(id: u64, database: Arc<MemoryDatabase>, counters: Arc<Counters>) -> Arc<Self> {
        counters.opened.fetch_add(1, Ordering::SeqCst);
        Arc::new_cyclic(|this| Self {
            id,
            database,
            counters,
            state: Mutex::new(ConnectionState {
                auto_commit: true,
                read_only: false,
                isolation: IsolationLevel::default(),
                workspace: None,
            }),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionClosed);
        }
        Ok(())
    }

    fn handle(&self) -> Result<Arc<MemoryConnection>> {
        self.this.upgrade().ok_or(StoreError::ConnectionClosed)
    }

    fn statement(&self, prepared: Option<Vec<Command>>) -> Result<Arc<MemoryStatement>> {
        self.ensure_open()?;
        Ok(MemoryStatement::new(self.handle()?, prepared))
    }

    fn run(&self, command: &Command, params: &[Value]) -> Result<Outcome> {
        self.ensure_open()?;
        let mut state = self.state.lock()?;

        if state.read_only && command.is_write() {
            return Err(StoreError::ReadOnly(format!(
                "connection {} cannot execute writes",
                self.id
            )));
        }

        if state.auto_commit {
            return self.database.execute(command, params);
        }

        let workspace = match state.workspace.take() {
            Some(workspace) => workspace,
            None => Workspace::begin(&self.database)?,
        };
        let workspace = state.workspace.insert(workspace);
        let outcome = execute_atomic(command, params, &mut workspace.tables)?;
        workspace.changes.extend(outcome.changes.iter().cloned());
        Ok(outcome)
    }

    fn commit_pending(&self, state: &mut ConnectionState) -> Result<()> {
        if let Some(workspace) = state.workspace.take() {
            debug!(
                "Connection {} committing {} change(s) to '{}'",
                self.id,
                workspace.changes.len(),
                self.database.name()
            );
            self.database.apply(&workspace.changes)?;
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn create_statement(&self) -> Result<Arc<dyn Statement>> {
        Ok(self.statement(None)?)
    }

    fn prepare_statement(&self, sql: &str) -> Result<Arc<dyn PreparedStatement>> {
        Ok(self.statement(Some(sql::parse(sql)?))?)
    }

    fn prepare_call(&self, sql: &str) -> Result<Arc<dyn CallableStatement>> {
        Ok(self.statement(Some(sql::parse(sql)?))?)
    }

    fn create_array_of(&self, type_name: &str, elements: Vec<Value>) -> Result<Arc<dyn Array>> {
        self.ensure_open()?;
        Ok(Arc::new(MemoryArray::new(type_name, elements)))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock()?;
        if auto_commit && !state.auto_commit {
            self.commit_pending(&mut state)?;
        }
        state.auto_commit = auto_commit;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.lock()?.auto_commit)
    }

    fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock()?;
        if state.auto_commit {
            return Err(StoreError::IllegalTransactionState(
                "cannot commit while auto-commit is enabled".into(),
            ));
        }
        self.commit_pending(&mut state)
    }

    fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock()?;
        if state.auto_commit {
            return Err(StoreError::IllegalTransactionState(
                "cannot roll back while auto-commit is enabled".into(),
            ));
        }
        if let Some(workspace) = state.workspace.take() {
            debug!(
                "Connection {} discarding {} change(s)",
                self.id,
                workspace.changes.len()
            );
        }
        Ok(())
    }

    fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.ensure_open()?;
        self.state.lock()?.read_only = read_only;
        Ok(())
    }

    fn is_read_only(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.lock()?.read_only)
    }

    fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.ensure_open()?;
        self.state.lock()?.isolation = level;
        Ok(())
    }

    fn isolation(&self) -> Result<IsolationLevel> {
        self.ensure_open()?;
        Ok(self.state.lock()?.isolation)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Uncommitted work dies with the connection
        if let Ok(mut state) = self.state.lock() {
            state.workspace = None;
        }
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        debug!("Connection {} closed", self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[derive(Default)]
struct LastExecution {
    rows: Option<RowSet>,
    update_count: Option<u64>,
    generated_keys: RowSet,
    out: Option<Row>,
}

/// Plain, prepared and callable statement in one type
pub struct MemoryStatement {
    connection: Arc<MemoryConnection>,
    this: Weak<MemoryStatement>,
    prepared: Option<Vec<Command>>,
    params: Mutex<Vec<Value>>,
    batch: Mutex<Vec<Vec<Value>>>,
    last: Mutex<LastExecution>,
    closed: AtomicBool,
}

impl MemoryStatement {
    fn new(connection: Arc<MemoryConnection>, prepared: Option<Vec<Command>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connection,
            this: this.clone(),
            prepared,
            params: Mutex::new(Vec::new()),
            batch: Mutex::new(Vec::new()),
            last: Mutex::new(LastExecution::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ExecutionError("Statement is closed".into()));
        }
        self.connection.ensure_open()
    }

    fn owner(&self) -> Option<Arc<dyn Statement>> {
        self.this.upgrade().map(|this| this as Arc<dyn Statement>)
    }

    fn prepared_commands(&self) -> Result<&[Command]> {
        self.prepared.as_deref().ok_or_else(|| {
            StoreError::UnsupportedOperation("statement was not prepared with SQL".into())
        })
    }

    fn run(&self, commands: &[Command], params: &[Value]) -> Result<bool> {
        self.ensure_open()?;
        let mut last = LastExecution::default();
        for command in commands {
            let outcome = self.connection.run(command, params)?;
            last.update_count = match outcome.rows {
                Some(_) => None,
                None => Some(outcome.update_count),
            };
            last.out = outcome
                .rows
                .as_ref()
                .and_then(|rows| rows.rows.first().cloned());
            last.rows = outcome.rows;
            last.generated_keys = outcome.generated_keys;
        }
        let has_rows = last.rows.is_some();
        *self.last.lock()? = last;
        Ok(has_rows)
    }

    fn take_result_set(&self) -> Result<Option<Box<dyn ResultSet>>> {
        let rows = self.last.lock()?.rows.take();
        Ok(rows.map(|rows| Box::new(MemoryResultSet::new(rows, self.owner())) as Box<dyn ResultSet>))
    }

    fn query_result(&self, has_rows: bool) -> Result<Box<dyn ResultSet>> {
        if !has_rows {
            return Err(StoreError::ExecutionError(
                "statement did not return a result set".into(),
            ));
        }
        self.take_result_set()?.ok_or_else(|| {
            StoreError::ExecutionError("result set already consumed".into())
        })
    }

    fn update_result(&self, has_rows: bool) -> Result<u64> {
        if has_rows {
            return Err(StoreError::ExecutionError(
                "statement returned a result set instead of an update count".into(),
            ));
        }
        Ok(self.last.lock()?.update_count.unwrap_or(0))
    }
}

impl Statement for MemoryStatement {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::clone(&self.connection) as Arc<dyn Connection>)
    }

    fn execute(&self, sql: &str) -> Result<bool> {
        let commands = sql::parse(sql)?;
        self.run(&commands, &[])
    }

    fn execute_query(&self, sql: &str) -> Result<Box<dyn ResultSet>> {
        let has_rows = self.execute(sql)?;
        self.query_result(has_rows)
    }

    fn execute_update(&self, sql: &str) -> Result<u64> {
        let has_rows = self.execute(sql)?;
        self.update_result(has_rows)
    }

    fn result_set(&self) -> Result<Option<Box<dyn ResultSet>>> {
        self.take_result_set()
    }

    fn update_count(&self) -> Result<Option<u64>> {
        Ok(self.last.lock()?.update_count)
    }

    fn generated_keys(&self) -> Result<Box<dyn ResultSet>> {
        let keys = self.last.lock()?.generated_keys.clone();
        Ok(Box::new(MemoryResultSet::new(keys, self.owner())))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PreparedStatement for MemoryStatement {
    fn set_value(&self, index: usize, value: Value) -> Result<()> {
        if index == 0 {
            return Err(StoreError::ExecutionError(
                "parameter indexes start at 1".into(),
            ));
        }
        let mut params = self.params.lock()?;
        if params.len() < index {
            params.resize(index, Value::Null);
        }
        params[index - 1] = value;
        Ok(())
    }

    fn clear_parameters(&self) -> Result<()> {
        self.params.lock()?.clear();
        Ok(())
    }

    fn execute_prepared(&self) -> Result<bool> {
        let params = self.params.lock()?.clone();
        self.run(self.prepared_commands()?, &params)
    }

    fn execute_query_prepared(&self) -> Result<Box<dyn ResultSet>> {
        let has_rows = self.execute_prepared()?;
        self.query_result(has_rows)
    }

    fn execute_update_prepared(&self) -> Result<u64> {
        let has_rows = self.execute_prepared()?;
        self.update_result(has_rows)
    }

    fn add_batch(&self) -> Result<()> {
        let params = self.params.lock()?.clone();
        self.batch.lock()?.push(params);
        Ok(())
    }

    fn execute_batch(&self) -> Result<Vec<u64>> {
        let batch = std::mem::take(&mut *self.batch.lock()?);
        let commands = self.prepared_commands()?;
        let mut counts = Vec::with_capacity(batch.len());
        for params in batch {
            self.run(commands, &params)?;
            counts.push(self.last.lock()?.update_count.unwrap_or(0));
        }
        Ok(counts)
    }
}

impl CallableStatement for MemoryStatement {
    fn out_value(&self, index: usize) -> Result<Value> {
        let last = self.last.lock()?;
        Ok(last
            .out
            .as_ref()
            .and_then(|row| index.checked_sub(1).and_then(|i| row.get(i)))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

pub struct MemoryResultSet {
    rows: RowSet,
    cursor: Option<usize>,
    statement: Option<Arc<dyn Statement>>,
    closed: bool,
}

impl MemoryResultSet {
    pub fn new(rows: RowSet, statement: Option<Arc<dyn Statement>>) -> Self {
        Self {
            rows,
            cursor: None,
            statement,
            closed: false,
        }
    }

    fn current(&self) -> Result<&Row> {
        if self.closed {
            return Err(StoreError::ExecutionError("Result set is closed".into()));
        }
        self.cursor
            .and_then(|i| self.rows.rows.get(i))
            .ok_or_else(|| StoreError::ExecutionError("Cursor is not on a row".into()))
    }
}

impl ResultSet for MemoryResultSet {
    fn statement(&self) -> Result<Option<Arc<dyn Statement>>> {
        Ok(self.statement.clone())
    }

    fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(StoreError::ExecutionError("Result set is closed".into()));
        }
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next.min(self.rows.rows.len()));
        Ok(next < self.rows.rows.len())
    }

    fn get(&self, index: usize) -> Result<Value> {
        let row = self.current()?;
        index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .cloned()
            .ok_or_else(|| StoreError::ExecutionError(format!("Column index {} out of range", index)))
    }

    fn get_by_name(&self, column: &str) -> Result<Value> {
        let column = column.to_lowercase();
        let position = self
            .rows
            .columns
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| StoreError::ColumnNotFound(column.clone(), "result set".into()))?;
        self.get(position + 1)
    }

    fn columns(&self) -> Vec<String> {
        self.rows.columns.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct MemoryArray {
    type_name: String,
    values: Mutex<Option<Vec<Value>>>,
}

impl MemoryArray {
    pub fn new(type_name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            values: Mutex::new(Some(values)),
        }
    }

    fn rows(&self, start: usize, count: usize) -> Result<RowSet> {
        let values = self.values()?;
        let rows = values
            .into_iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(i, value)| vec![Value::Integer(i as i64 + 1), value])
            .collect();
        Ok(RowSet::new(vec!["index".into(), "value".into()], rows))
    }
}

impl Array for MemoryArray {
    fn base_type_name(&self) -> Result<String> {
        Ok(self.type_name.clone())
    }

    fn values(&self) -> Result<Vec<Value>> {
        self.values
            .lock()?
            .clone()
            .ok_or_else(|| StoreError::ExecutionError("Array has been freed".into()))
    }

    fn result_set(&self) -> Result<Box<dyn ResultSet>> {
        Ok(Box::new(MemoryResultSet::new(self.rows(0, usize::MAX)?, None)))
    }

    fn result_set_range(&self, index: usize, count: usize) -> Result<Box<dyn ResultSet>> {
        let start = index.checked_sub(1).ok_or_else(|| {
            StoreError::ExecutionError("array indexes start at 1".into())
        })?;
        Ok(Box::new(MemoryResultSet::new(self.rows(start, count)?, None)))
    }

    fn free(&self) -> Result<()> {
        *self.values.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::same_connection;

    fn source_with_table() -> MemoryDataSource {
        let source = MemoryDataSource::new("driver");
        let connection = source.connection().unwrap();
        connection
            .create_statement()
            .unwrap()
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        connection.close().unwrap();
        source
    }

    fn count(connection: &Arc<dyn Connection>) -> i64 {
        let mut rs = connection
            .create_statement()
            .unwrap()
            .execute_query("SELECT COUNT(*) FROM items")
            .unwrap();
        assert!(rs.next().unwrap());
        rs.get(1).unwrap().as_i64().unwrap()
    }

    #[test]
    fn test_statement_reports_driver_connection() {
        let source = source_with_table();
        let connection = source.connection().unwrap();
        let statement = connection.create_statement().unwrap();
        assert!(same_connection(&statement.connection().unwrap(), &connection));
    }

    #[test]
    fn test_manual_commit_isolates_until_commit() {
        let source = source_with_table();
        let writer = source.connection().unwrap();
        let reader = source.connection().unwrap();

        writer.set_auto_commit(false).unwrap();
        writer
            .create_statement()
            .unwrap()
            .execute_update("INSERT INTO items VALUES (1, 'one')")
            .unwrap();

        assert_eq!(count(&writer), 1);
        assert_eq!(count(&reader), 0);

        writer.commit().unwrap();
        assert_eq!(count(&reader), 1);
    }

    #[test]
    fn test_rollback_and_close_discard_work() {
        let source = source_with_table();
        let connection = source.connection().unwrap();
        connection.set_auto_commit(false).unwrap();
        let insert = connection
            .prepare_statement("INSERT INTO items VALUES (?, ?)")
            .unwrap();
        insert.set_value(1, Value::Integer(1)).unwrap();
        insert.set_value(2, Value::from("one")).unwrap();
        assert_eq!(insert.execute_update_prepared().unwrap(), 1);

        connection.rollback().unwrap();
        assert_eq!(count(&connection), 0);

        insert.execute_update_prepared().unwrap();
        connection.close().unwrap();

        let other = source.connection().unwrap();
        assert_eq!(count(&other), 0);
        assert!(matches!(
            insert.execute_update_prepared(),
            Err(StoreError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_read_only_connection_rejects_writes() {
        let source = source_with_table();
        let connection = source.connection().unwrap();
        connection.set_read_only(true).unwrap();

        let err = connection
            .create_statement()
            .unwrap()
            .execute_update("INSERT INTO items VALUES (1, 'one')")
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly(_)));
    }

    #[test]
    fn test_batch_execution() {
        let source = source_with_table();
        let connection = source.connection().unwrap();
        let insert = connection
            .prepare_statement("INSERT INTO items (id, name) VALUES (?, ?)")
            .unwrap();
        for id in 1..=3 {
            insert.set_value(1, Value::Integer(id)).unwrap();
            insert.set_value(2, Value::from(format!("item-{}", id))).unwrap();
            insert.add_batch().unwrap();
        }
        assert_eq!(insert.execute_batch().unwrap(), vec![1, 1, 1]);
        assert_eq!(count(&connection), 3);
    }

    #[test]
    fn test_callable_out_value() {
        let source = source_with_table();
        let connection = source.connection().unwrap();
        connection
            .create_statement()
            .unwrap()
            .execute("INSERT INTO items VALUES (7, 'seven')")
            .unwrap();

        let call = connection
            .prepare_call("SELECT name FROM items WHERE id = ?")
            .unwrap();
        call.set_value(1, Value::Integer(7)).unwrap();
        call.execute_prepared().unwrap();
        assert_eq!(call.out_value(1).unwrap(), Value::from("seven"));
        assert_eq!(call.out_value(2).unwrap(), Value::Null);
    }

    #[test]
    fn test_stats_track_open_connections() {
        let source = MemoryDataSource::new("stats");
        let first = source.connection().unwrap();
        let _second = source.connection().unwrap();
        first.close().unwrap();
        first.close().unwrap();

        let stats = source.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.active, 1);
    }
}
