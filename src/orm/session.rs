// Statement plumbing shared by the store and the results it hands out.
//
// Every statement borrows a connection from the configured source and gives
// it back by walking from the result set (or statement) to its connection and
// closing that. Behind a transaction-bound proxy this only works when the
// connection a statement reports is the proxy the store was handed.

use super::configuration::{Configuration, TransactionMode};
use super::listener::{EntityEvent, EntityEventKind};
use super::query::QueryElement;
use super::result::{BufferedIterator, CloseableIterator, QueryResult, ResultStream, Scalar};
use crate::connection::{DataSource, LinkedDataSource, ResultSet};
use crate::core::{Result, Row, StoreError, Value};
use crate::executor::{DefaultExecutor, Executor, ScalarFuture, supply_async};
use crate::transaction::{DataSourceTransactionManager, TransactionDefinition, TransactionOperations};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub(crate) struct Session {
    configuration: Arc<Configuration>,
    connections: Arc<dyn DataSource>,
    manager: Option<DataSourceTransactionManager>,
}

impl Session {
    pub(crate) fn new(configuration: Arc<Configuration>) -> Self {
        match configuration.transaction_mode() {
            TransactionMode::None => Self {
                connections: Arc::clone(configuration.data_source()),
                manager: None,
                configuration,
            },
            TransactionMode::Auto => {
                let manager = DataSourceTransactionManager::new(
                    configuration.model().name(),
                    Arc::clone(configuration.data_source()),
                );
                let connections: Arc<dyn DataSource> =
                    Arc::new(LinkedDataSource::new(manager.transactional_data_source()));
                Self {
                    connections,
                    manager: Some(manager),
                    configuration,
                }
            }
        }
    }

    pub(crate) fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Whether results must be read before the operation returns
    fn buffers_results(&self) -> bool {
        self.manager.is_some()
    }

    /// Run `work` in a store-owned transaction, or bare in `TransactionMode::None`
    pub(crate) fn transact<R, F>(&self, definition: TransactionDefinition, work: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        match &self.manager {
            Some(manager) => manager.execute(&definition, |_| work()),
            None => work(),
        }
    }

    pub(crate) fn fire(&self, kind: EntityEventKind, table: &str, key: &Value) {
        let listeners = self.configuration.entity_state_listeners();
        if listeners.is_empty() {
            return;
        }
        let event = EntityEvent {
            kind,
            table: table.to_string(),
            key: key.clone(),
        };
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn before(&self, sql: &str, params: &[Value]) {
        for listener in self.configuration.statement_listeners() {
            listener.before_execute(sql, params);
        }
    }

    fn after(&self, sql: &str, update_count: Option<u64>) {
        for listener in self.configuration.statement_listeners() {
            listener.after_execute(sql, update_count);
        }
    }

    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn ResultSet>> {
        self.before(sql, params);
        let connection = self.connections.connection()?;

        let executed = connection.prepare_statement(sql).and_then(|statement| {
            for (i, param) in params.iter().enumerate() {
                statement.set_value(i + 1, param.clone())?;
            }
            statement.execute_query_prepared()
        });

        match executed {
            Ok(result_set) => {
                self.after(sql, None);
                Ok(result_set)
            }
            Err(err) => {
                if let Err(close_err) = connection.close() {
                    warn!("Failed to release connection after error: {}", close_err);
                }
                Err(err)
            }
        }
    }

    pub(crate) fn update(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.before(sql, params);
        let statement = self.connections.connection()?.prepare_statement(sql)?;

        let executed = params
            .iter()
            .enumerate()
            .try_for_each(|(i, param)| statement.set_value(i + 1, param.clone()))
            .and_then(|_| statement.execute_update_prepared());

        let connection = statement.connection()?;
        statement.close()?;
        connection.close()?;

        let count = executed?;
        self.after(sql, Some(count));
        Ok(count)
    }

    /// Execute `sql` once per row, flushing every `batch_update_size` rows
    pub(crate) fn batch(&self, sql: &str, rows: &[Row]) -> Result<u64> {
        let statement = self.connections.connection()?.prepare_statement(sql)?;
        let batch_size = self.configuration.batch_update_size();

        let executed = rows.chunks(batch_size).try_fold(0u64, |total, chunk| {
            for row in chunk {
                self.before(sql, row);
                for (i, value) in row.iter().enumerate() {
                    statement.set_value(i + 1, value.clone())?;
                }
                statement.add_batch()?;
            }
            let counts = statement.execute_batch()?;
            Ok::<u64, StoreError>(total + counts.iter().sum::<u64>())
        });

        let connection = statement.connection()?;
        statement.close()?;
        connection.close()?;

        let total = executed?;
        self.after(sql, Some(total));
        Ok(total)
    }

    /// Close a result set together with its statement and connection
    pub(crate) fn release(mut result_set: Box<dyn ResultSet>) -> Result<()> {
        let statement = result_set.statement()?;
        result_set.close()?;
        if let Some(statement) = statement {
            let connection = statement.connection()?;
            statement.close()?;
            connection.close()?;
        }
        Ok(())
    }
}

pub(crate) type RowMapper<E> = Arc<dyn Fn(Row) -> Result<E> + Send + Sync>;

fn read_row(result_set: &dyn ResultSet) -> Result<Row> {
    (1..=result_set.columns().len())
        .map(|index| result_set.get(index))
        .collect()
}

/// Live cursor; holds its connection until closed
pub(crate) struct CursorIterator<E> {
    result_set: Option<Box<dyn ResultSet>>,
    mapper: RowMapper<E>,
    skip: usize,
    remaining: Option<usize>,
}

impl<E> CursorIterator<E> {
    fn new(result_set: Box<dyn ResultSet>, mapper: RowMapper<E>) -> Self {
        Self {
            result_set: Some(result_set),
            mapper,
            skip: 0,
            remaining: None,
        }
    }

    fn range(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.remaining = Some(take);
        self
    }

    fn advance(&mut self) -> Result<Option<Row>> {
        let Some(result_set) = self.result_set.as_mut() else {
            return Ok(None);
        };
        while self.skip > 0 {
            self.skip -= 1;
            if !result_set.next()? {
                return Ok(None);
            }
        }
        if self.remaining == Some(0) || !result_set.next()? {
            return Ok(None);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        read_row(result_set.as_ref()).map(Some)
    }
}

impl<E> Iterator for CursorIterator<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(row)) => Some((self.mapper)(row)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<E> CloseableIterator<E> for CursorIterator<E> {
    fn close(&mut self) -> Result<()> {
        match self.result_set.take() {
            Some(result_set) => Session::release(result_set),
            None => Ok(()),
        }
    }
}

impl<E> Drop for CursorIterator<E> {
    fn drop(&mut self) {
        if let Err(err) = CloseableIterator::close(self) {
            warn!("Failed to close dropped cursor: {}", err);
        }
    }
}

/// Query result backed by SQL, executed on each materialization
pub(crate) struct SqlResult<E> {
    session: Arc<Session>,
    element: QueryElement,
    mapper: RowMapper<E>,
}

impl<E: Send + 'static> SqlResult<E> {
    pub(crate) fn new(session: Arc<Session>, element: QueryElement, mapper: RowMapper<E>) -> Self {
        Self {
            session,
            element,
            mapper,
        }
    }

    fn open(&self, element: &QueryElement) -> Result<CursorIterator<E>> {
        let (sql, params) = element.to_sql(self.session.configuration());
        let result_set = self.session.query(&sql, &params)?;
        Ok(CursorIterator::new(result_set, Arc::clone(&self.mapper)))
    }

    fn drain(mut cursor: CursorIterator<E>) -> Result<Vec<E>> {
        let items: Result<Vec<E>> = cursor.by_ref().collect();
        let closed = CloseableIterator::close(&mut cursor);
        let items = items?;
        closed?;
        Ok(items)
    }

    fn read_all(&self) -> Result<Vec<E>> {
        self.session.transact(TransactionDefinition::read_only(), || {
            Self::drain(self.open(&self.element)?)
        })
    }

    fn read_first(&self) -> Result<Option<E>> {
        let mut element = self.element.clone();
        element.limit = Some(element.limit.map_or(1, |limit| limit.min(1)));
        self.session.transact(TransactionDefinition::read_only(), || {
            Ok(Self::drain(self.open(&element)?)?.into_iter().next())
        })
    }

    fn cursor(&self, range: Option<(usize, usize)>) -> Result<Box<dyn CloseableIterator<E>>> {
        if self.session.buffers_results() {
            let items = self.read_all()?;
            let items = match range {
                Some((skip, take)) => items.into_iter().skip(skip).take(take).collect(),
                None => items,
            };
            return Ok(Box::new(BufferedIterator::new(items)));
        }

        let cursor = self.open(&self.element)?;
        Ok(match range {
            Some((skip, take)) => Box::new(cursor.range(skip, take)),
            None => Box::new(cursor),
        })
    }
}

impl<E: Send + 'static> QueryResult<E> for SqlResult<E> {
    fn first(&self) -> Result<E> {
        self.read_first()?.ok_or_else(|| {
            StoreError::NoSuchElement(format!("query on '{}' returned no rows", self.element.table))
        })
    }

    fn first_or(&self, default: E) -> Result<E> {
        Ok(self.read_first()?.unwrap_or(default))
    }

    fn first_or_else(&self, supplier: &mut dyn FnMut() -> E) -> Result<E> {
        Ok(self.read_first()?.unwrap_or_else(supplier))
    }

    fn first_or_none(&self) -> Result<Option<E>> {
        self.read_first()
    }

    fn collect(&self, into: &mut Vec<E>) -> Result<()> {
        into.extend(self.read_all()?);
        Ok(())
    }

    fn to_list(&self) -> Result<Vec<E>> {
        self.read_all()
    }

    fn to_map(&self, key: &dyn Fn(&E) -> Value) -> Result<HashMap<Value, E>> {
        let mut map = HashMap::new();
        self.to_map_into(key, &mut map)?;
        Ok(map)
    }

    fn to_map_into(&self, key: &dyn Fn(&E) -> Value, map: &mut HashMap<Value, E>) -> Result<()> {
        for item in self.read_all()? {
            map.insert(key(&item), item);
        }
        Ok(())
    }

    fn each(&self, action: &mut dyn FnMut(E)) -> Result<()> {
        self.read_all()?.into_iter().for_each(action);
        Ok(())
    }

    fn iter(&self) -> Result<Box<dyn CloseableIterator<E>>> {
        self.cursor(None)
    }

    fn iter_range(&self, skip: usize, take: usize) -> Result<Box<dyn CloseableIterator<E>>> {
        self.cursor(Some((skip, take)))
    }

    fn stream(&self) -> Result<ResultStream<E>> {
        Ok(ResultStream::new(self.cursor(None)?))
    }

    /// Cursors are owned by their iterators; nothing is held here
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// `COUNT(*)` over a query element
#[derive(Clone)]
pub(crate) struct SqlScalar {
    session: Arc<Session>,
    element: QueryElement,
}

impl SqlScalar {
    pub(crate) fn new(session: Arc<Session>, element: QueryElement) -> Self {
        Self { session, element }
    }
}

impl Scalar<i64> for SqlScalar {
    fn call(&self) -> Result<i64> {
        self.value()
    }

    fn value(&self) -> Result<i64> {
        let (sql, params) = self.element.to_sql(self.session.configuration());
        self.session.transact(TransactionDefinition::read_only(), || {
            let mut result_set = self.session.query(&sql, &params)?;
            let value = if result_set.next()? {
                result_set.get(1)?.as_i64()
            } else {
                None
            };
            Session::release(result_set)?;
            value.ok_or_else(|| StoreError::NoSuchElement(format!("no count for '{}'", self.element.table)))
        })
    }

    fn consume(&self, action: &mut dyn FnMut(i64)) -> Result<()> {
        action(self.value()?);
        Ok(())
    }

    fn to_future(&self) -> ScalarFuture<i64> {
        match self.session.configuration().write_executor() {
            Some(executor) => self.to_future_on(Arc::clone(executor)),
            None => self.to_future_on(Arc::new(DefaultExecutor)),
        }
    }

    fn to_future_on(&self, executor: Arc<dyn Executor>) -> ScalarFuture<i64> {
        let scalar = self.clone();
        supply_async(executor.as_ref(), move || scalar.value())
    }

    fn to_supplier(&self) -> Box<dyn Fn() -> Result<i64> + Send + Sync> {
        let scalar = self.clone();
        Box::new(move || scalar.value())
    }
}
