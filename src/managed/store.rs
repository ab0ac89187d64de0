use super::result::{TransactionalResult, TransactionalScalar};
use crate::core::{IsolationLevel, Result, StoreError, Value};
use crate::orm::{
    Configuration, Entity, EntityStore, QueryResult, Scalar, Selection, SqlEntityStore, TransactionMode, Tuple,
};
use crate::transaction::{TransactionDefinition, TransactionManager, TransactionOperations};
use std::sync::Arc;

/// Entity store whose transactions belong to an external manager
///
/// Reads run in read transactions of the manager, and transactional bodies
/// in write transactions. Writes outside a body are forwarded as they are
/// and only succeed inside a transaction the caller has already begun.
/// Selections are extended so that results materialize in their own
/// transaction, separate from the one the selection was built in.
pub struct ManagedEntityStore<S = SqlEntityStore> {
    delegate: S,
    manager: Arc<dyn TransactionManager>,
}

impl<S: EntityStore> ManagedEntityStore<S> {
    /// Wrap `delegate`, which must run in `TransactionMode::None` with an
    /// entity cache that retains nothing.
    pub fn new(delegate: S, manager: Arc<dyn TransactionManager>) -> Result<Self> {
        let configuration = delegate.configuration();
        if configuration.transaction_mode() != TransactionMode::None {
            return Err(StoreError::InvalidConfiguration(format!(
                "managed store for model '{}' needs transaction mode None, got {:?}",
                configuration.model().name(),
                configuration.transaction_mode()
            )));
        }
        if configuration.cache().retains_entries() {
            return Err(StoreError::InvalidConfiguration(format!(
                "managed store for model '{}' needs an empty entity cache",
                configuration.model().name()
            )));
        }
        Ok(Self { delegate, manager })
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    pub fn manager(&self) -> &Arc<dyn TransactionManager> {
        &self.manager
    }

    fn results<E: Send + 'static>(
        &self,
        selection: Selection<Box<dyn QueryResult<E>>>,
    ) -> Selection<Box<dyn QueryResult<E>>> {
        let manager = Arc::clone(&self.manager);
        selection.extend(move |result| {
            Box::new(TransactionalResult::new(result, Arc::clone(&manager))) as Box<dyn QueryResult<E>>
        })
    }

    fn write_definition(isolation: IsolationLevel) -> TransactionDefinition {
        TransactionDefinition::read_write().with_isolation(isolation)
    }
}

impl<S: EntityStore> EntityStore for ManagedEntityStore<S> {
    fn configuration(&self) -> &Arc<Configuration> {
        self.delegate.configuration()
    }

    fn insert<E: Entity>(&self, entity: E) -> Result<E> {
        self.delegate.insert(entity)
    }

    fn insert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.delegate.insert_all(entities)
    }

    fn update<E: Entity>(&self, entity: E) -> Result<E> {
        self.delegate.update(entity)
    }

    fn upsert<E: Entity>(&self, entity: E) -> Result<E> {
        self.delegate.upsert(entity)
    }

    fn upsert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.delegate.upsert_all(entities)
    }

    fn delete<E: Entity>(&self, entity: &E) -> Result<()> {
        self.delegate.delete(entity)
    }

    fn find_by_key<E: Entity, K: Into<Value>>(&self, key: K) -> Result<Option<E>> {
        self.manager
            .execute_read(|_| self.delegate.find_by_key::<E, K>(key))
    }

    fn refresh<E: Entity>(&self, entity: E) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.refresh(entity))
    }

    fn refresh_attributes<E: Entity>(&self, entity: E, attributes: &[&str]) -> Result<E> {
        self.manager
            .execute_read(|_| self.delegate.refresh_attributes(entity, attributes))
    }

    fn refresh_many<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.manager
            .execute_read(|_| self.delegate.refresh_many(entities))
    }

    fn refresh_all<E: Entity>(&self, entity: E) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.refresh_all(entity))
    }

    fn select<E: Entity>(&self) -> Result<Selection<Box<dyn QueryResult<E>>>> {
        self.manager
            .execute_read(|_| Ok(self.results(self.delegate.select::<E>()?)))
    }

    fn select_tuples(&self, table: &str, columns: &[&str]) -> Result<Selection<Box<dyn QueryResult<Tuple>>>> {
        self.manager
            .execute_read(|_| Ok(self.results(self.delegate.select_tuples(table, columns)?)))
    }

    fn count<E: Entity>(&self) -> Selection<Box<dyn Scalar<i64>>> {
        let manager = Arc::clone(&self.manager);
        let configuration = Arc::clone(self.delegate.configuration());
        self.delegate.count::<E>().extend(move |scalar| {
            Box::new(TransactionalScalar::new(
                scalar,
                Arc::clone(&manager),
                Arc::clone(&configuration),
            )) as Box<dyn Scalar<i64>>
        })
    }

    fn run_in_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.manager
            .execute_write(|_| self.delegate.run_in_transaction(body))
    }

    fn run_in_transaction_with<V, F>(&self, body: F, isolation: IsolationLevel) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.manager.execute(&Self::write_definition(isolation), |_| {
            self.delegate.run_in_transaction_with(body, isolation)
        })
    }

    fn with_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>,
    {
        self.manager.execute_write(|_| body(self))
    }

    fn with_transaction_isolation<V, F>(&self, isolation: IsolationLevel, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>,
    {
        self.manager
            .execute(&Self::write_definition(isolation), |_| body(self))
    }

    /// Already blocking
    fn to_blocking(&self) -> &Self {
        self
    }
}
