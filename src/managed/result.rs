use super::iterator::{ManagedIterator, ManagedStream};
use super::lease::{TransactionLease, read_only_operation};
use crate::core::{Result, Value};
use crate::executor::{DefaultExecutor, Executor, ScalarFuture, supply_async};
use crate::orm::{CloseableIterator, Configuration, QueryResult, ResultStream, Scalar};
use crate::transaction::{TransactionManager, TransactionOperations, TransactionStatus};
use std::collections::HashMap;
use std::sync::Arc;

/// Query result read inside transactions of an external manager
///
/// Eager reads each run in their own read transaction. `iter`, `iter_range`
/// and `stream` begin a read-only transaction that stays open until the
/// returned cursor is closed.
pub struct TransactionalResult<E> {
    delegate: Box<dyn QueryResult<E>>,
    manager: Arc<dyn TransactionManager>,
}

impl<E: Send + 'static> TransactionalResult<E> {
    pub fn new(delegate: Box<dyn QueryResult<E>>, manager: Arc<dyn TransactionManager>) -> Self {
        Self { delegate, manager }
    }

    fn lease(&self, status: &TransactionStatus) -> TransactionLease {
        TransactionLease::new(Arc::clone(&self.manager), status.clone())
    }
}

impl<E: Send + 'static> QueryResult<E> for TransactionalResult<E> {
    fn first(&self) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.first())
    }

    fn first_or(&self, default: E) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.first_or(default))
    }

    fn first_or_else(&self, supplier: &mut dyn FnMut() -> E) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.first_or_else(supplier))
    }

    fn first_or_none(&self) -> Result<Option<E>> {
        self.manager.execute_read(|_| self.delegate.first_or_none())
    }

    fn collect(&self, into: &mut Vec<E>) -> Result<()> {
        self.manager.execute_read(|_| self.delegate.collect(into))
    }

    fn to_list(&self) -> Result<Vec<E>> {
        self.manager.execute_read(|_| self.delegate.to_list())
    }

    fn to_map(&self, key: &dyn Fn(&E) -> Value) -> Result<HashMap<Value, E>> {
        self.manager.execute_read(|_| self.delegate.to_map(key))
    }

    fn to_map_into(&self, key: &dyn Fn(&E) -> Value, map: &mut HashMap<Value, E>) -> Result<()> {
        self.manager.execute_read(|_| self.delegate.to_map_into(key, map))
    }

    fn each(&self, action: &mut dyn FnMut(E)) -> Result<()> {
        self.manager.execute_read(|_| self.delegate.each(action))
    }

    fn iter(&self) -> Result<Box<dyn CloseableIterator<E>>> {
        read_only_operation(&self.manager, |status| {
            let iterator = self.delegate.iter()?;
            Ok(Box::new(ManagedIterator::new(iterator, self.lease(status))) as Box<dyn CloseableIterator<E>>)
        })
    }

    fn iter_range(&self, skip: usize, take: usize) -> Result<Box<dyn CloseableIterator<E>>> {
        read_only_operation(&self.manager, |status| {
            let iterator = self.delegate.iter_range(skip, take)?;
            Ok(Box::new(ManagedIterator::new(iterator, self.lease(status))) as Box<dyn CloseableIterator<E>>)
        })
    }

    fn stream(&self) -> Result<ResultStream<E>> {
        read_only_operation(&self.manager, |status| {
            let stream = self.delegate.stream()?;
            Ok(ResultStream::new(Box::new(ManagedStream::new(stream, self.lease(status)))))
        })
    }

    /// Not transactional; cursors complete their own transactions
    fn close(&self) -> Result<()> {
        self.delegate.close()
    }
}

/// Scalar computed inside a read transaction of an external manager
pub struct TransactionalScalar<E> {
    delegate: Arc<dyn Scalar<E>>,
    manager: Arc<dyn TransactionManager>,
    configuration: Arc<Configuration>,
}

impl<E> Clone for TransactionalScalar<E> {
    fn clone(&self) -> Self {
        Self {
            delegate: Arc::clone(&self.delegate),
            manager: Arc::clone(&self.manager),
            configuration: Arc::clone(&self.configuration),
        }
    }
}

impl<E: Send + 'static> TransactionalScalar<E> {
    pub fn new(
        delegate: Box<dyn Scalar<E>>,
        manager: Arc<dyn TransactionManager>,
        configuration: Arc<Configuration>,
    ) -> Self {
        Self {
            delegate: Arc::from(delegate),
            manager,
            configuration,
        }
    }
}

impl<E: Send + 'static> Scalar<E> for TransactionalScalar<E> {
    fn call(&self) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.call())
    }

    fn value(&self) -> Result<E> {
        self.manager.execute_read(|_| self.delegate.value())
    }

    fn consume(&self, action: &mut dyn FnMut(E)) -> Result<()> {
        self.manager.execute_read(|_| self.delegate.consume(action))
    }

    /// Runs on the configured write executor, or the default executor
    fn to_future(&self) -> ScalarFuture<E> {
        match self.configuration.write_executor() {
            Some(executor) => self.to_future_on(Arc::clone(executor)),
            None => {
                let scalar = self.clone();
                supply_async(&DefaultExecutor, move || scalar.value())
            }
        }
    }

    fn to_future_on(&self, executor: Arc<dyn Executor>) -> ScalarFuture<E> {
        let scalar = self.clone();
        supply_async(executor.as_ref(), move || scalar.value())
    }

    fn to_supplier(&self) -> Box<dyn Fn() -> Result<E> + Send + Sync> {
        let scalar = self.clone();
        Box::new(move || scalar.value())
    }
}
