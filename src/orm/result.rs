use crate::core::{Result, Value};
use crate::executor::{Executor, ScalarFuture};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Iterator over a live cursor that must be closed when done
pub trait CloseableIterator<E>: Iterator<Item = Result<E>> + Send {
    fn close(&mut self) -> Result<()>;
}

pub type CloseHandler = Box<dyn FnOnce() -> Result<()> + Send>;

/// Sequential stream over a closeable source
///
/// Closing closes the source first, then runs the `on_close` handlers in
/// registration order. Every step runs even if an earlier one fails; the
/// first failure is returned. Closing twice does nothing; dropping an open
/// stream closes it.
pub struct ResultStream<E> {
    source: Box<dyn CloseableIterator<E>>,
    handlers: Vec<CloseHandler>,
    closed: bool,
}

impl<E> ResultStream<E> {
    pub fn new(source: Box<dyn CloseableIterator<E>>) -> Self {
        Self {
            source,
            handlers: Vec::new(),
            closed: false,
        }
    }

    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut outcome = self.source.close();
        for handler in self.handlers.drain(..) {
            let result = handler();
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }
}

impl<E> Iterator for ResultStream<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.source.next()
    }
}

impl<E> CloseableIterator<E> for ResultStream<E> {
    fn close(&mut self) -> Result<()> {
        ResultStream::close(self)
    }
}

impl<E> Drop for ResultStream<E> {
    fn drop(&mut self) {
        if !self.closed
            && let Err(err) = self.close()
        {
            warn!("Failed to close dropped result stream: {}", err);
        }
    }
}

/// Materialized rows presented as a closeable iterator
pub struct BufferedIterator<E> {
    items: std::vec::IntoIter<E>,
}

impl<E> BufferedIterator<E> {
    pub fn new(items: Vec<E>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<E: Send> Iterator for BufferedIterator<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(Ok)
    }
}

impl<E: Send> CloseableIterator<E> for BufferedIterator<E> {
    fn close(&mut self) -> Result<()> {
        self.items = Vec::new().into_iter();
        Ok(())
    }
}

/// Result of a query, materialized on demand
///
/// Eager operations read the whole result and release the cursor before
/// returning. `iter`, `iter_range` and `stream` hand out a live cursor that
/// the caller must close.
pub trait QueryResult<E>: Send + Sync {
    fn first(&self) -> Result<E>;

    fn first_or(&self, default: E) -> Result<E>;

    fn first_or_else(&self, supplier: &mut dyn FnMut() -> E) -> Result<E>;

    fn first_or_none(&self) -> Result<Option<E>>;

    fn collect(&self, into: &mut Vec<E>) -> Result<()>;

    fn to_list(&self) -> Result<Vec<E>>;

    fn to_map(&self, key: &dyn Fn(&E) -> Value) -> Result<HashMap<Value, E>>;

    fn to_map_into(&self, key: &dyn Fn(&E) -> Value, map: &mut HashMap<Value, E>) -> Result<()>;

    fn each(&self, action: &mut dyn FnMut(E)) -> Result<()>;

    fn iter(&self) -> Result<Box<dyn CloseableIterator<E>>>;

    fn iter_range(&self, skip: usize, take: usize) -> Result<Box<dyn CloseableIterator<E>>>;

    fn stream(&self) -> Result<ResultStream<E>>;

    fn close(&self) -> Result<()>;
}

/// Single computed value of a query
pub trait Scalar<E>: Send + Sync {
    fn call(&self) -> Result<E>;

    fn value(&self) -> Result<E>;

    fn consume(&self, action: &mut dyn FnMut(E)) -> Result<()>;

    fn to_future(&self) -> ScalarFuture<E>;

    fn to_future_on(&self, executor: Arc<dyn Executor>) -> ScalarFuture<E>;

    fn to_supplier(&self) -> Box<dyn Fn() -> Result<E> + Send + Sync>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreError;
    use std::sync::Mutex;

    struct Recorded {
        inner: BufferedIterator<i64>,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Iterator for Recorded {
        type Item = Result<i64>;

        fn next(&mut self) -> Option<Self::Item> {
            self.inner.next()
        }
    }

    impl CloseableIterator<i64> for Recorded {
        fn close(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("source");
            if self.fail {
                Err(StoreError::ExecutionError("source close".into()))
            } else {
                Ok(())
            }
        }
    }

    fn stream(log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> ResultStream<i64> {
        let recorded = Recorded {
            inner: BufferedIterator::new(vec![1, 2, 3]),
            log: Arc::clone(log),
            fail,
        };
        let handler_log = Arc::clone(log);
        ResultStream::new(Box::new(recorded)).on_close(move || {
            handler_log.lock().unwrap().push("handler");
            Ok(())
        })
    }

    #[test]
    fn test_close_order_and_idempotence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream(&log, false);

        assert_eq!(stream.next().unwrap().unwrap(), 1);
        stream.close().unwrap();
        stream.close().unwrap();

        assert!(stream.next().is_none());
        assert_eq!(*log.lock().unwrap(), vec!["source", "handler"]);
    }

    #[test]
    fn test_handlers_run_after_source_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream(&log, true);

        assert!(matches!(stream.close(), Err(StoreError::ExecutionError(_))));
        assert_eq!(*log.lock().unwrap(), vec!["source", "handler"]);
    }

    #[test]
    fn test_drop_closes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let stream = stream(&log, false);
            let values: Vec<i64> = stream.map(|item| item.unwrap()).collect();
            assert_eq!(values, vec![1, 2, 3]);
        }
        assert_eq!(*log.lock().unwrap(), vec!["source", "handler"]);
    }
}
