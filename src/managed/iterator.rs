// Lazy results that own the transaction they are read in.

use super::lease::TransactionLease;
use crate::core::Result;
use crate::orm::{CloseableIterator, ResultStream};
use std::thread;
use tracing::warn;

fn roll_back(lease: &mut TransactionLease) {
    if let Err(err) = lease.rollback() {
        warn!("Rollback after failed read did not complete: {}", err);
    }
}

/// Iterator whose close commits its transaction, then closes the cursor
pub struct ManagedIterator<E> {
    lease: TransactionLease,
    delegate: Box<dyn CloseableIterator<E>>,
    closed: bool,
}

impl<E> ManagedIterator<E> {
    pub fn new(delegate: Box<dyn CloseableIterator<E>>, lease: TransactionLease) -> Self {
        Self {
            lease,
            delegate,
            closed: false,
        }
    }
}

impl<E> Iterator for ManagedIterator<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        let item = self.delegate.next();
        if let Some(Err(_)) = &item {
            roll_back(&mut self.lease);
        }
        item
    }
}

impl<E> CloseableIterator<E> for ManagedIterator<E> {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let committed = self.lease.commit();
        let closed = self.delegate.close();
        committed.and(closed)
    }
}

impl<E> Drop for ManagedIterator<E> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if thread::panicking() {
            roll_back(&mut self.lease);
        } else {
            warn!("Managed iterator dropped without close");
        }
        if let Err(err) = self.close() {
            warn!("Failed to close dropped iterator: {}", err);
        }
    }
}

/// Stream whose close closes the delegate stream, then commits
pub struct ManagedStream<E> {
    delegate: ResultStream<E>,
    lease: TransactionLease,
    closed: bool,
}

impl<E> ManagedStream<E> {
    pub fn new(delegate: ResultStream<E>, lease: TransactionLease) -> Self {
        Self {
            delegate,
            lease,
            closed: false,
        }
    }
}

impl<E> Iterator for ManagedStream<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        let item = self.delegate.next();
        if let Some(Err(_)) = &item {
            roll_back(&mut self.lease);
        }
        item
    }
}

impl<E> CloseableIterator<E> for ManagedStream<E> {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let closed = self.delegate.close();
        let committed = self.lease.commit();
        closed.and(committed)
    }
}

impl<E> Drop for ManagedStream<E> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if thread::panicking() {
            roll_back(&mut self.lease);
        }
        if let Err(err) = self.close() {
            warn!("Failed to close dropped stream: {}", err);
        }
    }
}
