#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use txbridge::core::{Column, DataType, Result, Row, StoreError, Value};
use txbridge::orm::{Entity, EntityModel, column_value};
use txbridge::storage::MemoryDataSource;
use txbridge::transaction::{
    DataSourceTransactionManager, TransactionDefinition, TransactionManager, TransactionStatus,
};
use txbridge::{ManagedEntityStore, ManagedStoreFactory, StoreSettings};

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub pages: i64,
}

pub fn book(id: i64, title: &str, pages: i64) -> Book {
    Book {
        id,
        title: title.to_string(),
        pages,
    }
}

impl Entity for Book {
    const TABLE: &'static str = "books";

    fn attributes() -> Vec<Column> {
        vec![
            Column::new("id", DataType::Integer).primary_key(),
            Column::new("title", DataType::Text).not_null(),
            Column::new("pages", DataType::Integer).not_null(),
        ]
    }

    fn key(&self) -> Value {
        Value::from(self.id)
    }

    fn to_row(&self) -> Row {
        vec![
            Value::from(self.id),
            Value::from(self.title.as_str()),
            Value::from(self.pages),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let integer = |index: usize, name: &str| {
            column_value(row, index, name)?
                .as_i64()
                .ok_or_else(|| StoreError::TypeMismatch(format!("{} is not an integer", name)))
        };
        Ok(Self {
            id: integer(0, "id")?,
            title: column_value(row, 1, "title")?.to_string(),
            pages: integer(2, "pages")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    /// Transactions actually begun (not joined)
    pub begins: usize,
    pub joins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

/// Transaction manager that counts what passes through it
pub struct RecordingTransactionManager {
    inner: DataSourceTransactionManager,
    begins: AtomicUsize,
    joins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl RecordingTransactionManager {
    pub fn new(inner: DataSourceTransactionManager) -> Self {
        Self {
            inner,
            begins: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &DataSourceTransactionManager {
        &self.inner
    }

    pub fn is_transaction_active(&self) -> bool {
        self.inner.is_transaction_active()
    }

    pub fn counts(&self) -> Counts {
        Counts {
            begins: self.begins.load(Ordering::SeqCst),
            joins: self.joins.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
            rollbacks: self.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Counts accumulated since `before`
    pub fn since(&self, before: Counts) -> Counts {
        let now = self.counts();
        Counts {
            begins: now.begins - before.begins,
            joins: now.joins - before.joins,
            commits: now.commits - before.commits,
            rollbacks: now.rollbacks - before.rollbacks,
        }
    }
}

impl TransactionManager for RecordingTransactionManager {
    fn get_transaction(&self, definition: &TransactionDefinition) -> Result<TransactionStatus> {
        let status = self.inner.get_transaction(definition)?;
        if status.is_new_transaction() {
            self.begins.fetch_add(1, Ordering::SeqCst);
        } else {
            self.joins.fetch_add(1, Ordering::SeqCst);
        }
        Ok(status)
    }

    fn commit(&self, status: &TransactionStatus) -> Result<()> {
        self.inner.commit(status)?;
        if status.is_new_transaction() {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn rollback(&self, status: &TransactionStatus) -> Result<()> {
        self.inner.rollback(status)?;
        if status.is_new_transaction() {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct Fixture {
    pub source: Arc<MemoryDataSource>,
    pub manager: Arc<RecordingTransactionManager>,
    pub store: ManagedEntityStore,
}

impl Fixture {
    pub fn rows(&self) -> usize {
        self.source.database().row_count("books").unwrap_or(0)
    }
}

pub fn fixture(name: &str) -> Fixture {
    fixture_with(name, StoreSettings::default())
}

pub fn fixture_with(name: &str, settings: StoreSettings) -> Fixture {
    let source = Arc::new(MemoryDataSource::new(name));
    let model = Arc::new(EntityModel::new(name).with::<Book>());
    model
        .create_tables(source.as_ref())
        .expect("create tables");

    let inner = DataSourceTransactionManager::new(name, source.clone());
    let transactional = inner.transactional_data_source();
    let manager = Arc::new(RecordingTransactionManager::new(inner));

    let store = ManagedStoreFactory::new()
        .with_settings(name, settings)
        .create(name, model, transactional, manager.clone())
        .expect("create store");

    Fixture {
        source,
        manager,
        store,
    }
}
