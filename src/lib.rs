// ============================================================================
// txbridge Library
// ============================================================================

//! Runs an entity store's work inside transactions owned by an external
//! transaction manager.
//!
//! The store is configured without its own cache or transaction handling.
//! Reads run in read transactions of the manager, and transactional bodies
//! run in write transactions. Lazy results keep their read transaction open
//! until the cursor is closed. Connections handed to the store are wrapped
//! so that statements and result sets always report the connection they
//! came from, even behind a transaction-bound proxy.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use txbridge::core::{Column, DataType, Result, Row, Value};
//! use txbridge::orm::{Entity, EntityModel, EntityStore};
//! use txbridge::storage::MemoryDataSource;
//! use txbridge::transaction::{DataSourceTransactionManager, TransactionOperations};
//! use txbridge::ManagedStoreFactory;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Note {
//!     id: i64,
//!     text: String,
//! }
//!
//! impl Entity for Note {
//!     const TABLE: &'static str = "notes";
//!
//!     fn attributes() -> Vec<Column> {
//!         vec![
//!             Column::new("id", DataType::Integer).primary_key(),
//!             Column::new("text", DataType::Text),
//!         ]
//!     }
//!
//!     fn key(&self) -> Value {
//!         Value::from(self.id)
//!     }
//!
//!     fn to_row(&self) -> Row {
//!         vec![Value::from(self.id), Value::from(self.text.as_str())]
//!     }
//!
//!     fn from_row(row: &Row) -> Result<Self> {
//!         Ok(Note {
//!             id: row[0].as_i64().unwrap_or_default(),
//!             text: row[1].to_string(),
//!         })
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let source = Arc::new(MemoryDataSource::new("notes"));
//! let model = Arc::new(EntityModel::new("notes").with::<Note>());
//! model.create_tables(source.as_ref())?;
//!
//! let manager = Arc::new(DataSourceTransactionManager::new("notes", source));
//! let store = ManagedStoreFactory::new().create_for("notes", model, manager.clone())?;
//!
//! manager.execute_write(|_| store.insert(Note { id: 1, text: "hello".into() }))?;
//! let note: Option<Note> = store.find_by_key(1)?;
//! assert_eq!(note.map(|n| n.text), Some("hello".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod executor;
pub mod managed;
pub mod orm;
pub mod storage;
pub mod transaction;

pub use config::StoreSettings;
pub use core::{Result, StoreError, Value};
pub use managed::{ManagedEntityStore, ManagedStoreFactory};
pub use transaction::{DataSourceTransactionManager, TransactionManager, TransactionOperations};
