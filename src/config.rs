use crate::core::{Result, StoreError};
use crate::executor::Executor;
use crate::orm::listener::register;
use crate::orm::{EntityStateListener, NameTransform, StatementListener};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key under which named store settings are grouped
pub const PREFIX: &str = "txbridge";

/// Settings name used when a data source has no settings of its own
pub const DEFAULT_NAME: &str = "default";

/// Per data source store settings
///
/// The plain values deserialize from kebab-case keys; transforms, listeners
/// and the write executor can only be set in code.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Install the debug-level statement logger
    pub use_default_logging: bool,

    /// Prepared statement cache size handed to the store
    pub statement_cache_size: usize,

    /// Rows per batch for bulk inserts and upserts
    pub batch_update_size: usize,

    pub quote_table_names: bool,

    pub quote_column_names: bool,

    #[serde(skip)]
    pub table_name_transform: Option<NameTransform>,

    #[serde(skip)]
    pub column_name_transform: Option<NameTransform>,

    #[serde(skip)]
    pub statement_listeners: Vec<Arc<dyn StatementListener>>,

    #[serde(skip)]
    pub entity_state_listeners: Vec<Arc<dyn EntityStateListener>>,

    /// Executor for asynchronous scalars; the default executor when unset
    #[serde(skip)]
    pub write_executor: Option<Arc<dyn Executor>>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            use_default_logging: false,
            statement_cache_size: 0,
            batch_update_size: 64,
            quote_table_names: false,
            quote_column_names: false,
            table_name_transform: None,
            column_name_transform: None,
            statement_listeners: Vec::new(),
            entity_state_listeners: Vec::new(),
            write_executor: None,
        }
    }
}

impl StoreSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_default_logging(mut self, enabled: bool) -> Self {
        self.use_default_logging = enabled;
        self
    }

    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    pub fn batch_update_size(mut self, size: usize) -> Self {
        self.batch_update_size = size;
        self
    }

    pub fn quote_table_names(mut self, quote: bool) -> Self {
        self.quote_table_names = quote;
        self
    }

    pub fn quote_column_names(mut self, quote: bool) -> Self {
        self.quote_column_names = quote;
        self
    }

    pub fn table_name_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.table_name_transform = Some(Arc::new(transform));
        self
    }

    pub fn column_name_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.column_name_transform = Some(Arc::new(transform));
        self
    }

    pub fn statement_listener(mut self, listener: Arc<dyn StatementListener>) -> Self {
        register(&mut self.statement_listeners, listener);
        self
    }

    pub fn entity_state_listener(mut self, listener: Arc<dyn EntityStateListener>) -> Self {
        register(&mut self.entity_state_listeners, listener);
        self
    }

    pub fn write_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.write_executor = Some(executor);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_update_size == 0 {
            return Err(StoreError::InvalidConfiguration(
                "batch-update-size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse every named settings block under [`PREFIX`]
    ///
    /// A missing prefix yields an empty map.
    pub fn from_json(json: &str) -> Result<HashMap<String, StoreSettings>> {
        let mut document: HashMap<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;

        let Some(section) = document.remove(PREFIX) else {
            return Ok(HashMap::new());
        };
        let settings: HashMap<String, StoreSettings> = serde_json::from_value(section)
            .map_err(|e| StoreError::InvalidConfiguration(format!("{}: {}", PREFIX, e)))?;

        for (name, entry) in &settings {
            entry
                .validate()
                .map_err(|e| StoreError::InvalidConfiguration(format!("{}.{}: {}", PREFIX, name, e)))?;
        }
        Ok(settings)
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("use_default_logging", &self.use_default_logging)
            .field("statement_cache_size", &self.statement_cache_size)
            .field("batch_update_size", &self.batch_update_size)
            .field("quote_table_names", &self.quote_table_names)
            .field("quote_column_names", &self.quote_column_names)
            .field("table_name_transform", &self.table_name_transform.is_some())
            .field("column_name_transform", &self.column_name_transform.is_some())
            .field("statement_listeners", &self.statement_listeners.len())
            .field("entity_state_listeners", &self.entity_state_listeners.len())
            .field("write_executor", &self.write_executor.is_some())
            .finish()
    }
}
