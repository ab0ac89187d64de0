use super::entity::EntityModel;
use super::listener::{EntityStateListener, LoggingStatementListener, StatementListener, register};
use crate::connection::DataSource;
use crate::core::{Result, Row, StoreError, Value};
use crate::executor::Executor;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Maps a logical table or column name to the physical one
pub type NameTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Who owns transaction boundaries for store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// The store never begins, commits or rolls back
    None,
    /// Each store operation runs in its own transaction
    #[default]
    Auto,
}

/// Second-level cache of loaded rows, keyed by table and entity key
pub trait EntityCache: Send + Sync {
    fn get(&self, table: &str, key: &Value) -> Result<Option<Row>>;

    fn put(&self, table: &str, key: Value, row: Row) -> Result<()>;

    fn invalidate(&self, table: &str, key: &Value) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Whether anything put into the cache can be read back
    fn retains_entries(&self) -> bool {
        true
    }
}

/// Cache that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyEntityCache;

impl EntityCache for EmptyEntityCache {
    fn get(&self, _table: &str, _key: &Value) -> Result<Option<Row>> {
        Ok(None)
    }

    fn put(&self, _table: &str, _key: Value, _row: Row) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _table: &str, _key: &Value) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn retains_entries(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct MapEntityCache {
    entries: Mutex<HashMap<(String, Value), Row>>,
}

impl MapEntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityCache for MapEntityCache {
    fn get(&self, table: &str, key: &Value) -> Result<Option<Row>> {
        let entries = self.entries.lock()?;
        Ok(entries.get(&(table.to_string(), key.clone())).cloned())
    }

    fn put(&self, table: &str, key: Value, row: Row) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.insert((table.to_string(), key), row);
        Ok(())
    }

    fn invalidate(&self, table: &str, key: &Value) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.remove(&(table.to_string(), key.clone()));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        Ok(())
    }
}

/// Immutable store configuration
///
/// Built once through [`ConfigurationBuilder`] and shared by the store and
/// every result it produces.
pub struct Configuration {
    model: Arc<EntityModel>,
    data_source: Arc<dyn DataSource>,
    cache: Arc<dyn EntityCache>,
    transaction_mode: TransactionMode,
    use_default_logging: bool,
    statement_cache_size: usize,
    batch_update_size: usize,
    quote_table_names: bool,
    quote_column_names: bool,
    table_transform: Option<NameTransform>,
    column_transform: Option<NameTransform>,
    statement_listeners: Vec<Arc<dyn StatementListener>>,
    entity_state_listeners: Vec<Arc<dyn EntityStateListener>>,
    write_executor: Option<Arc<dyn Executor>>,
}

impl Configuration {
    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    pub fn cache(&self) -> &Arc<dyn EntityCache> {
        &self.cache
    }

    pub fn transaction_mode(&self) -> TransactionMode {
        self.transaction_mode
    }

    pub fn use_default_logging(&self) -> bool {
        self.use_default_logging
    }

    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size
    }

    pub fn batch_update_size(&self) -> usize {
        self.batch_update_size
    }

    pub fn quote_table_names(&self) -> bool {
        self.quote_table_names
    }

    pub fn quote_column_names(&self) -> bool {
        self.quote_column_names
    }

    pub fn statement_listeners(&self) -> &[Arc<dyn StatementListener>] {
        &self.statement_listeners
    }

    pub fn entity_state_listeners(&self) -> &[Arc<dyn EntityStateListener>] {
        &self.entity_state_listeners
    }

    pub fn write_executor(&self) -> Option<&Arc<dyn Executor>> {
        self.write_executor.as_ref()
    }

    /// Physical table name: transform first, then quote
    pub fn table_name(&self, name: &str) -> String {
        let name = match &self.table_transform {
            Some(transform) => transform(name),
            None => name.to_string(),
        };
        quote_if(self.quote_table_names, name)
    }

    pub fn column_name(&self, name: &str) -> String {
        let name = match &self.column_transform {
            Some(transform) => transform(name),
            None => name.to_string(),
        };
        quote_if(self.quote_column_names, name)
    }
}

fn quote_if(quote: bool, name: String) -> String {
    if quote {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("model", &self.model.name())
            .field("transaction_mode", &self.transaction_mode)
            .field("use_default_logging", &self.use_default_logging)
            .field("statement_cache_size", &self.statement_cache_size)
            .field("batch_update_size", &self.batch_update_size)
            .field("quote_table_names", &self.quote_table_names)
            .field("quote_column_names", &self.quote_column_names)
            .field("statement_listeners", &self.statement_listeners.len())
            .field("entity_state_listeners", &self.entity_state_listeners.len())
            .field("write_executor", &self.write_executor.is_some())
            .finish()
    }
}

pub struct ConfigurationBuilder {
    model: Arc<EntityModel>,
    data_source: Arc<dyn DataSource>,
    cache: Arc<dyn EntityCache>,
    transaction_mode: TransactionMode,
    use_default_logging: bool,
    statement_cache_size: usize,
    batch_update_size: usize,
    quote_table_names: bool,
    quote_column_names: bool,
    table_transform: Option<NameTransform>,
    column_transform: Option<NameTransform>,
    statement_listeners: Vec<Arc<dyn StatementListener>>,
    entity_state_listeners: Vec<Arc<dyn EntityStateListener>>,
    write_executor: Option<Arc<dyn Executor>>,
}

impl ConfigurationBuilder {
    pub fn new(data_source: Arc<dyn DataSource>, model: Arc<EntityModel>) -> Self {
        Self {
            model,
            data_source,
            cache: Arc::new(MapEntityCache::new()),
            transaction_mode: TransactionMode::default(),
            use_default_logging: false,
            statement_cache_size: 0,
            batch_update_size: 64,
            quote_table_names: false,
            quote_column_names: false,
            table_transform: None,
            column_transform: None,
            statement_listeners: Vec::new(),
            entity_state_listeners: Vec::new(),
            write_executor: None,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
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

    pub fn table_transform(mut self, transform: Option<NameTransform>) -> Self {
        self.table_transform = transform;
        self
    }

    pub fn column_transform(mut self, transform: Option<NameTransform>) -> Self {
        self.column_transform = transform;
        self
    }

    pub fn statement_listener(mut self, listener: Arc<dyn StatementListener>) -> Self {
        register(&mut self.statement_listeners, listener);
        self
    }

    pub fn statement_listeners(mut self, listeners: Vec<Arc<dyn StatementListener>>) -> Self {
        for listener in listeners {
            register(&mut self.statement_listeners, listener);
        }
        self
    }

    pub fn entity_state_listener(mut self, listener: Arc<dyn EntityStateListener>) -> Self {
        register(&mut self.entity_state_listeners, listener);
        self
    }

    pub fn entity_state_listeners(mut self, listeners: Vec<Arc<dyn EntityStateListener>>) -> Self {
        for listener in listeners {
            register(&mut self.entity_state_listeners, listener);
        }
        self
    }

    pub fn write_executor(mut self, executor: Option<Arc<dyn Executor>>) -> Self {
        self.write_executor = executor;
        self
    }

    pub fn build(mut self) -> Result<Configuration> {
        if self.batch_update_size == 0 {
            return Err(StoreError::InvalidConfiguration(
                "batch_update_size must be > 0".into(),
            ));
        }
        self.model.validate()?;

        if self.use_default_logging {
            self.statement_listeners
                .insert(0, Arc::new(LoggingStatementListener));
        }

        Ok(Configuration {
            model: self.model,
            data_source: self.data_source,
            cache: self.cache,
            transaction_mode: self.transaction_mode,
            use_default_logging: self.use_default_logging,
            statement_cache_size: self.statement_cache_size,
            batch_update_size: self.batch_update_size,
            quote_table_names: self.quote_table_names,
            quote_column_names: self.quote_column_names,
            table_transform: self.table_transform,
            column_transform: self.column_transform,
            statement_listeners: self.statement_listeners,
            entity_state_listeners: self.entity_state_listeners,
            write_executor: self.write_executor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataSource;

    fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new(
            Arc::new(MemoryDataSource::new("config")),
            Arc::new(EntityModel::new("empty")),
        )
    }

    #[test]
    fn test_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.transaction_mode(), TransactionMode::Auto);
        assert_eq!(config.batch_update_size(), 64);
        assert_eq!(config.statement_cache_size(), 0);
        assert!(config.statement_listeners().is_empty());
        assert!(config.write_executor().is_none());
    }

    #[test]
    fn test_default_logging_installs_listener() {
        let config = builder().use_default_logging(true).build().unwrap();
        assert_eq!(config.statement_listeners().len(), 1);
    }

    #[test]
    fn test_same_listener_registered_once() {
        let statements: Arc<dyn StatementListener> = Arc::new(LoggingStatementListener);
        let other: Arc<dyn StatementListener> = Arc::new(LoggingStatementListener);
        let config = builder()
            .statement_listener(Arc::clone(&statements))
            .statement_listeners(vec![Arc::clone(&statements), Arc::clone(&other)])
            .build()
            .unwrap();

        assert_eq!(config.statement_listeners().len(), 2);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = builder().batch_update_size(0).build().unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_name_transforms_and_quoting() {
        let config = builder()
            .table_transform(Some(Arc::new(|name: &str| format!("app_{}", name))))
            .column_transform(Some(Arc::new(|name: &str| name.to_uppercase())))
            .quote_column_names(true)
            .build()
            .unwrap();

        assert_eq!(config.table_name("users"), "app_users");
        assert_eq!(config.column_name("email"), "\"EMAIL\"");
    }

    #[test]
    fn test_map_cache() {
        let cache = MapEntityCache::new();
        cache.put("users", Value::from(1), vec![Value::from(1)]).unwrap();

        assert_eq!(cache.get("users", &Value::from(1)).unwrap(), Some(vec![Value::from(1)]));
        assert_eq!(cache.get("orders", &Value::from(1)).unwrap(), None);

        cache.invalidate("users", &Value::from(1)).unwrap();
        assert!(cache.is_empty());
    }
}
