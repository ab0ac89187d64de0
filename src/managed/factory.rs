use super::store::ManagedEntityStore;
use crate::config::{DEFAULT_NAME, StoreSettings};
use crate::connection::{DataSource, LinkedDataSource};
use crate::core::Result;
use crate::orm::{Configuration, ConfigurationBuilder, EmptyEntityCache, EntityModel, SqlEntityStore, TransactionMode};
use crate::transaction::{DataSourceTransactionManager, TransactionManager};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds managed stores for named data sources
///
/// Each store gets the settings registered under its name, falling back to
/// the `default` entry and then to built-in defaults. Whatever the settings
/// say, the store's own cache is disabled, its transaction mode is `None`
/// and its data source is wrapped so statements report the connection they
/// were created from.
#[derive(Debug, Default)]
pub struct ManagedStoreFactory {
    settings: HashMap<String, StoreSettings>,
}

impl ManagedStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: HashMap<String, StoreSettings>) -> Self {
        Self { settings }
    }

    pub fn with_settings(mut self, name: impl Into<String>, settings: StoreSettings) -> Self {
        self.settings.insert(name.into(), settings);
        self
    }

    pub fn settings_for(&self, name: &str) -> StoreSettings {
        self.settings
            .get(name)
            .or_else(|| self.settings.get(DEFAULT_NAME))
            .cloned()
            .unwrap_or_default()
    }

    /// Store configuration for `name` over `data_source`
    pub fn configuration(
        &self,
        name: &str,
        model: Arc<EntityModel>,
        data_source: Arc<dyn DataSource>,
    ) -> Result<Configuration> {
        let settings = self.settings_for(name);
        settings.validate()?;

        let linked: Arc<dyn DataSource> = Arc::new(LinkedDataSource::new(data_source));
        ConfigurationBuilder::new(linked, model)
            .cache(Arc::new(EmptyEntityCache))
            .transaction_mode(TransactionMode::None)
            .use_default_logging(settings.use_default_logging)
            .statement_cache_size(settings.statement_cache_size)
            .batch_update_size(settings.batch_update_size)
            .quote_table_names(settings.quote_table_names)
            .quote_column_names(settings.quote_column_names)
            .table_transform(settings.table_name_transform)
            .column_transform(settings.column_name_transform)
            .statement_listeners(settings.statement_listeners)
            .entity_state_listeners(settings.entity_state_listeners)
            .write_executor(settings.write_executor)
            .build()
    }

    /// Managed store over a transaction-aware data source
    ///
    /// `data_source` must hand out the connection bound by `manager`.
    pub fn create(
        &self,
        name: &str,
        model: Arc<EntityModel>,
        data_source: Arc<dyn DataSource>,
        manager: Arc<dyn TransactionManager>,
    ) -> Result<ManagedEntityStore> {
        let configuration = Arc::new(self.configuration(name, model, data_source)?);
        info!(
            "Configured managed store '{}' for model '{}' (batch size {})",
            name,
            configuration.model().name(),
            configuration.batch_update_size()
        );
        ManagedEntityStore::new(SqlEntityStore::new(configuration), manager)
    }

    /// Managed store over the transactional data source of `manager`
    pub fn create_for(
        &self,
        name: &str,
        model: Arc<EntityModel>,
        manager: Arc<DataSourceTransactionManager>,
    ) -> Result<ManagedEntityStore> {
        let data_source: Arc<dyn DataSource> = manager.transactional_data_source();
        self.create(name, model, data_source, manager)
    }
}
