use super::configuration::Configuration;
use super::entity::{Entity, EntityType};
use super::listener::EntityEventKind;
use super::query::{Condition, Operator, QueryElement, Selection, Tuple};
use super::result::{QueryResult, Scalar};
use super::session::{RowMapper, Session, SqlResult, SqlScalar};
use crate::core::{IsolationLevel, Result, Row, StoreError, Value};
use crate::transaction::TransactionDefinition;
use std::sync::Arc;
use tracing::info;

/// Blocking CRUD and query surface over one entity model
pub trait EntityStore: Send + Sync {
    /// Configuration the store was built with
    fn configuration(&self) -> &Arc<Configuration>;

    fn insert<E: Entity>(&self, entity: E) -> Result<E>;

    fn insert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>>;

    fn update<E: Entity>(&self, entity: E) -> Result<E>;

    fn upsert<E: Entity>(&self, entity: E) -> Result<E>;

    fn upsert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>>;

    fn delete<E: Entity>(&self, entity: &E) -> Result<()>;

    fn find_by_key<E: Entity, K: Into<Value>>(&self, key: K) -> Result<Option<E>>;

    fn refresh<E: Entity>(&self, entity: E) -> Result<E>;

    /// Reload only the named attributes, keeping the others as they are
    fn refresh_attributes<E: Entity>(&self, entity: E, attributes: &[&str]) -> Result<E>;

    fn refresh_many<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>>;

    fn refresh_all<E: Entity>(&self, entity: E) -> Result<E>;

    fn select<E: Entity>(&self) -> Result<Selection<Box<dyn QueryResult<E>>>>;

    fn select_tuples(&self, table: &str, columns: &[&str]) -> Result<Selection<Box<dyn QueryResult<Tuple>>>>;

    fn count<E: Entity>(&self) -> Selection<Box<dyn Scalar<i64>>>;

    fn run_in_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>;

    fn run_in_transaction_with<V, F>(&self, body: F, isolation: IsolationLevel) -> Result<V>
    where
        F: FnOnce() -> Result<V>;

    fn with_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>;

    fn with_transaction_isolation<V, F>(&self, isolation: IsolationLevel, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>;

    /// Blocking view of this store
    fn to_blocking(&self) -> &Self;
}

/// Entity store issuing SQL through the configured data source
pub struct SqlEntityStore {
    session: Arc<Session>,
}

impl SqlEntityStore {
    pub fn new(configuration: impl Into<Arc<Configuration>>) -> Self {
        let configuration = configuration.into();
        info!(
            "Entity store for model '{}' ready ({:?} transactions)",
            configuration.model().name(),
            configuration.transaction_mode()
        );
        Self {
            session: Arc::new(Session::new(configuration)),
        }
    }

    fn entity_type<E: Entity>(&self) -> Result<EntityType> {
        if !self.configuration().model().contains(E::TABLE) {
            return Err(StoreError::InvalidConfiguration(format!(
                "'{}' is not part of model '{}'",
                E::TABLE,
                self.configuration().model().name()
            )));
        }
        Ok(EntityType::of::<E>())
    }

    fn columns(&self, entity_type: &EntityType) -> Vec<String> {
        entity_type
            .attributes()
            .iter()
            .map(|attribute| self.configuration().column_name(&attribute.name))
            .collect()
    }

    fn insert_sql(&self, entity_type: &EntityType) -> String {
        let columns = self.columns(entity_type);
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.configuration().table_name(entity_type.table()),
            columns.join(", "),
            placeholders
        )
    }

    fn upsert_sql(&self, entity_type: &EntityType) -> Result<String> {
        let key = self.configuration().column_name(&entity_type.key_attribute()?.name);
        let updates: Vec<String> = entity_type
            .attributes()
            .iter()
            .filter(|attribute| !attribute.primary_key)
            .map(|attribute| {
                let column = self.configuration().column_name(&attribute.name);
                format!("{} = EXCLUDED.{}", column, column)
            })
            .collect();

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        Ok(format!("{} ON CONFLICT ({}) {}", self.insert_sql(entity_type), key, action))
    }

    fn key_filter(&self, entity_type: &EntityType) -> Result<String> {
        Ok(format!(
            "{} = ?",
            self.configuration().column_name(&entity_type.key_attribute()?.name)
        ))
    }

    fn load_row(&self, entity_type: &EntityType, key: &Value) -> Result<Option<Row>> {
        let key_name = &entity_type.key_attribute()?.name;
        let mut element = QueryElement::select(
            entity_type.table(),
            entity_type.attributes().iter().map(|a| a.name.clone()).collect(),
        );
        element.conditions.push(Condition {
            column: key_name.clone(),
            operator: Operator::Eq,
            value: key.clone(),
        });

        let (sql, params) = element.to_sql(self.configuration());
        let mut result_set = self.session.query(&sql, &params)?;
        let width = result_set.columns().len();
        let row = if result_set.next()? {
            Some((1..=width).map(|i| result_set.get(i)).collect::<Result<Row>>()?)
        } else {
            None
        };
        Session::release(result_set)?;
        Ok(row)
    }

    fn find<E: Entity>(&self, key: Value) -> Result<Option<E>> {
        let entity_type = self.entity_type::<E>()?;
        let cache = self.configuration().cache();

        if let Some(row) = cache.get(E::TABLE, &key)? {
            return E::from_row(&row).map(Some);
        }

        let Some(row) = self.load_row(&entity_type, &key)? else {
            return Ok(None);
        };
        let entity = E::from_row(&row)?;
        cache.put(E::TABLE, key.clone(), row)?;
        self.session.fire(EntityEventKind::PostLoad, E::TABLE, &key);
        Ok(Some(entity))
    }

    fn reload<E: Entity>(&self, entity: E) -> Result<E> {
        let key = entity.key();
        self.configuration().cache().invalidate(E::TABLE, &key)?;
        self.find::<E>(key.clone())?
            .ok_or_else(|| StoreError::EntityNotFound(format!("{} with key {}", E::TABLE, key)))
    }

    fn write_all<E: Entity>(
        &self,
        entities: Vec<E>,
        sql: String,
        events: (EntityEventKind, EntityEventKind),
    ) -> Result<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        self.session.transact(TransactionDefinition::read_write(), || {
            let cache = self.configuration().cache();
            for entity in &entities {
                cache.invalidate(E::TABLE, &entity.key())?;
                self.session.fire(events.0, E::TABLE, &entity.key());
            }
            let rows: Vec<Row> = entities.iter().map(Entity::to_row).collect();
            self.session.batch(&sql, &rows)?;
            for entity in &entities {
                self.session.fire(events.1, E::TABLE, &entity.key());
            }
            Ok(entities)
        })
    }

    fn entity_mapper<E: Entity>(&self) -> RowMapper<E> {
        let session = Arc::clone(&self.session);
        Arc::new(move |row: Row| {
            let entity = E::from_row(&row)?;
            session.fire(EntityEventKind::PostLoad, E::TABLE, &entity.key());
            Ok(entity)
        })
    }
}

impl EntityStore for SqlEntityStore {
    fn configuration(&self) -> &Arc<Configuration> {
        self.session.configuration()
    }

    fn insert<E: Entity>(&self, entity: E) -> Result<E> {
        let entity_type = self.entity_type::<E>()?;
        let sql = self.insert_sql(&entity_type);
        let key = entity.key();

        self.session.transact(TransactionDefinition::read_write(), || {
            self.session.fire(EntityEventKind::PreInsert, E::TABLE, &key);
            self.session.update(&sql, &entity.to_row())?;
            self.session.fire(EntityEventKind::PostInsert, E::TABLE, &key);
            Ok(entity)
        })
    }

    fn insert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        let entity_type = self.entity_type::<E>()?;
        let sql = self.insert_sql(&entity_type);
        self.write_all(
            entities,
            sql,
            (EntityEventKind::PreInsert, EntityEventKind::PostInsert),
        )
    }

    fn update<E: Entity>(&self, entity: E) -> Result<E> {
        let entity_type = self.entity_type::<E>()?;
        let key = entity.key();

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (attribute, value) in entity_type.attributes().iter().zip(entity.to_row()) {
            if attribute.primary_key {
                continue;
            }
            assignments.push(format!("{} = ?", self.configuration().column_name(&attribute.name)));
            params.push(value);
        }
        if assignments.is_empty() {
            return Ok(entity);
        }
        params.push(key.clone());

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.configuration().table_name(E::TABLE),
            assignments.join(", "),
            self.key_filter(&entity_type)?
        );

        self.session.transact(TransactionDefinition::read_write(), || {
            self.configuration().cache().invalidate(E::TABLE, &key)?;
            self.session.fire(EntityEventKind::PreUpdate, E::TABLE, &key);
            if self.session.update(&sql, &params)? == 0 {
                return Err(StoreError::EntityNotFound(format!("{} with key {}", E::TABLE, key)));
            }
            self.session.fire(EntityEventKind::PostUpdate, E::TABLE, &key);
            Ok(entity)
        })
    }

    fn upsert<E: Entity>(&self, entity: E) -> Result<E> {
        let entity_type = self.entity_type::<E>()?;
        let sql = self.upsert_sql(&entity_type)?;
        let key = entity.key();

        self.session.transact(TransactionDefinition::read_write(), || {
            self.configuration().cache().invalidate(E::TABLE, &key)?;
            self.session.fire(EntityEventKind::PreUpdate, E::TABLE, &key);
            self.session.update(&sql, &entity.to_row())?;
            self.session.fire(EntityEventKind::PostUpdate, E::TABLE, &key);
            Ok(entity)
        })
    }

    fn upsert_all<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        let entity_type = self.entity_type::<E>()?;
        let sql = self.upsert_sql(&entity_type)?;
        self.write_all(
            entities,
            sql,
            (EntityEventKind::PreUpdate, EntityEventKind::PostUpdate),
        )
    }

    fn delete<E: Entity>(&self, entity: &E) -> Result<()> {
        let entity_type = self.entity_type::<E>()?;
        let key = entity.key();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.configuration().table_name(E::TABLE),
            self.key_filter(&entity_type)?
        );

        self.session.transact(TransactionDefinition::read_write(), || {
            self.configuration().cache().invalidate(E::TABLE, &key)?;
            self.session.fire(EntityEventKind::PreDelete, E::TABLE, &key);
            if self.session.update(&sql, std::slice::from_ref(&key))? == 0 {
                return Err(StoreError::EntityNotFound(format!("{} with key {}", E::TABLE, key)));
            }
            self.session.fire(EntityEventKind::PostDelete, E::TABLE, &key);
            Ok(())
        })
    }

    fn find_by_key<E: Entity, K: Into<Value>>(&self, key: K) -> Result<Option<E>> {
        let key = key.into();
        self.session
            .transact(TransactionDefinition::read_only(), || self.find::<E>(key))
    }

    fn refresh<E: Entity>(&self, entity: E) -> Result<E> {
        self.session
            .transact(TransactionDefinition::read_only(), || self.reload(entity))
    }

    fn refresh_attributes<E: Entity>(&self, entity: E, attributes: &[&str]) -> Result<E> {
        let entity_type = self.entity_type::<E>()?;
        let positions = attributes
            .iter()
            .map(|name| {
                entity_type
                    .position_of(name)
                    .ok_or_else(|| StoreError::ColumnNotFound(name.to_string(), E::TABLE.to_string()))
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut row = entity.to_row();
        let fresh = self.refresh(entity)?.to_row();
        for position in positions {
            row[position] = fresh[position].clone();
        }
        E::from_row(&row)
    }

    fn refresh_many<E: Entity>(&self, entities: Vec<E>) -> Result<Vec<E>> {
        self.session.transact(TransactionDefinition::read_only(), || {
            entities.into_iter().map(|entity| self.reload(entity)).collect()
        })
    }

    fn refresh_all<E: Entity>(&self, entity: E) -> Result<E> {
        self.refresh(entity)
    }

    fn select<E: Entity>(&self) -> Result<Selection<Box<dyn QueryResult<E>>>> {
        let entity_type = self.entity_type::<E>()?;
        let columns = entity_type.attributes().iter().map(|a| a.name.clone()).collect();
        let session = Arc::clone(&self.session);
        let mapper = self.entity_mapper::<E>();

        Ok(Selection::new(
            QueryElement::select(E::TABLE, columns),
            move |element| {
                Ok(Box::new(SqlResult::new(Arc::clone(&session), element, Arc::clone(&mapper)))
                    as Box<dyn QueryResult<E>>)
            },
        ))
    }

    fn select_tuples(&self, table: &str, columns: &[&str]) -> Result<Selection<Box<dyn QueryResult<Tuple>>>> {
        if !self.configuration().model().contains(table) {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        let names: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
        let shared = Arc::new(names.clone());
        let mapper: RowMapper<Tuple> = Arc::new(move |row| Ok(Tuple::new(Arc::clone(&shared), row)));
        let session = Arc::clone(&self.session);

        Ok(Selection::new(
            QueryElement::select(table, names),
            move |element| {
                Ok(Box::new(SqlResult::new(Arc::clone(&session), element, Arc::clone(&mapper)))
                    as Box<dyn QueryResult<Tuple>>)
            },
        ))
    }

    fn count<E: Entity>(&self) -> Selection<Box<dyn Scalar<i64>>> {
        let session = Arc::clone(&self.session);
        Selection::new(QueryElement::count(E::TABLE), move |element| {
            Ok(Box::new(SqlScalar::new(Arc::clone(&session), element)) as Box<dyn Scalar<i64>>)
        })
    }

    fn run_in_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.session.transact(TransactionDefinition::read_write(), body)
    }

    fn run_in_transaction_with<V, F>(&self, body: F, isolation: IsolationLevel) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.session.transact(
            TransactionDefinition::read_write().with_isolation(isolation),
            body,
        )
    }

    fn with_transaction<V, F>(&self, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>,
    {
        self.session
            .transact(TransactionDefinition::read_write(), || body(self))
    }

    fn with_transaction_isolation<V, F>(&self, isolation: IsolationLevel, body: F) -> Result<V>
    where
        F: FnOnce(&Self) -> Result<V>,
    {
        self.session.transact(
            TransactionDefinition::read_write().with_isolation(isolation),
            || body(self),
        )
    }

    fn to_blocking(&self) -> &Self {
        self
    }
}
