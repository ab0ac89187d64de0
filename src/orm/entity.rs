use crate::connection::DataSource;
use crate::core::{Column, Result, Row, StoreError, Value};
use std::fmt;

/// Attribute of a persistent type; same shape as a table column
pub type Attribute = Column;

/// Type mapped to one table
///
/// `to_row` and `from_row` use the order of `attributes()`. Exactly one
/// attribute must be the key.
pub trait Entity: Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn attributes() -> Vec<Attribute>;

    fn key(&self) -> Value;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;
}

/// Runtime description of an entity type
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    table: String,
    attributes: Vec<Attribute>,
}

impl EntityType {
    pub fn of<E: Entity>() -> Self {
        Self {
            table: E::TABLE.to_string(),
            attributes: E::attributes(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn key_attribute(&self) -> Result<&Attribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.primary_key)
            .ok_or_else(|| {
                StoreError::InvalidConfiguration(format!("Entity '{}' has no key attribute", self.table))
            })
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.name.eq_ignore_ascii_case(name))
    }

    fn validate(&self) -> Result<()> {
        let keys = self.attributes.iter().filter(|a| a.primary_key).count();
        if keys != 1 {
            return Err(StoreError::InvalidConfiguration(format!(
                "Entity '{}' must declare exactly one key attribute, found {}",
                self.table, keys
            )));
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this type
    pub fn create_table_sql(
        &self,
        table_name: &dyn Fn(&str) -> String,
        column_name: &dyn Fn(&str) -> String,
    ) -> String {
        let columns: Vec<String> = self
            .attributes
            .iter()
            .map(|attribute| {
                let mut definition = format!(
                    "{} {}",
                    column_name(&attribute.name),
                    attribute.data_type.sql_name()
                );
                if attribute.primary_key {
                    definition.push_str(" PRIMARY KEY");
                } else if !attribute.nullable {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table_name(&self.table),
            columns.join(", ")
        )
    }
}

/// Named set of entity types sharing one schema
#[derive(Debug, Clone, Default)]
pub struct EntityModel {
    name: String,
    types: Vec<EntityType>,
}

impl EntityModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn with<E: Entity>(mut self) -> Self {
        self.types.push(EntityType::of::<E>());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &[EntityType] {
        &self.types
    }

    pub fn contains(&self, table: &str) -> bool {
        self.entity_type(table).is_some()
    }

    pub fn entity_type(&self, table: &str) -> Option<&EntityType> {
        self.types
            .iter()
            .find(|entity_type| entity_type.table.eq_ignore_ascii_case(table))
    }

    pub fn validate(&self) -> Result<()> {
        for entity_type in &self.types {
            entity_type.validate()?;
        }
        Ok(())
    }

    /// Create every table of the model through one connection
    pub fn create_tables(&self, data_source: &dyn DataSource) -> Result<()> {
        self.validate()?;
        let connection = data_source.connection()?;
        let statement = connection.create_statement()?;

        let identity = |name: &str| name.to_string();
        let result = self.types.iter().try_for_each(|entity_type| {
            statement
                .execute(&entity_type.create_table_sql(&identity, &identity))
                .map(|_| ())
        });

        statement.close()?;
        connection.close()?;
        result
    }
}

impl fmt::Display for EntityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.name)?;
        for (i, entity_type) in self.types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", entity_type.table)?;
        }
        write!(f, "]")
    }
}

/// Reads attribute `index` of a row, naming the attribute on mismatch
pub fn column_value(row: &Row, index: usize, name: &str) -> Result<Value> {
    row.get(index)
        .cloned()
        .ok_or_else(|| StoreError::ColumnNotFound(name.to_string(), "entity row".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::MemoryDataSource;

    #[derive(Debug, Clone, PartialEq)]
    struct Book {
        isbn: String,
        title: String,
        pages: Option<i64>,
    }

    impl Entity for Book {
        const TABLE: &'static str = "books";

        fn attributes() -> Vec<Attribute> {
            vec![
                Attribute::new("isbn", DataType::Text).primary_key(),
                Attribute::new("title", DataType::Text).not_null(),
                Attribute::new("pages", DataType::Integer),
            ]
        }

        fn key(&self) -> Value {
            Value::from(self.isbn.as_str())
        }

        fn to_row(&self) -> Row {
            vec![
                Value::from(self.isbn.as_str()),
                Value::from(self.title.as_str()),
                Value::from(self.pages),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                isbn: column_value(row, 0, "isbn")?.to_string(),
                title: column_value(row, 1, "title")?.to_string(),
                pages: column_value(row, 2, "pages")?.as_i64(),
            })
        }
    }

    #[test]
    fn test_entity_type_describes_table() {
        let entity_type = EntityType::of::<Book>();

        assert_eq!(entity_type.table(), "books");
        assert_eq!(entity_type.key_attribute().unwrap().name, "isbn");
        assert_eq!(entity_type.position_of("PAGES"), Some(2));

        let identity = |name: &str| name.to_string();
        assert_eq!(
            entity_type.create_table_sql(&identity, &identity),
            "CREATE TABLE IF NOT EXISTS books (isbn TEXT PRIMARY KEY, title TEXT NOT NULL, pages INTEGER)"
        );
    }

    #[test]
    fn test_model_creates_tables_once() {
        let source = MemoryDataSource::new("model");
        let model = EntityModel::new("library").with::<Book>();

        model.create_tables(&source).unwrap();
        model.create_tables(&source).unwrap();

        assert_eq!(source.database().table_names().unwrap(), vec!["books".to_string()]);
        assert_eq!(source.stats().active, 0);
        assert_eq!(model.to_string(), "library [books]");
    }

    #[test]
    fn test_model_rejects_missing_key() {
        #[derive(Clone)]
        struct Keyless;

        impl Entity for Keyless {
            const TABLE: &'static str = "keyless";

            fn attributes() -> Vec<Attribute> {
                vec![Attribute::new("value", DataType::Integer)]
            }

            fn key(&self) -> Value {
                Value::Null
            }

            fn to_row(&self) -> Row {
                vec![Value::Null]
            }

            fn from_row(_row: &Row) -> Result<Self> {
                Ok(Keyless)
            }
        }

        let model = EntityModel::new("broken").with::<Keyless>();
        assert!(matches!(
            model.validate(),
            Err(StoreError::InvalidConfiguration(_))
        ));
    }
}
