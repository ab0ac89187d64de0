use super::configuration::Configuration;
use crate::core::{Result, Row, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

/// What a query reads
#[derive(Debug, Clone, PartialEq)]
pub enum QueryProjection {
    Columns(Vec<String>),
    Count,
}

/// Description of a single-table query, independent of its execution
#[derive(Debug, Clone, PartialEq)]
pub struct QueryElement {
    pub table: String,
    pub projection: QueryProjection,
    pub conditions: Vec<Condition>,
    pub ordering: Vec<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryElement {
    pub fn select(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            projection: QueryProjection::Columns(columns),
            conditions: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn count(table: impl Into<String>) -> Self {
        Self {
            projection: QueryProjection::Count,
            ..Self::select(table, Vec::new())
        }
    }

    pub fn columns(&self) -> &[String] {
        match &self.projection {
            QueryProjection::Columns(columns) => columns,
            QueryProjection::Count => &[],
        }
    }

    /// Render as SQL with `?` placeholders, names mapped through the configuration
    pub fn to_sql(&self, configuration: &Configuration) -> (String, Vec<Value>) {
        let projection = match &self.projection {
            QueryProjection::Count => "COUNT(*)".to_string(),
            QueryProjection::Columns(columns) if columns.is_empty() => "*".to_string(),
            QueryProjection::Columns(columns) => columns
                .iter()
                .map(|column| configuration.column_name(column))
                .collect::<Vec<_>>()
                .join(", "),
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection,
            configuration.table_name(&self.table)
        );
        let mut params = Vec::with_capacity(self.conditions.len());

        for (i, condition) in self.conditions.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!(
                "{} {} ?",
                configuration.column_name(&condition.column),
                condition.operator.as_sql()
            ));
            params.push(condition.value.clone());
        }

        if !self.ordering.is_empty() {
            let ordering: Vec<String> = self
                .ordering
                .iter()
                .map(|(column, order)| {
                    let direction = match order {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    format!("{} {}", configuration.column_name(column), direction)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        (sql, params)
    }
}

type Factory<R> = Arc<dyn Fn(QueryElement) -> Result<R> + Send + Sync>;

/// Lazily built query whose `get()` produces the result object
///
/// Nothing touches the database until the result is materialized.
pub struct Selection<R> {
    element: QueryElement,
    factory: Factory<R>,
}

impl<R: 'static> Selection<R> {
    pub fn new<F>(element: QueryElement, factory: F) -> Self
    where
        F: Fn(QueryElement) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            element,
            factory: Arc::new(factory),
        }
    }

    pub fn element(&self) -> &QueryElement {
        &self.element
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    pub fn where_op(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.element.conditions.push(Condition {
            column: column.into(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.element.ordering.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.element.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.element.offset = Some(offset);
        self
    }

    pub fn get(&self) -> Result<R> {
        (self.factory)(self.element.clone())
    }

    /// Map the eventual result through `transform`
    pub fn extend<T, F>(self, transform: F) -> Selection<T>
    where
        T: 'static,
        F: Fn(R) -> T + Send + Sync + 'static,
    {
        let factory = self.factory;
        Selection {
            element: self.element,
            factory: Arc::new(move |element| factory(element).map(&transform)),
        }
    }
}

impl<R> fmt::Debug for Selection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("element", &self.element)
            .finish_non_exhaustive()
    }
}

/// Row of a projection query
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    columns: Arc<Vec<String>>,
    values: Row,
}

impl Tuple {
    pub fn new(columns: Arc<Vec<String>>, values: Row) -> Self {
        Self { columns, values }
    }

    /// Value at a 0-based position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{ConfigurationBuilder, EntityModel};
    use crate::storage::MemoryDataSource;

    fn configuration() -> Configuration {
        ConfigurationBuilder::new(
            Arc::new(MemoryDataSource::new("query")),
            Arc::new(EntityModel::new("query")),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_to_sql() {
        let selection = Selection::new(
            QueryElement::select("people", vec!["id".into(), "name".into()]),
            |element| Ok(element),
        )
        .where_eq("name", "ada")
        .where_op("age", Operator::GtEq, 18)
        .order_by("id", Order::Desc)
        .limit(5)
        .offset(10);

        let (sql, params) = selection.element().to_sql(&configuration());
        assert_eq!(
            sql,
            "SELECT id, name FROM people WHERE name = ? AND age >= ? ORDER BY id DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(params, vec![Value::from("ada"), Value::from(18)]);
    }

    #[test]
    fn test_count_sql() {
        let (sql, params) = QueryElement::count("people").to_sql(&configuration());
        assert_eq!(sql, "SELECT COUNT(*) FROM people");
        assert!(params.is_empty());
    }

    #[test]
    fn test_extend_is_lazy_and_composes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let selection = Selection::new(QueryElement::count("people"), move |element| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(element.table)
        })
        .extend(|table| table.len())
        .extend(|len| len * 2);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(selection.get().unwrap(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tuple_lookup() {
        let tuple = Tuple::new(
            Arc::new(vec!["id".into(), "name".into()]),
            vec![Value::from(1), Value::from("ada")],
        );
        assert_eq!(tuple.get_by_name("NAME"), Some(&Value::from("ada")));
        assert_eq!(tuple.get(0), Some(&Value::from(1)));
        assert_eq!(tuple.get_by_name("missing"), None);
    }
}
