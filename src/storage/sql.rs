// ============================================================================
// SQL Command Parser
// ============================================================================
//
// Converts sqlparser's AST into the small command set the in-memory driver
// executes. Placeholders (`?` or `$n`) become positional parameters,
// numbered in the order they appear in the text.
//
// ============================================================================

use crate::core::{Column, DataType, Result, StoreError, Value};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTable {
        name: String,
        columns: Vec<Column>,
        if_not_exists: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Operand>>,
        on_conflict: OnConflict,
    },
    Update {
        table: String,
        assignments: Vec<(String, Operand)>,
        filter: Vec<Predicate>,
    },
    Delete {
        table: String,
        filter: Vec<Predicate>,
    },
    Select(Select),
}

impl Command {
    pub fn is_write(&self) -> bool {
        !matches!(self, Command::Select(_))
    }

    /// Number of positional parameters referenced by the command
    pub fn parameter_count(&self) -> usize {
        let operands: Vec<&Operand> = match self {
            Command::CreateTable { .. } | Command::DropTable { .. } => Vec::new(),
            Command::Insert { rows, .. } => rows.iter().flatten().collect(),
            Command::Update {
                assignments,
                filter,
                ..
            } => assignments
                .iter()
                .map(|(_, operand)| operand)
                .chain(filter.iter().map(|p| &p.operand))
                .collect(),
            Command::Delete { filter, .. } => filter.iter().map(|p| &p.operand).collect(),
            Command::Select(select) => select.filter.iter().map(|p| &p.operand).collect(),
        };

        operands
            .into_iter()
            .filter_map(|operand| match operand {
                Operand::Parameter(index) => Some(index + 1),
                Operand::Literal(_) => None,
            })
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub projection: Projection,
    pub filter: Vec<Predicate>,
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Fail,
    Ignore,
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// Zero-based parameter position
    Parameter(usize),
}

impl Operand {
    pub fn resolve(&self, params: &[Value]) -> Result<Value> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Parameter(index) => params.get(*index).cloned().ok_or_else(|| {
                StoreError::ExecutionError(format!("No value bound for parameter {}", index + 1))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// `column <op> operand`; a filter is the conjunction of its predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub operand: Operand,
}

pub fn parse(sql: &str) -> Result<Vec<Command>> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| StoreError::ParseError(e.to_string()))?;

    let mut converter = Converter::default();
    statements
        .into_iter()
        .map(|statement| converter.convert_statement(statement))
        .collect()
}

#[derive(Default)]
struct Converter {
    next_parameter: usize,
}

impl Converter {
    fn convert_statement(&mut self, stmt: sql_ast::Statement) -> Result<Command> {
        match stmt {
            sql_ast::Statement::CreateTable(create) => self.convert_create_table(create),
            sql_ast::Statement::Drop {
                object_type,
                names,
                if_exists,
                ..
            } => {
                if !matches!(object_type, sql_ast::ObjectType::Table) {
                    return Err(StoreError::UnsupportedOperation(format!(
                        "Only DROP TABLE supported, got: {:?}",
                        object_type
                    )));
                }
                if names.len() != 1 {
                    return Err(StoreError::UnsupportedOperation(
                        "Only single table DROP supported".into(),
                    ));
                }
                Ok(Command::DropTable {
                    name: extract_table_name(&names[0])?,
                    if_exists,
                })
            }
            sql_ast::Statement::Insert(insert) => self.convert_insert(insert),
            sql_ast::Statement::Query(query) => Ok(Command::Select(self.convert_query(*query)?)),
            sql_ast::Statement::Delete(delete) => self.convert_delete(delete),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.convert_update(table, assignments, selection),
            _ => Err(StoreError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                stmt
            ))),
        }
    }

    fn convert_create_table(&mut self, create: sql_ast::CreateTable) -> Result<Command> {
        let name = extract_table_name(&create.name)?;
        let columns = create
            .columns
            .into_iter()
            .map(convert_column_def)
            .collect::<Result<Vec<_>>>()?;

        Ok(Command::CreateTable {
            name,
            columns,
            if_not_exists: create.if_not_exists,
        })
    }

    fn convert_insert(&mut self, insert: sql_ast::Insert) -> Result<Command> {
        let table = normalize(&insert.table.to_string());

        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(
                insert
                    .columns
                    .into_iter()
                    .map(|id| id.value.to_lowercase())
                    .collect(),
            )
        };

        let Some(source) = insert.source else {
            return Err(StoreError::UnsupportedOperation(
                "INSERT requires a VALUES clause".into(),
            ));
        };
        let sql_ast::SetExpr::Values(values) = *source.body else {
            return Err(StoreError::UnsupportedOperation(
                "Only VALUES clause supported".into(),
            ));
        };

        let rows = values
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|expr| self.convert_operand(expr))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let on_conflict = match insert.on {
            None => OnConflict::Fail,
            Some(sql_ast::OnInsert::OnConflict(conflict)) => match conflict.action {
                sql_ast::OnConflictAction::DoNothing => OnConflict::Ignore,
                sql_ast::OnConflictAction::DoUpdate(_) => OnConflict::Replace,
            },
            Some(_) => OnConflict::Replace,
        };

        Ok(Command::Insert {
            table,
            columns,
            rows,
            on_conflict,
        })
    }

    fn convert_update(
        &mut self,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<Command> {
        let table = match table.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(&name)?,
            _ => {
                return Err(StoreError::UnsupportedOperation(
                    "Complex table references not supported in UPDATE".into(),
                ));
            }
        };

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        normalize(&col_name.0[0].to_string())
                    }
                    _ => {
                        return Err(StoreError::UnsupportedOperation(
                            "Only simple column names supported in UPDATE".into(),
                        ));
                    }
                };
                Ok((column, self.convert_operand(assign.value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = self.convert_filter(selection)?;

        Ok(Command::Update {
            table,
            assignments,
            filter,
        })
    }

    fn convert_delete(&mut self, delete: sql_ast::Delete) -> Result<Command> {
        let tables = match delete.from {
            sql_ast::FromTable::WithFromKeyword(tables) => tables,
            sql_ast::FromTable::WithoutKeyword(tables) => tables,
        };
        let Some(first) = tables.first() else {
            return Err(StoreError::ParseError("DELETE requires a table".into()));
        };
        let table = match &first.relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => {
                return Err(StoreError::UnsupportedOperation(
                    "Complex table references not supported in DELETE".into(),
                ));
            }
        };

        let filter = self.convert_filter(delete.selection)?;
        Ok(Command::Delete { table, filter })
    }

    fn convert_query(&mut self, query: sql_ast::Query) -> Result<Select> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(StoreError::UnsupportedOperation(
                "Only SELECT queries supported".into(),
            ));
        };
        let select = *select;

        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(StoreError::UnsupportedOperation(
                "SELECT must read exactly one table".into(),
            ));
        }
        let table = match &select.from[0].relation {
            sql_ast::TableFactor::Table { name, .. } => extract_table_name(name)?,
            _ => {
                return Err(StoreError::UnsupportedOperation(
                    "Complex table references not supported".into(),
                ));
            }
        };

        let projection = convert_projection(select.projection)?;
        let filter = self.convert_filter(select.selection)?;

        let mut order_by = Vec::new();
        if let Some(order) = query.order_by {
            match order.kind {
                sql_ast::OrderByKind::Expressions(exprs) => {
                    for expr in exprs {
                        let column = identifier(&expr.expr)?;
                        let descending = expr.options.asc.map(|asc| !asc).unwrap_or(false);
                        order_by.push((column, descending));
                    }
                }
                sql_ast::OrderByKind::All(_) => {
                    return Err(StoreError::UnsupportedOperation(
                        "ORDER BY ALL not supported".into(),
                    ));
                }
            }
        }

        let (limit, offset) = match query.limit_clause {
            None => (None, None),
            Some(sql_ast::LimitClause::LimitOffset { limit, offset, .. }) => (
                limit.as_ref().map(number).transpose()?,
                offset.as_ref().map(|o| number(&o.value)).transpose()?,
            ),
            Some(sql_ast::LimitClause::OffsetCommaLimit { offset, limit }) => {
                (Some(number(&limit)?), Some(number(&offset)?))
            }
        };

        Ok(Select {
            table,
            projection,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn convert_filter(&mut self, selection: Option<sql_ast::Expr>) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        if let Some(expr) = selection {
            self.collect_predicates(expr, &mut predicates)?;
        }
        Ok(predicates)
    }

    fn collect_predicates(&mut self, expr: sql_ast::Expr, out: &mut Vec<Predicate>) -> Result<()> {
        match expr {
            sql_ast::Expr::Nested(inner) => self.collect_predicates(*inner, out),
            sql_ast::Expr::BinaryOp {
                left,
                op: sql_ast::BinaryOperator::And,
                right,
            } => {
                self.collect_predicates(*left, out)?;
                self.collect_predicates(*right, out)
            }
            sql_ast::Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    sql_ast::BinaryOperator::Eq => CompareOp::Eq,
                    sql_ast::BinaryOperator::NotEq => CompareOp::NotEq,
                    sql_ast::BinaryOperator::Lt => CompareOp::Lt,
                    sql_ast::BinaryOperator::LtEq => CompareOp::LtEq,
                    sql_ast::BinaryOperator::Gt => CompareOp::Gt,
                    sql_ast::BinaryOperator::GtEq => CompareOp::GtEq,
                    other => {
                        return Err(StoreError::UnsupportedOperation(format!(
                            "Unsupported operator in WHERE: {}",
                            other
                        )));
                    }
                };
                let column = identifier(&left)?;
                let operand = self.convert_operand(*right)?;
                out.push(Predicate {
                    column,
                    op,
                    operand,
                });
                Ok(())
            }
            other => Err(StoreError::UnsupportedOperation(format!(
                "Unsupported WHERE expression: {}",
                other
            ))),
        }
    }

    fn convert_operand(&mut self, expr: sql_ast::Expr) -> Result<Operand> {
        match expr {
            sql_ast::Expr::Value(value) => match value.value {
                sql_ast::Value::Placeholder(text) => self.parameter(&text),
                other => Ok(Operand::Literal(literal(&other)?)),
            },
            sql_ast::Expr::UnaryOp {
                op: sql_ast::UnaryOperator::Minus,
                expr,
            } => match self.convert_operand(*expr)? {
                Operand::Literal(Value::Integer(i)) => Ok(Operand::Literal(Value::Integer(-i))),
                Operand::Literal(Value::Float(f)) => Ok(Operand::Literal(Value::Float(-f))),
                _ => Err(StoreError::UnsupportedOperation(
                    "Unary minus applies to numeric literals only".into(),
                )),
            },
            sql_ast::Expr::Nested(inner) => self.convert_operand(*inner),
            other => Err(StoreError::UnsupportedOperation(format!(
                "Unsupported value expression: {}",
                other
            ))),
        }
    }

    fn parameter(&mut self, text: &str) -> Result<Operand> {
        if let Some(position) = text.strip_prefix('$') {
            let position: usize = position
                .parse()
                .map_err(|_| StoreError::ParseError(format!("Invalid placeholder: {}", text)))?;
            if position == 0 {
                return Err(StoreError::ParseError("Placeholders start at $1".into()));
            }
            return Ok(Operand::Parameter(position - 1));
        }

        let index = self.next_parameter;
        self.next_parameter += 1;
        Ok(Operand::Parameter(index))
    }
}

fn convert_column_def(col: sql_ast::ColumnDef) -> Result<Column> {
    let data_type = convert_data_type(&col.data_type)?;
    let mut column = Column::new(col.name.value.to_lowercase(), data_type);

    for option in &col.options {
        if matches!(option.option, sql_ast::ColumnOption::NotNull) {
            column = column.not_null();
        } else if option.option.to_string().to_uppercase().contains("PRIMARY KEY") {
            column = column.primary_key();
        }
    }

    Ok(column)
}

fn convert_data_type(dt: &sql_ast::DataType) -> Result<DataType> {
    match dt {
        sql_ast::DataType::Int(_) | sql_ast::DataType::Integer(_) | sql_ast::DataType::BigInt(_) => {
            Ok(DataType::Integer)
        }

        sql_ast::DataType::Float(_) | sql_ast::DataType::Double(_) | sql_ast::DataType::Real => {
            Ok(DataType::Float)
        }

        sql_ast::DataType::Text
        | sql_ast::DataType::Varchar(_)
        | sql_ast::DataType::Char(_)
        | sql_ast::DataType::String(_) => Ok(DataType::Text),

        sql_ast::DataType::Boolean | sql_ast::DataType::Bool => Ok(DataType::Boolean),

        _ => Err(StoreError::TypeMismatch(format!(
            "Unsupported data type: {}",
            dt
        ))),
    }
}

fn convert_projection(items: Vec<sql_ast::SelectItem>) -> Result<Projection> {
    let mut columns = Vec::new();
    for item in items {
        match item {
            sql_ast::SelectItem::Wildcard(_) => return Ok(Projection::All),
            sql_ast::SelectItem::UnnamedExpr(sql_ast::Expr::Function(func))
                if func.name.to_string().eq_ignore_ascii_case("count") =>
            {
                return Ok(Projection::Count);
            }
            sql_ast::SelectItem::UnnamedExpr(expr) => columns.push(identifier(&expr)?),
            sql_ast::SelectItem::ExprWithAlias { expr, .. } => columns.push(identifier(&expr)?),
            other => {
                return Err(StoreError::UnsupportedOperation(format!(
                    "Unsupported projection: {}",
                    other
                )));
            }
        }
    }
    Ok(Projection::Columns(columns))
}

fn identifier(expr: &sql_ast::Expr) -> Result<String> {
    match expr {
        sql_ast::Expr::Identifier(ident) => Ok(ident.value.to_lowercase()),
        sql_ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.to_lowercase())
            .ok_or_else(|| StoreError::ParseError("Empty identifier".into())),
        other => Err(StoreError::UnsupportedOperation(format!(
            "Expected a column name, got: {}",
            other
        ))),
    }
}

fn literal(value: &sql_ast::Value) -> Result<Value> {
    match value {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Integer(i))
            } else {
                n.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| StoreError::ParseError(format!("Invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) => Ok(Value::Text(s.clone())),
        sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        other => Err(StoreError::UnsupportedOperation(format!(
            "Unsupported literal: {}",
            other
        ))),
    }
}

fn number(expr: &sql_ast::Expr) -> Result<usize> {
    match expr {
        sql_ast::Expr::Value(value) => match &value.value {
            sql_ast::Value::Number(n, _) => n
                .parse::<usize>()
                .map_err(|_| StoreError::ParseError(format!("Invalid LIMIT/OFFSET value: {}", n))),
            other => Err(StoreError::UnsupportedOperation(format!(
                "Only numeric LIMIT/OFFSET supported, got: {}",
                other
            ))),
        },
        other => Err(StoreError::UnsupportedOperation(format!(
            "Only numeric LIMIT/OFFSET supported, got: {}",
            other
        ))),
    }
}

fn extract_table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| normalize(&ident.to_string()))
        .ok_or_else(|| StoreError::ParseError("Empty table name".into()))
}

fn normalize(identifier: &str) -> String {
    identifier.trim_matches('"').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(sql: &str) -> Command {
        let mut commands = parse(sql).unwrap();
        assert_eq!(commands.len(), 1);
        commands.remove(0)
    }

    #[test]
    fn test_create_table_with_primary_key() {
        let Command::CreateTable { name, columns, if_not_exists } =
            single("CREATE TABLE IF NOT EXISTS Test_Data (uid TEXT PRIMARY KEY, score INTEGER NOT NULL)")
        else {
            panic!("expected CREATE TABLE");
        };

        assert_eq!(name, "test_data");
        assert!(if_not_exists);
        assert!(columns[0].primary_key);
        assert!(!columns[1].nullable);
        assert_eq!(columns[1].data_type, DataType::Integer);
    }

    #[test]
    fn test_placeholders_are_numbered_in_text_order() {
        let command = single("UPDATE t SET name = ? WHERE id = ? AND age > ?");
        assert_eq!(command.parameter_count(), 3);

        let Command::Update { assignments, filter, .. } = command else {
            panic!("expected UPDATE");
        };
        assert_eq!(assignments[0].1, Operand::Parameter(0));
        assert_eq!(filter[0].operand, Operand::Parameter(1));
        assert_eq!(filter[1].op, CompareOp::Gt);
        assert_eq!(filter[1].operand, Operand::Parameter(2));
    }

    #[test]
    fn test_question_mark_placeholders_in_insert_and_select() {
        let Command::Insert { rows, .. } =
            single("INSERT INTO books (id, title, pages) VALUES (?, ?, ?)")
        else {
            panic!("expected INSERT");
        };
        assert_eq!(
            rows[0],
            vec![Operand::Parameter(0), Operand::Parameter(1), Operand::Parameter(2)]
        );

        let Command::Select(select) = single("SELECT * FROM books WHERE id = ? LIMIT 1") else {
            panic!("expected SELECT");
        };
        assert_eq!(select.filter[0].operand, Operand::Parameter(0));

        let upsert = single(
            "INSERT INTO books (id, title) VALUES (?, ?) ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title",
        );
        assert_eq!(upsert.parameter_count(), 2);
    }

    #[test]
    fn test_upsert_detection() {
        let Command::Insert { on_conflict, .. } =
            single("INSERT INTO t (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
        else {
            panic!("expected INSERT");
        };
        assert_eq!(on_conflict, OnConflict::Ignore);

        let Command::Insert { on_conflict, .. } = single(
            "INSERT INTO t (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        ) else {
            panic!("expected INSERT");
        };
        assert_eq!(on_conflict, OnConflict::Replace);
    }

    #[test]
    fn test_select_with_order_limit_offset() {
        let Command::Select(select) =
            single("SELECT id, name FROM t WHERE id >= -5 ORDER BY name DESC LIMIT 10 OFFSET 2")
        else {
            panic!("expected SELECT");
        };

        assert_eq!(select.projection, Projection::Columns(vec!["id".into(), "name".into()]));
        assert_eq!(select.filter[0].operand, Operand::Literal(Value::Integer(-5)));
        assert_eq!(select.order_by, vec![("name".to_string(), true)]);
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.offset, Some(2));
    }

    #[test]
    fn test_count_projection() {
        let Command::Select(select) = single("SELECT COUNT(*) FROM t") else {
            panic!("expected SELECT");
        };
        assert_eq!(select.projection, Projection::Count);
        assert!(!Command::Select(select).is_write());
    }

    #[test]
    fn test_unsupported_statement() {
        assert!(matches!(
            parse("CREATE VIEW v AS SELECT * FROM t"),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }
}
