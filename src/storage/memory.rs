// ============================================================================
// In-Memory Database
// ============================================================================
//
// Committed tables live behind one RwLock. Connections in manual-commit mode
// work on a private copy of the tables and record every modification as a
// `Change`; commit replays the log onto the committed tables all-or-nothing.
//
// ============================================================================

use super::sql::{Command, OnConflict, Projection, Select};
use super::table::Table;
use crate::core::{Result, Row, StoreError, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

pub type Tables = HashMap<String, Table>;

/// A single replayable modification
#[derive(Debug, Clone)]
pub enum Change {
    CreateTable { table: Table },
    DropTable { name: String },
    InsertRow { table: String, row: Row },
    UpdateRow { table: String, old_row: Row, new_row: Row },
    DeleteRow { table: String, old_row: Row },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::CreateTable { table } => table.name(),
            Change::DropTable { name } => name,
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. } | Change::DropTable { .. })
    }

    pub fn apply(&self, tables: &mut Tables) -> Result<()> {
        match self {
            Change::CreateTable { table } => {
                if tables.contains_key(table.name()) {
                    return Err(StoreError::TableExists(table.name().to_string()));
                }
                tables.insert(table.name().to_string(), table.clone());
                Ok(())
            }
            Change::DropTable { name } => {
                tables.remove(name);
                Ok(())
            }
            Change::InsertRow { table, row } => table_mut(tables, table)?.insert(row.clone()),
            Change::UpdateRow {
                table,
                old_row,
                new_row,
            } => {
                let target = table_mut(tables, table)?;
                let position = target.position_of(old_row).ok_or_else(|| {
                    StoreError::ConstraintViolation(format!(
                        "Row in table '{}' was modified by a concurrent transaction",
                        table
                    ))
                })?;
                target.replace(position, new_row.clone())
            }
            Change::DeleteRow { table, old_row } => {
                let target = table_mut(tables, table)?;
                if let Some(position) = target.position_of(old_row) {
                    target.remove(position);
                }
                Ok(())
            }
        }
    }
}

/// Column names plus rows, as returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Everything one command produced
#[derive(Debug, Default)]
pub struct Outcome {
    pub rows: Option<RowSet>,
    pub update_count: u64,
    pub generated_keys: RowSet,
    pub changes: Vec<Change>,
}

pub struct MemoryDatabase {
    name: String,
    tables: RwLock<Tables>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let tables = self.tables.read()?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Committed row count of a table
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read()?;
        tables
            .get(&table.to_lowercase())
            .map(Table::row_count)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    pub(crate) fn snapshot(&self) -> Result<Tables> {
        Ok(self.tables.read()?.clone())
    }

    /// Run a command directly against the committed tables
    pub(crate) fn execute(&self, command: &Command, params: &[Value]) -> Result<Outcome> {
        if !command.is_write() {
            let tables = self.tables.read()?;
            return query(command, params, &tables);
        }
        let mut tables = self.tables.write()?;
        execute_atomic(command, params, &mut tables)
    }

    /// Replay a transaction's change log; nothing is applied if any change fails
    pub(crate) fn apply(&self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write()?;
        let mut next = tables.clone();
        for change in changes {
            change.apply(&mut next)?;
        }
        *tables = next;
        Ok(())
    }
}

/// Execute a command so that a failure leaves `tables` untouched
pub(crate) fn execute_atomic(
    command: &Command,
    params: &[Value],
    tables: &mut Tables,
) -> Result<Outcome> {
    if !command.is_write() {
        return query(command, params, tables);
    }
    let mut next = tables.clone();
    let outcome = execute(command, params, &mut next)?;
    *tables = next;
    Ok(outcome)
}

fn query(command: &Command, params: &[Value], tables: &Tables) -> Result<Outcome> {
    match command {
        Command::Select(select) => Ok(Outcome {
            rows: Some(run_select(select, params, tables)?),
            ..Outcome::default()
        }),
        _ => Err(StoreError::ExecutionError(
            "Write command passed to the query path".into(),
        )),
    }
}

fn execute(command: &Command, params: &[Value], tables: &mut Tables) -> Result<Outcome> {
    let expected = command.parameter_count();
    if params.len() < expected {
        return Err(StoreError::ExecutionError(format!(
            "Statement expects {} parameters, {} bound",
            expected,
            params.len()
        )));
    }

    match command {
        Command::CreateTable {
            name,
            columns,
            if_not_exists,
        } => {
            if tables.contains_key(name) {
                if *if_not_exists {
                    return Ok(Outcome::default());
                }
                return Err(StoreError::TableExists(name.clone()));
            }
            if columns.iter().filter(|c| c.primary_key).count() > 1 {
                return Err(StoreError::UnsupportedOperation(
                    "Composite primary keys are not supported".into(),
                ));
            }
            let table = Table::new(name.clone(), columns.clone());
            tables.insert(name.clone(), table.clone());
            Ok(Outcome {
                changes: vec![Change::CreateTable { table }],
                ..Outcome::default()
            })
        }

        Command::DropTable { name, if_exists } => {
            if tables.remove(name).is_none() {
                if *if_exists {
                    return Ok(Outcome::default());
                }
                return Err(StoreError::TableNotFound(name.clone()));
            }
            Ok(Outcome {
                changes: vec![Change::DropTable { name: name.clone() }],
                ..Outcome::default()
            })
        }

        Command::Insert {
            table,
            columns,
            rows,
            on_conflict,
        } => {
            let target = table_mut(tables, table)?;
            let targets = match columns {
                Some(names) => names
                    .iter()
                    .map(|name| target.column_index(name))
                    .collect::<Result<Vec<_>>>()?,
                None => (0..target.columns().len()).collect(),
            };

            let mut outcome = Outcome::default();
            let mut keys = Vec::new();

            for operands in rows {
                if operands.len() != targets.len() {
                    return Err(StoreError::ExecutionError(format!(
                        "INSERT has {} target columns but {} values",
                        targets.len(),
                        operands.len()
                    )));
                }
                let values = operands
                    .iter()
                    .map(|operand| operand.resolve(params))
                    .collect::<Result<Vec<_>>>()?;

                let mut row = vec![Value::Null; target.columns().len()];
                for (index, value) in targets.iter().zip(&values) {
                    row[*index] = value.clone();
                }

                let existing = target
                    .key_index()
                    .and_then(|key| target.position_by_key(&row[key]));

                match (existing, on_conflict) {
                    (Some(_), OnConflict::Ignore) => continue,
                    (Some(position), OnConflict::Replace) => {
                        let old_row = target.rows()[position].clone();
                        let mut new_row = old_row.clone();
                        for (index, value) in targets.iter().zip(values) {
                            new_row[*index] = value;
                        }
                        target.replace(position, new_row.clone())?;
                        outcome.changes.push(Change::UpdateRow {
                            table: table.clone(),
                            old_row,
                            new_row,
                        });
                    }
                    _ => {
                        target.insert(row.clone())?;
                        if let Some(key) = target.key_index() {
                            keys.push(vec![row[key].clone()]);
                        }
                        outcome.changes.push(Change::InsertRow {
                            table: table.clone(),
                            row,
                        });
                    }
                }
                outcome.update_count += 1;
            }

            let key_columns = target
                .key_index()
                .map(|key| vec![target.columns()[key].name.clone()])
                .unwrap_or_default();
            outcome.generated_keys = RowSet::new(key_columns, keys);
            Ok(outcome)
        }

        Command::Update {
            table,
            assignments,
            filter,
        } => {
            let target = table_mut(tables, table)?;
            let resolved = assignments
                .iter()
                .map(|(column, operand)| Ok((target.column_index(column)?, operand.resolve(params)?)))
                .collect::<Result<Vec<_>>>()?;

            let mut outcome = Outcome::default();
            for position in target.matching(filter, params)? {
                let old_row = target.rows()[position].clone();
                let mut new_row = old_row.clone();
                for (index, value) in &resolved {
                    new_row[*index] = value.clone();
                }
                target.replace(position, new_row.clone())?;
                outcome.changes.push(Change::UpdateRow {
                    table: table.clone(),
                    old_row,
                    new_row,
                });
                outcome.update_count += 1;
            }
            Ok(outcome)
        }

        Command::Delete { table, filter } => {
            let target = table_mut(tables, table)?;
            let mut outcome = Outcome::default();
            for position in target.matching(filter, params)?.into_iter().rev() {
                let old_row = target.remove(position);
                outcome.changes.push(Change::DeleteRow {
                    table: table.clone(),
                    old_row,
                });
                outcome.update_count += 1;
            }
            Ok(outcome)
        }

        Command::Select(select) => Ok(Outcome {
            rows: Some(run_select(select, params, tables)?),
            ..Outcome::default()
        }),
    }
}

fn run_select(select: &Select, params: &[Value], tables: &Tables) -> Result<RowSet> {
    let table = tables
        .get(&select.table)
        .ok_or_else(|| StoreError::TableNotFound(select.table.clone()))?;

    let positions = table.matching(&select.filter, params)?;

    if select.projection == Projection::Count {
        return Ok(RowSet::new(
            vec!["count".to_string()],
            vec![vec![Value::Integer(positions.len() as i64)]],
        ));
    }

    let mut rows: Vec<&Row> = positions.iter().map(|p| &table.rows()[*p]).collect();

    if !select.order_by.is_empty() {
        let keys = select
            .order_by
            .iter()
            .map(|(column, descending)| Ok((table.column_index(column)?, *descending)))
            .collect::<Result<Vec<_>>>()?;
        rows.sort_by(|a, b| {
            for (index, descending) in &keys {
                let ordering = a[*index].compare(&b[*index]).unwrap_or(Ordering::Equal);
                let ordering = if *descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let offset = select.offset.unwrap_or(0);
    let limit = select.limit.unwrap_or(usize::MAX);
    let rows = rows.into_iter().skip(offset).take(limit);

    match &select.projection {
        Projection::Columns(names) => {
            let indexes = names
                .iter()
                .map(|name| table.column_index(name))
                .collect::<Result<Vec<_>>>()?;
            let rows = rows
                .map(|row| indexes.iter().map(|i| row[*i].clone()).collect())
                .collect();
            Ok(RowSet::new(names.clone(), rows))
        }
        _ => Ok(RowSet::new(table.column_names(), rows.cloned().collect())),
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sql::parse;

    fn run(db: &MemoryDatabase, sql: &str) -> Outcome {
        let mut last = Outcome::default();
        for command in parse(sql).unwrap() {
            last = db.execute(&command, &[]).unwrap();
        }
        last
    }

    fn setup() -> MemoryDatabase {
        let db = MemoryDatabase::new("test");
        run(&db, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)");
        run(
            &db,
            "INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', 25), (3, 'Carol', 35)",
        );
        db
    }

    #[test]
    fn test_insert_reports_generated_keys() {
        let db = setup();
        let outcome = run(&db, "INSERT INTO users (id, name) VALUES (4, 'Dave')");

        assert_eq!(outcome.update_count, 1);
        assert_eq!(outcome.generated_keys.columns, vec!["id"]);
        assert_eq!(outcome.generated_keys.rows, vec![vec![Value::Integer(4)]]);
    }

    #[test]
    fn test_failed_multi_row_insert_is_atomic() {
        let db = setup();
        let commands = parse("INSERT INTO users VALUES (10, 'X', 1), (1, 'dup', 2)").unwrap();
        assert!(db.execute(&commands[0], &[]).is_err());
        assert_eq!(db.row_count("users").unwrap(), 3);
    }

    #[test]
    fn test_upsert_replaces_named_columns() {
        let db = setup();
        run(
            &db,
            "INSERT INTO users (id, name) VALUES (1, 'Alicia') ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        );
        let rows = run(&db, "SELECT name, age FROM users WHERE id = 1").rows.unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::Text("Alicia".into()), Value::Integer(30)]]
        );
    }

    #[test]
    fn test_select_order_limit_offset() {
        let db = setup();
        let rows = run(&db, "SELECT name FROM users ORDER BY age DESC LIMIT 2 OFFSET 1")
            .rows
            .unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::Text("Alice".into())], vec![Value::Text("Bob".into())]]
        );
    }

    #[test]
    fn test_change_log_replay() {
        let db = setup();
        let mut workspace = db.snapshot().unwrap();
        let mut changes = Vec::new();
        for sql in [
            "UPDATE users SET age = 31 WHERE id = 1",
            "DELETE FROM users WHERE id = 2",
            "INSERT INTO users VALUES (4, 'Dave', 40)",
        ] {
            let command = parse(sql).unwrap().remove(0);
            changes.extend(execute_atomic(&command, &[], &mut workspace).unwrap().changes);
        }

        // Nothing visible until replayed
        assert_eq!(db.row_count("users").unwrap(), 3);

        db.apply(&changes).unwrap();
        assert_eq!(db.row_count("users").unwrap(), 3);
        let rows = run(&db, "SELECT age FROM users WHERE id = 1").rows.unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Integer(31)]]);
    }

    #[test]
    fn test_conflicting_replay_applies_nothing() {
        let db = setup();
        let changes = vec![
            Change::InsertRow {
                table: "users".into(),
                row: vec![Value::Integer(9), Value::Null, Value::Null],
            },
            Change::InsertRow {
                table: "users".into(),
                row: vec![Value::Integer(1), Value::Null, Value::Null],
            },
        ];
        assert!(db.apply(&changes).is_err());
        assert_eq!(db.row_count("users").unwrap(), 3);
    }
}
