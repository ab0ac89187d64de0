use super::sql::{CompareOp, Predicate};
use crate::core::{Column, Result, Row, StoreError, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    key: Option<usize>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let key = columns.iter().position(|c| c.primary_key);
        Self {
            name: name.into(),
            columns,
            key,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of the primary-key column, if the table declares one
    pub fn key_index(&self) -> Option<usize> {
        self.key
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        let name = name.to_lowercase();
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StoreError::ColumnNotFound(name, self.name.clone()))
    }

    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(StoreError::ExecutionError(format!(
                "Table '{}' expects {} values, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            column.validate(value)?;
        }
        Ok(())
    }

    pub fn position_by_key(&self, key: &Value) -> Option<usize> {
        let index = self.key?;
        self.rows.iter().position(|row| &row[index] == key)
    }

    /// Locate a stored row: by key when the table has one, by full equality otherwise
    pub fn position_of(&self, row: &Row) -> Option<usize> {
        match self.key {
            Some(index) => self.position_by_key(&row[index]),
            None => self.rows.iter().position(|existing| existing == row),
        }
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        self.validate_row(&row)?;
        if let Some(index) = self.key
            && self.position_by_key(&row[index]).is_some()
        {
            return Err(StoreError::ConstraintViolation(format!(
                "Duplicate key {} in table '{}'",
                row[index], self.name
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn replace(&mut self, position: usize, row: Row) -> Result<()> {
        self.validate_row(&row)?;
        if let Some(index) = self.key
            && let Some(other) = self.position_by_key(&row[index])
            && other != position
        {
            return Err(StoreError::ConstraintViolation(format!(
                "Duplicate key {} in table '{}'",
                row[index], self.name
            )));
        }
        self.rows[position] = row;
        Ok(())
    }

    pub fn remove(&mut self, position: usize) -> Row {
        self.rows.remove(position)
    }

    /// Positions of rows satisfying every predicate
    pub fn matching(&self, filter: &[Predicate], params: &[Value]) -> Result<Vec<usize>> {
        let mut resolved = Vec::with_capacity(filter.len());
        for predicate in filter {
            resolved.push((
                self.column_index(&predicate.column)?,
                predicate.op,
                predicate.operand.resolve(params)?,
            ));
        }

        let mut positions = Vec::new();
        'rows: for (position, row) in self.rows.iter().enumerate() {
            for (index, op, operand) in &resolved {
                if !evaluate(&row[*index], *op, operand)? {
                    continue 'rows;
                }
            }
            positions.push(position);
        }
        Ok(positions)
    }
}

fn evaluate(value: &Value, op: CompareOp, operand: &Value) -> Result<bool> {
    // Comparisons with NULL are never true
    if value.is_null() || operand.is_null() {
        return Ok(false);
    }
    let ordering = value.compare(operand)?;
    Ok(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
    })
}
