// 📋 Table Model - the only unit of exchange between components
//
// A closed value type at the table boundary: every cell is Null, Text,
// Number or Date. Rules coerce explicitly (as_number) instead of silently
// producing NaN.

use crate::error::{MigrationError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    /// Build a value from a raw delimited-text cell. Blank cells are Null.
    pub fn from_cell(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Value::Null
        } else {
            Value::Text(raw.to_string())
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric coercion: Number as-is, Text parsed after trimming,
    /// anything else (or unparseable / non-finite text) is None
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Null | Value::Date(_) => None,
        }
    }

    /// String cast used for keys and cross-file comparisons
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Integral values print without a fractional part ("1250", not "1250.0")
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// The number a cell spells, but only if formatting it back gives the same
/// text. Zero-padded codes, "12.50" and integers past 2^53 stay text.
fn lossless_number(s: &str) -> Option<f64> {
    let t = s.trim();
    t.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && format_number(*n) == t)
}

// ============================================================================
// TABLE
// ============================================================================

static NULL: Value = Value::Null;

/// Ordered rows sharing one column set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from string-ish rows (test and fixture helper)
    pub fn from_rows<C, R>(columns: &[C], rows: Vec<Vec<R>>) -> Self
    where
        C: AsRef<str>,
        R: Into<Value>,
    {
        let mut table = Table::new(columns.iter().map(|c| c.as_ref().to_string()).collect());
        for row in rows {
            table.push_row(row.into_iter().map(Into::into).collect());
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Like column_index, but a missing column is a SchemaError
    pub fn require_column(&self, name: &str, context: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| MigrationError::schema(name, context))
    }

    /// Append a row, padding with Null or truncating to the column count
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn row(&self, index: usize) -> Option<&[Value]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: Value) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value;
        }
    }

    /// Get-by-name for a single cell; Null if the row or column is absent
    pub fn get(&self, row: usize, column: &str) -> &Value {
        match self.column_index(column) {
            Some(idx) => self.value(row, idx),
            None => &NULL,
        }
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = &Value> {
        self.rows
            .iter()
            .map(move |r| r.get(column).unwrap_or(&NULL))
    }

    /// Apply a function to every cell of one column
    pub fn map_column<F>(&mut self, column: usize, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        for row in &mut self.rows {
            if let Some(cell) = row.get_mut(column) {
                *cell = f(cell);
            }
        }
    }

    /// Add a column filled with `fill`; returns its index. Existing columns are reused.
    pub fn add_column(&mut self, name: &str, fill: Value) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
        self.columns.len() - 1
    }

    /// Rename columns according to `renames` (old name → new name).
    /// Columns not named in the map keep their name.
    pub fn rename_columns(&mut self, renames: &HashMap<String, String>) {
        for column in &mut self.columns {
            if let Some(new_name) = renames.get(column.as_str()) {
                *column = new_name.clone();
            }
        }
    }

    /// String-cast keys of one column, in row order
    pub fn keys(&self, column: usize) -> Vec<String> {
        self.column_values(column).map(Value::as_key).collect()
    }

    /// (column, value) pairs of one row
    pub fn row_pairs(&self, index: usize) -> Vec<(&str, &Value)> {
        match self.rows.get(index) {
            Some(row) => self
                .columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect(),
            None => Vec::new(),
        }
    }

    /// New table holding the given rows (in the given order)
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        let mut out = Table::new(self.columns.clone());
        for &i in indices {
            if let Some(row) = self.rows.get(i) {
                out.rows.push(row.clone());
            }
        }
        out
    }

    /// Keep only rows matching the predicate
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Value]) -> bool,
    {
        self.rows.retain(|r| keep(r));
    }

    /// Append another table's rows, aligning by column name.
    /// Columns only present on one side are filled with Null.
    pub fn append(&mut self, other: &Table) {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other.clone();
            return;
        }
        for column in other.columns() {
            self.add_column(column, Value::Null);
        }
        let positions: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for row in other.rows() {
            let aligned = positions
                .iter()
                .map(|p| p.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                .collect();
            self.rows.push(aligned);
        }
    }

    /// Columns whose non-null cells all round-trip through f64 become Number
    /// columns. Anything lossy keeps the whole column as text.
    pub fn infer_numeric_columns(&mut self) {
        for col in 0..self.columns.len() {
            let mut any = false;
            let numeric = self.column_values(col).all(|v| match v {
                Value::Null => true,
                Value::Text(s) => {
                    any = true;
                    lossless_number(s).is_some()
                }
                Value::Number(_) => {
                    any = true;
                    true
                }
                Value::Date(_) => false,
            });
            if numeric && any {
                self.map_column(col, |v| match v {
                    Value::Text(s) => lossless_number(s).map(Value::Number).unwrap_or(Value::Null),
                    other => other.clone(),
                });
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from_cell(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::from_cell(&s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map(Value::from_cell).unwrap_or(Value::Null)
    }
}

// ============================================================================
// TESTS
// ============================================================================
