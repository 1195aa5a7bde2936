//! Tabular data sets held in the execution context.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named-column table of values
///
/// Every row has exactly one value per column, also when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSheet")]
pub struct Sheet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Sheet as written by hand, rows of any length
#[derive(Deserialize)]
struct RawSheet {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl From<RawSheet> for Sheet {
    fn from(raw: RawSheet) -> Self {
        let mut sheet = Sheet::new(raw.columns);
        for row in raw.rows {
            sheet.push_row(row);
        }
        sheet
    }
}

impl Sheet {
    /// Create an empty sheet with the given columns
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the sheet width
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Builder variant of [`Sheet::push_row`]
    #[must_use]
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.push_row(row);
        self
    }

    /// Column names in order
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Is this sheet without rows?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Row at `idx`
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    /// Row at `idx` keyed by column name
    #[must_use]
    pub fn row_as_map(&self, idx: usize) -> Option<IndexMap<String, Value>> {
        let row = self.rows.get(idx)?;
        Some(self.columns.iter().cloned().zip(row.iter().cloned()).collect())
    }

    /// Value of `column` in row `idx`
    #[must_use]
    pub fn column_value(&self, column: &str, idx: usize) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(idx).and_then(|row| row.get(col))
    }

    /// Set the value of `column` in row `idx`, adding the column when it is new.
    ///
    /// Returns false when the row does not exist.
    pub fn set_column_value(&mut self, column: &str, idx: usize, value: Value) -> bool {
        if idx >= self.rows.len() {
            return false;
        }
        let col = match self.column_index(column) {
            Some(col) => col,
            None => self.add_column(column),
        };
        let width = self.columns.len();
        let Some(row) = self.rows.get_mut(idx) else {
            return false;
        };
        if row.len() < width {
            row.resize(width, Value::Null);
        }
        row[col] = value;
        true
    }

    /// Add a column filled with nulls, returning its position
    pub fn add_column(&mut self, column: &str) -> usize {
        if let Some(col) = self.column_index(column) {
            return col;
        }
        self.columns.push(column.to_string());
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, Value::Null);
        }
        self.columns.len() - 1
    }
}
