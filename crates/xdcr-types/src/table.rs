//! Result tables returned by procedure and ad-hoc calls.

use xdcr_error::{Result, SelfCheckError};

use crate::value::Value;

/// An ordered set of rows with named columns.
///
/// Column lookup is case-insensitive, matching how the clusters report
/// column names (upper case) while the harness names them in lower case.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    /// Create an empty table with the given column names.
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

    /// Single-row, single-column table, the shape of counts and modified-row
    /// tallies.
    pub fn scalar(column: &str, value: i64) -> Self {
        let mut table = Self::new([column]);
        table.rows.push(vec![Value::BigInt(value)]);
        table
    }

    /// Append a row. The row is padded with NULL or truncated to the column
    /// count so every row has the table's width.
    pub fn push_row(&mut self, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Returns the row at `index`, if present.
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        self.rows.get(index).map(|values| RowView {
            table: self,
            values,
        })
    }

    /// Iterate rows in order.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(|values| RowView {
            table: self,
            values,
        })
    }

    /// The first column of the first row as an integer (`COUNT(*)` results).
    pub fn as_scalar_i64(&self) -> Result<i64> {
        let value = self
            .rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| SelfCheckError::ResultShape {
                detail: "expected a scalar result, table is empty".to_owned(),
            })?;
        value.as_i64().ok_or_else(|| SelfCheckError::ResultShape {
            detail: format!("expected an integer scalar, got {}", value.type_name()),
        })
    }
}

/// Borrowed view of a single row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    table: &'a ResultTable,
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Returns the value of the named column.
    pub fn get(&self, column: &str) -> Result<&'a Value> {
        let values = self.values;
        self.table
            .column_index(column)
            .and_then(|index| values.get(index))
            .ok_or_else(|| SelfCheckError::MissingColumn {
                name: column.to_owned(),
            })
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        let value = self.get(column)?;
        value.as_i64().ok_or_else(|| type_error(column, "BIGINT", value))
    }

    pub fn get_string(&self, column: &str) -> Result<&'a str> {
        let value = self.get(column)?;
        value.as_text().ok_or_else(|| type_error(column, "VARCHAR", value))
    }

    /// VARBINARY column; NULL reads as `None`.
    pub fn get_varbinary(&self, column: &str) -> Result<Option<&'a [u8]>> {
        let value = self.get(column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_bytes()
            .map(Some)
            .ok_or_else(|| type_error(column, "VARBINARY", value))
    }
}

fn type_error(column: &str, expected: &str, actual: &Value) -> SelfCheckError {
    SelfCheckError::ResultShape {
        detail: format!(
            "column {column}: expected {expected}, got {}",
            actual.type_name()
        ),
    }
}
