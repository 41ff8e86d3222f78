//! Typed row model for query results.
//!
//! Every database driver converts its native rows into positional [`Cell`]s so
//! mapping code never depends on the wire protocol. Accessors are strict: a
//! mapping function states the column index and the type it expects, and gets
//! a [`RowError`] instead of a silently coerced value when the row does not
//! have that shape.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

/// Errors raised by typed cell access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("column {index} out of range (row has {width} columns)")]
    MissingColumn { index: usize, width: usize },

    #[error("column {index}: expected {expected}, found {found}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column {index} is NULL")]
    Null { index: usize },

    #[error("column {index}: value {value} does not fit in {target}")]
    OutOfRange {
        index: usize,
        value: String,
        target: &'static str,
    },
}

/// A single typed scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal, converted to a float only when a numeric value is read.
    Decimal(Decimal),
    Text(String),
}

impl Cell {
    /// Name of the cell type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Decimal(_) => "decimal",
            Cell::Text(_) => "text",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<Decimal> for Cell {
    fn from(v: Decimal) -> Self {
        Cell::Decimal(v)
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// An ordered sequence of cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Get a cell by position.
    pub fn cell(&self, index: usize) -> Result<&Cell, RowError> {
        self.cells.get(index).ok_or(RowError::MissingColumn {
            index,
            width: self.cells.len(),
        })
    }

    /// Read a numeric column as `f64`.
    ///
    /// Integers, floats, decimals and booleans (as 0/1) are accepted.
    pub fn f64(&self, index: usize) -> Result<f64, RowError> {
        match self.cell(index)? {
            Cell::Int(v) => Ok(*v as f64),
            Cell::Float(v) => Ok(*v),
            Cell::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Cell::Decimal(d) => d.to_f64().ok_or_else(|| RowError::OutOfRange {
                index,
                value: d.to_string(),
                target: "f64",
            }),
            Cell::Null => Err(RowError::Null { index }),
            other => Err(RowError::TypeMismatch {
                index,
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    /// Read a numeric column as `f64`, mapping NULL to `None`.
    pub fn opt_f64(&self, index: usize) -> Result<Option<f64>, RowError> {
        if self.cell(index)?.is_null() {
            return Ok(None);
        }
        self.f64(index).map(Some)
    }

    /// Read an integral column as `i64`.
    ///
    /// Decimals are accepted when they have no fractional part.
    pub fn i64(&self, index: usize) -> Result<i64, RowError> {
        match self.cell(index)? {
            Cell::Int(v) => Ok(*v),
            Cell::Decimal(d) if d.fract().is_zero() => {
                d.to_i64().ok_or_else(|| RowError::OutOfRange {
                    index,
                    value: d.to_string(),
                    target: "i64",
                })
            }
            Cell::Null => Err(RowError::Null { index }),
            other => Err(RowError::TypeMismatch {
                index,
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }

    /// Read a text column.
    pub fn text(&self, index: usize) -> Result<&str, RowError> {
        match self.cell(index)? {
            Cell::Text(s) => Ok(s),
            Cell::Null => Err(RowError::Null { index }),
            other => Err(RowError::TypeMismatch {
                index,
                expected: "text",
                found: other.type_name(),
            }),
        }
    }

    /// Read a boolean column.
    pub fn bool(&self, index: usize) -> Result<bool, RowError> {
        match self.cell(index)? {
            Cell::Bool(v) => Ok(*v),
            Cell::Null => Err(RowError::Null { index }),
            other => Err(RowError::TypeMismatch {
                index,
                expected: "bool",
                found: other.type_name(),
            }),
        }
    }
}

impl From<Vec<Cell>> for Row {
    fn from(cells: Vec<Cell>) -> Self {
        Self::new(cells)
    }
}

/// Build a [`Row`] from a list of values convertible to [`Cell`].
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::row::Row::new(vec![$($crate::row::Cell::from($value)),*])
    };
}

/// The rows returned by one query, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// A result set without column names.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Column names, if the driver reported them.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first row, or a `MissingColumn` error on an empty set.
    pub fn first(&self) -> Result<&Row, RowError> {
        self.rows
            .first()
            .ok_or(RowError::MissingColumn { index: 0, width: 0 })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_numeric_accessors() {
        let row = crate::row![42i64, 2.5f64, true, Decimal::from_str("0.975").unwrap()];

        assert_eq!(row.f64(0).unwrap(), 42.0);
        assert_eq!(row.i64(0).unwrap(), 42);
        assert_eq!(row.f64(1).unwrap(), 2.5);
        assert_eq!(row.f64(2).unwrap(), 1.0);
        assert_eq!(row.f64(3).unwrap(), 0.975);
    }

    #[test]
    fn test_i64_keeps_full_precision() {
        let big = i64::MAX - 1;
        let row = crate::row![big];
        assert_eq!(row.i64(0).unwrap(), big);
    }

    #[test]
    fn test_integral_decimal_as_i64() {
        let row = crate::row![
            Decimal::from_str("123456789012").unwrap(),
            Decimal::from_str("1.5").unwrap()
        ];
        assert_eq!(row.i64(0).unwrap(), 123_456_789_012);
        assert!(matches!(
            row.i64(1),
            Err(RowError::TypeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let row = crate::row!["active", 3i64];

        assert_eq!(row.text(0).unwrap(), "active");
        assert_eq!(
            row.f64(0),
            Err(RowError::TypeMismatch {
                index: 0,
                expected: "number",
                found: "text",
            })
        );
        assert!(row.text(1).is_err());
        assert!(row.i64(1).is_ok());
    }

    #[test]
    fn test_missing_column() {
        let row = crate::row![1i64];
        assert_eq!(
            row.f64(3),
            Err(RowError::MissingColumn { index: 3, width: 1 })
        );
    }

    #[test]
    fn test_null_handling() {
        let row = crate::row![Option::<f64>::None, Some(4.0f64)];

        assert_eq!(row.f64(0), Err(RowError::Null { index: 0 }));
        assert_eq!(row.opt_f64(0).unwrap(), None);
        assert_eq!(row.opt_f64(1).unwrap(), Some(4.0));
    }

    #[test]
    fn test_row_set() {
        let set = RowSet::new(
            vec!["state".to_string(), "count".to_string()],
            vec![crate::row!["idle", 3i64], crate::row!["active", 1i64]],
        );

        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
        assert_eq!(set.columns(), ["state", "count"]);
        assert_eq!(set.first().unwrap().text(0).unwrap(), "idle");

        let total: i64 = set.iter().map(|r| r.i64(1).unwrap()).sum();
        assert_eq!(total, 4);

        assert!(RowSet::empty().is_empty());
        assert!(RowSet::empty().first().is_err());
    }
}
