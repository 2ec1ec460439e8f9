//! Result rows and typed cell access.
//!
//! [`Row`] is the shape in which the execution adapter hands result data back
//! to the engine: ordered column names plus one [`Value`] per column. The
//! [`FromValue`] trait converts cells into concrete Rust types during model
//! hydration.

use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};

/// One result row: ordered column names and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values;
    /// an adapter producing mismatched rows is a programming error.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> QuarryResult<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                QuarryError::Database(format!("column {column:?} not found in row"))
            })?;
        T::from_value(&self.values[idx])
    }

    /// Gets a typed value by zero-based column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> QuarryResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            QuarryError::Database(format!(
                "column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value at the given column, if present.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Extracts the columns carrying a `prefix__` alias block as a new row
    /// with the prefix stripped.
    ///
    /// Inline to-one joins select related columns under `alias__column`
    /// aliases; this is the inverse operation used during hydration. Returns
    /// `None` when no column carries the prefix, or when every prefixed cell
    /// is NULL (a LEFT JOIN that matched nothing).
    pub fn subrow(&self, prefix: &str) -> Option<Row> {
        let full_prefix = format!("{prefix}__");
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (name, value) in self.columns.iter().zip(&self.values) {
            if let Some(stripped) = name.strip_prefix(&full_prefix) {
                columns.push(stripped.to_string());
                values.push(value.clone());
            }
        }
        if columns.is_empty() || values.iter().all(Value::is_null) {
            return None;
        }
        Some(Row { columns, values })
    }
}

/// Converts a borrowed [`Value`] cell into a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts the conversion, failing with a database error on a type
    /// mismatch.
    fn from_value(value: &Value) -> QuarryResult<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(type_mismatch("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Int(i) => i32::try_from(*i)
                .map_err(|e| QuarryError::Database(format!("Int out of i32 range: {e}"))),
            _ => Err(type_mismatch("Int", value)),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Uint(u) => Ok(*u),
            Value::Int(i) => u64::try_from(*i)
                .map_err(|e| QuarryError::Database(format!("Int out of u64 range: {e}"))),
            _ => Err(type_mismatch("Uint", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(type_mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            // Backends without a native boolean type report 0/1.
            Value::Int(i) => Ok(*i != 0),
            _ => Err(type_mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(type_mismatch("String", value)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            _ => Err(type_mismatch("Uuid", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> QuarryResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

fn type_mismatch(expected: &str, got: &Value) -> QuarryError {
    QuarryError::Database(format!("expected {expected}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "age".into()],
            vec![Value::Int(1), Value::String("alice".into()), Value::Null],
        )
    }

    #[test]
    fn test_get_by_name() {
        let row = sample();
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "alice");
        assert_eq!(row.get::<Option<i64>>("age").unwrap(), None);
    }

    #[test]
    fn test_get_missing_column() {
        let row = sample();
        assert!(row.get::<i64>("missing").is_err());
    }

    #[test]
    fn test_get_by_index() {
        let row = sample();
        assert_eq!(row.get_by_index::<i64>(0).unwrap(), 1);
        assert!(row.get_by_index::<i64>(9).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let row = sample();
        assert!(row.get::<bool>("name").is_err());
    }

    #[test]
    fn test_bool_from_int() {
        let row = Row::new(vec!["active".into()], vec![Value::Int(1)]);
        assert!(row.get::<bool>("active").unwrap());
    }

    #[test]
    fn test_subrow_strips_prefix() {
        let row = Row::new(
            vec!["id".into(), "author__id".into(), "author__name".into()],
            vec![Value::Int(1), Value::Int(7), Value::String("bob".into())],
        );
        let sub = row.subrow("author").unwrap();
        assert_eq!(sub.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(sub.get::<i64>("id").unwrap(), 7);
    }

    #[test]
    fn test_subrow_all_null_is_none() {
        let row = Row::new(
            vec!["id".into(), "author__id".into()],
            vec![Value::Int(1), Value::Null],
        );
        assert!(row.subrow("author").is_none());
    }

    #[test]
    fn test_subrow_no_match_is_none() {
        let row = sample();
        assert!(row.subrow("author").is_none());
    }
}
