use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MatViewError, MatViewResult};

/// A row image, values in declared column order
pub type Row = Vec<Value>;

/// Column data types understood by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// No declared type (a column template without a type, a NULL literal)
    Unknown,
    Boolean,
    Integer,
    BigInt,
    Double,
    Varchar,
}

impl DataType {
    /// Parse a SQL type name such as `INT`, `VARCHAR(255)` or `DOUBLE PRECISION`
    pub fn parse(type_name: &str) -> Option<Self> {
        let upper = type_name.trim().to_uppercase();
        let base = match upper.find('(') {
            Some(pos) => upper[..pos].trim(),
            None => upper.as_str(),
        };

        match base {
            "BOOLEAN" | "BOOL" | "BIT" => Some(DataType::Boolean),
            "INT" | "INTEGER" | "INT4" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => Some(DataType::Integer),
            "BIGINT" | "INT8" => Some(DataType::BigInt),
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" | "REAL" | "DECIMAL" | "NUMERIC" => {
                Some(DataType::Double)
            }
            "VARCHAR" | "VARCHAR2" | "NVARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "TEXT"
            | "CLOB" => Some(DataType::Varchar),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != DataType::Unknown
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::BigInt | DataType::Double)
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Unknown => "UNKNOWN",
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE PRECISION",
            DataType::Varchar => "VARCHAR",
        }
    }

    /// Render `value` as a literal for a column of this type.
    ///
    /// Numeric columns get unquoted literals, everything else is
    /// single-quoted with embedded quotes doubled.
    pub fn format_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) if !self.is_numeric() && *self != DataType::Varchar => {
                if *b { "TRUE" } else { "FALSE" }.to_string()
            }
            other if self.is_numeric() => other.to_string(),
            other => quote_text(&other.to_string()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A single SQL value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::Text(_) => DataType::Varchar,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL comparison; `None` when either side is NULL or the kinds are incomparable
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality where NULL matches NULL, used to locate stored row images
    pub fn not_distinct(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Convert to the declared type of `column`
    pub fn coerce(self, data_type: DataType, column: &str) -> MatViewResult<Value> {
        let mismatch = |found: &Value| MatViewError::TypeMismatch {
            column: column.to_string(),
            expected: data_type.sql_name().to_string(),
            found: format!("{} {}", found.data_type().sql_name(), found),
        };

        match (data_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Unknown, v) => Ok(v),
            (DataType::Boolean, v @ Value::Boolean(_)) => Ok(v),
            (DataType::Boolean, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Boolean(true)),
                "false" | "f" | "0" => Ok(Value::Boolean(false)),
                _ => Err(mismatch(&Value::Text(s))),
            },
            (DataType::Integer | DataType::BigInt, v @ Value::Integer(_)) => Ok(v),
            (DataType::Integer | DataType::BigInt, Value::Double(d)) if d.fract() == 0.0 => {
                Ok(Value::Integer(d as i64))
            }
            (DataType::Integer | DataType::BigInt, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Integer(i)),
                Err(_) => Err(mismatch(&Value::Text(s))),
            },
            (DataType::Double, Value::Integer(i)) => Ok(Value::Double(i as f64)),
            (DataType::Double, v @ Value::Double(_)) => Ok(v),
            (DataType::Double, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(d) => Ok(Value::Double(d)),
                Err(_) => Err(mismatch(&Value::Text(s))),
            },
            (DataType::Varchar, v @ Value::Text(_)) => Ok(v),
            (DataType::Varchar, v) => Ok(Value::Text(v.to_string())),
            (_, v) => Err(mismatch(&v)),
        }
    }

    /// Literal rendering driven by the value's own kind
    pub fn to_sql_literal(&self) -> String {
        self.data_type().format_literal(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Build a [`Row`] from heterogeneous literals: `row![1, "Hello"]`
#[macro_export]
macro_rules! row {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::schema::Value::from($v)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(DataType::parse("int"), Some(DataType::Integer));
        assert_eq!(DataType::parse("VARCHAR(255)"), Some(DataType::Varchar));
        assert_eq!(DataType::parse("double precision"), Some(DataType::Double));
        assert_eq!(DataType::parse("bigint"), Some(DataType::BigInt));
        assert_eq!(DataType::parse("geometry"), None);
    }

    #[test]
    fn test_literal_formatting_by_column_type() {
        assert_eq!(DataType::Integer.format_literal(&Value::Integer(2)), "2");
        assert_eq!(DataType::Varchar.format_literal(&Value::from("Wes Janson")), "'Wes Janson'");
        assert_eq!(DataType::Varchar.format_literal(&Value::from("O'Hara")), "'O''Hara'");
        assert_eq!(DataType::Varchar.format_literal(&Value::Integer(468)), "'468'");
        assert_eq!(DataType::Boolean.format_literal(&Value::Boolean(true)), "TRUE");
        assert_eq!(DataType::Integer.format_literal(&Value::Null), "NULL");
    }

    #[test]
    fn test_compare_and_null_handling() {
        assert_eq!(Value::Integer(1).compare(&Value::Double(1.0)), Some(Ordering::Equal));
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert!(Value::Null.not_distinct(&Value::Null));
        assert!(!Value::Null.not_distinct(&Value::Integer(0)));
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(Value::from("42").coerce(DataType::Integer, "id").unwrap(), Value::Integer(42));
        assert_eq!(Value::Integer(7).coerce(DataType::Varchar, "name").unwrap(), Value::from("7"));
        assert_eq!(Value::Integer(7).coerce(DataType::Double, "x").unwrap(), Value::Double(7.0));
        let err = Value::from("abc").coerce(DataType::Integer, "id").unwrap_err();
        assert_eq!(err.sqlstate(), "42804");
    }

    #[test]
    fn test_row_macro() {
        let r: Row = row![1, "Hello"];
        assert_eq!(r, vec![Value::Integer(1), Value::Text("Hello".to_string())]);
    }
}
