//! Dynamic column values
//!
//! Maintenance routines work on any table, so column values cannot be mapped
//! onto compile-time structs. `Value` mirrors SQLite's five storage classes and
//! adds what the routines need on top: hashing (for equivalence classes),
//! decoding from arbitrary rows and binding into arbitrary queries.

use crate::Result;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, TypeInfo, ValueRef};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single column value as stored by SQLite
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// NULL, the empty string and the zero-length blob
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Blob(b) => b.is_empty(),
            Value::Integer(_) | Value::Real(_) => false,
        }
    }

    /// Decode column `index` of `row` using the value's runtime storage class
    pub fn from_row(row: &SqliteRow, index: usize) -> Result<Value> {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let storage = raw.type_info().name().to_ascii_uppercase();

        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(index)?),
            "REAL" => Value::Real(row.try_get_unchecked::<f64, _>(index)?),
            "BLOB" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
            // TEXT and any declared-type names SQLite reports (DATE, NUMERIC, ...)
            _ => Value::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        Ok(value)
    }

    /// Bind this value as the next positional parameter of `query`
    pub fn bind_to<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Blob(v) => query.bind(v.clone()),
        }
    }

    /// Parse the `dflt_value` column of `PRAGMA table_info`
    ///
    /// Returns `None` for defaults that are expressions rather than literals
    /// (`CURRENT_TIMESTAMP`, function calls, ...): those have no static value.
    pub fn from_sql_literal(literal: &str) -> Option<Value> {
        let mut text = literal.trim();
        while text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
            text = text[1..text.len() - 1].trim();
        }

        if text.eq_ignore_ascii_case("NULL") {
            return Some(Value::Null);
        }
        if text.eq_ignore_ascii_case("TRUE") {
            return Some(Value::Integer(1));
        }
        if text.eq_ignore_ascii_case("FALSE") {
            return Some(Value::Integer(0));
        }
        if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
            let inner = &text[1..text.len() - 1];
            return Some(Value::Text(inner.replace("''", "'")));
        }
        if text.len() >= 3
            && (text.starts_with("X'") || text.starts_with("x'"))
            && text.ends_with('\'')
        {
            return decode_hex(&text[2..text.len() - 1]).map(Value::Blob);
        }
        if let Ok(v) = text.parse::<i64>() {
            return Some(Value::Integer(v));
        }
        if let Ok(v) = text.parse::<f64>() {
            return Some(Value::Real(v));
        }
        None
    }

    /// Compare the way SQLite orders values in `ORDER BY`
    ///
    /// NULL sorts first, then numbers (integers and reals compared
    /// numerically), then text by bytes, then blobs.
    pub fn sql_cmp(&self, other: &Value) -> Ordering {
        fn class(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Integer(_) | Value::Real(_) => 1,
                Value::Text(_) => 2,
                Value::Blob(_) => 3,
            }
        }

        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
            (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => class(self).cmp(&class(other)),
        }
    }

    /// Parse a value typed on the command line (`null`, numbers, else text)
    pub fn from_cli_arg(arg: &str) -> Value {
        if arg.eq_ignore_ascii_case("null") {
            Value::Null
        } else if let Ok(v) = arg.parse::<i64>() {
            Value::Integer(v)
        } else if let Ok(v) = arg.parse::<f64>() {
            Value::Real(v)
        } else {
            Value::Text(arg.to_string())
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(v) => v.hash(state),
            Value::Real(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Blob(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Blob(v) => {
                write!(f, "x'")?;
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Quote an SQL identifier taken from schema metadata
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `?, ?, ?` for an `IN (...)` list of `count` parameters
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
