//! Type/Datatype translator
//!
//! Maps abstract datatypes to native SQLite column declarations and converts
//! values in both directions. Vector datatypes never reach this layer; the
//! schema manager expands them into one scalar column per component.

use crate::ontology::Datatype;
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::fmt;

/// Native column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeType {
    Integer,
    Float,
    Boolean,
    /// `VARCHAR` or `VARCHAR(n)`
    VarChar(Option<usize>),
    Text,
}

impl NativeType {
    /// SQL declaration used in `CREATE TABLE`
    pub fn sql(&self) -> String {
        match self {
            NativeType::Integer => "INTEGER".to_string(),
            NativeType::Float => "FLOAT".to_string(),
            NativeType::Boolean => "BOOLEAN".to_string(),
            NativeType::VarChar(None) => "VARCHAR".to_string(),
            NativeType::VarChar(Some(n)) => format!("VARCHAR({})", n),
            NativeType::Text => "TEXT".to_string(),
        }
    }

    /// Parse a declared column type as reported by `PRAGMA table_info`
    pub fn parse(declared: &str) -> Result<Self> {
        let declared = declared.trim().to_ascii_uppercase();
        let (base, length) = match declared.split_once('(') {
            Some((base, rest)) => {
                let length = rest
                    .trim_end_matches(')')
                    .split(',')
                    .next()
                    .and_then(|n| n.trim().parse::<usize>().ok());
                (base.trim().to_string(), length)
            }
            None => (declared.clone(), None),
        };

        match base.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => Ok(NativeType::Integer),
            "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" => Ok(NativeType::Float),
            "BOOLEAN" | "BOOL" => Ok(NativeType::Boolean),
            "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "NVARCHAR" | "NCHAR" => {
                Ok(NativeType::VarChar(length))
            }
            "TEXT" | "CLOB" | "STRING" | "" => Ok(NativeType::Text),
            _ => Err(Error::UnsupportedDatatype(format!("native column type {}", declared))),
        }
    }

    /// Best abstract datatype for a column whose declaration is all we know
    pub fn datatype(&self) -> Datatype {
        match self {
            NativeType::Integer => Datatype::Integer,
            NativeType::Float => Datatype::Float,
            NativeType::Boolean => Datatype::Boolean,
            NativeType::VarChar(Some(n)) => Datatype::BoundedString(*n),
            NativeType::VarChar(None) | NativeType::Text => Datatype::String,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Native column type for an abstract datatype. An absent datatype falls
/// back to an unbounded string.
pub fn to_native_type(datatype: Option<&Datatype>) -> Result<NativeType> {
    match datatype {
        None => Ok(NativeType::VarChar(None)),
        Some(Datatype::Uid) => Ok(NativeType::VarChar(Some(Uid::TEXT_LEN))),
        Some(Datatype::Integer) => Ok(NativeType::Integer),
        Some(Datatype::Float) => Ok(NativeType::Float),
        Some(Datatype::Boolean) => Ok(NativeType::Boolean),
        Some(Datatype::String) => Ok(NativeType::VarChar(None)),
        Some(Datatype::BoundedString(n)) => Ok(NativeType::VarChar(Some(*n))),
        Some(vector @ Datatype::Vector { .. }) => Err(Error::UnsupportedDatatype(format!(
            "{} must be expanded into scalar columns",
            vector
        ))),
    }
}

/// Convert an abstract value into a value bindable as a statement parameter
pub fn to_native_value(value: &Value, datatype: &Datatype) -> Result<SqlValue> {
    let mismatch = || {
        Error::ValueConversion(format!("cannot store {} as {}", value, datatype))
    };

    match (datatype, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (Datatype::Vector { .. }, _) => Err(Error::UnsupportedDatatype(format!(
            "{} must be expanded into scalar columns",
            datatype
        ))),
        (Datatype::Integer, Value::Integer(i)) => Ok(SqlValue::Integer(*i)),
        (Datatype::Integer, Value::Bool(b)) => Ok(SqlValue::Integer(*b as i64)),
        (Datatype::Float, Value::Float(x)) => Ok(SqlValue::Real(*x)),
        (Datatype::Float, Value::Integer(i)) => Ok(SqlValue::Real(*i as f64)),
        (Datatype::Boolean, Value::Bool(b)) => Ok(SqlValue::Integer(*b as i64)),
        (Datatype::Boolean, Value::Integer(i)) => Ok(SqlValue::Integer((*i != 0) as i64)),
        (Datatype::String | Datatype::BoundedString(_), Value::Text(s)) => Ok(SqlValue::Text(s.clone())),
        (Datatype::String | Datatype::BoundedString(_), Value::Uid(uid)) => Ok(SqlValue::Text(uid.to_string())),
        (Datatype::String | Datatype::BoundedString(_), Value::Integer(i)) => Ok(SqlValue::Text(i.to_string())),
        (Datatype::String | Datatype::BoundedString(_), Value::Float(x)) => Ok(SqlValue::Text(x.to_string())),
        (Datatype::Uid, Value::Uid(uid)) => Ok(SqlValue::Text(uid.to_string())),
        (Datatype::Uid, Value::Text(s)) => Ok(SqlValue::Text(Uid::parse(s)?.to_string())),
        _ => Err(mismatch()),
    }
}

/// Convert a raw column value back into an abstract value
pub fn from_native_value(datatype: &Datatype, raw: SqlValue) -> Result<Value> {
    match (datatype, raw) {
        (_, SqlValue::Null) => Ok(Value::Null),
        (Datatype::Vector { .. }, _) => Err(Error::UnsupportedDatatype(format!(
            "{} must be expanded into scalar columns",
            datatype
        ))),
        (Datatype::Integer, SqlValue::Integer(i)) => Ok(Value::Integer(i)),
        (Datatype::Integer, SqlValue::Real(x)) if x.fract() == 0.0 => Ok(Value::Integer(x as i64)),
        (Datatype::Integer, SqlValue::Text(s)) => s
            .trim()
            .parse()
            .map(Value::Integer)
            .map_err(|_| Error::ValueConversion(format!("'{}' is not an integer", s))),
        (Datatype::Float, SqlValue::Real(x)) => Ok(Value::Float(x)),
        (Datatype::Float, SqlValue::Integer(i)) => Ok(Value::Float(i as f64)),
        (Datatype::Float, SqlValue::Text(s)) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| Error::ValueConversion(format!("'{}' is not a float", s))),
        (Datatype::Boolean, SqlValue::Integer(i)) => Ok(Value::Bool(i != 0)),
        (Datatype::Boolean, SqlValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            _ => Err(Error::ValueConversion(format!("'{}' is not a boolean", s))),
        },
        (Datatype::String | Datatype::BoundedString(_), SqlValue::Text(s)) => Ok(Value::Text(s)),
        (Datatype::String | Datatype::BoundedString(_), SqlValue::Integer(i)) => Ok(Value::Text(i.to_string())),
        (Datatype::String | Datatype::BoundedString(_), SqlValue::Real(x)) => Ok(Value::Text(x.to_string())),
        (Datatype::Uid, SqlValue::Text(s)) => Ok(Value::Uid(Uid::parse(&s)?)),
        (datatype, raw) => Err(Error::ValueConversion(format!(
            "cannot read {:?} as {}",
            raw, datatype
        ))),
    }
}
