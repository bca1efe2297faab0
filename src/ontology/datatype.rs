//! Abstract attribute datatypes
//!
//! A closed set of datatype kinds. Textual names found in ontology files are
//! parsed here, so an unknown datatype fails when the ontology is loaded and
//! never later when a row is written.

use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Element kind of a fixed-length vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Integer,
    Float,
}

impl ScalarKind {
    pub fn datatype(&self) -> Datatype {
        match self {
            ScalarKind::Integer => Datatype::Integer,
            ScalarKind::Float => Datatype::Float,
        }
    }
}

/// Abstract datatype of an attribute or column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    Integer,
    Float,
    Boolean,
    /// Unbounded string
    String,
    /// String with a maximum length (`STRING-<n>`)
    BoundedString(usize),
    /// Fixed-length vector, expanded into one column per component
    Vector { element: ScalarKind, len: usize },
    /// Entity identifier
    Uid,
}

fn bounded_string_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(?:.*[:./#])?STRING-(\d+)$").expect("valid regex"))
}

fn vector_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?:.*[:./#])?VECTOR:(?:(INT|INTEGER|FLOAT):)?(\d+)$").expect("valid regex")
    })
}

impl Datatype {
    /// Canonical textual name
    pub fn name(&self) -> String {
        match self {
            Datatype::Integer => "XSD:integer".to_string(),
            Datatype::Float => "XSD:float".to_string(),
            Datatype::Boolean => "XSD:boolean".to_string(),
            Datatype::String => "XSD:string".to_string(),
            Datatype::BoundedString(n) => format!("STRING-{}", n),
            Datatype::Vector { element: ScalarKind::Integer, len } => format!("VECTOR:INT:{}", len),
            Datatype::Vector { element: ScalarKind::Float, len } => format!("VECTOR:FLOAT:{}", len),
            Datatype::Uid => "UUID".to_string(),
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Datatype::Vector { .. })
    }

    /// Check a value against this datatype, applying lossless widening
    /// (integer to float, text to uid).
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (Datatype::Integer, Value::Integer(i)) => Ok(Value::Integer(i)),
            (Datatype::Float, Value::Float(x)) => Ok(Value::Float(x)),
            (Datatype::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (Datatype::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Datatype::String, Value::Text(s)) => Ok(Value::Text(s)),
            (Datatype::String, Value::Uid(uid)) => Ok(Value::Text(uid.to_string())),
            (Datatype::BoundedString(n), Value::Text(s)) => {
                if s.chars().count() > *n {
                    Err(Error::ValueConversion(format!(
                        "string of length {} exceeds STRING-{}",
                        s.chars().count(),
                        n
                    )))
                } else {
                    Ok(Value::Text(s))
                }
            }
            (Datatype::Uid, Value::Uid(uid)) => Ok(Value::Uid(uid)),
            (Datatype::Uid, Value::Text(s)) => Ok(Value::Uid(Uid::parse(&s)?)),
            (Datatype::Vector { element, len }, Value::Vector(items)) => {
                if items.len() != *len {
                    return Err(Error::ValueConversion(format!(
                        "expected vector of length {}, got {}",
                        len,
                        items.len()
                    )));
                }
                let element = element.datatype();
                items
                    .into_iter()
                    .map(|item| element.coerce(item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Vector)
            }
            (datatype, value) => Err(Error::ValueConversion(format!(
                "value {} does not match datatype {}",
                value,
                datatype.name()
            ))),
        }
    }
}

impl FromStr for Datatype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "xsd:integer" | "xsd:int" | "integer" | "int" => return Ok(Datatype::Integer),
            "xsd:float" | "xsd:double" | "xsd:decimal" | "float" => return Ok(Datatype::Float),
            "xsd:boolean" | "boolean" | "bool" => return Ok(Datatype::Boolean),
            "xsd:string" | "string" => return Ok(Datatype::String),
            "uuid" | "uid" => return Ok(Datatype::Uid),
            _ => {}
        }

        if let Some(caps) = bounded_string_pattern().captures(trimmed) {
            let len: usize = caps[1]
                .parse()
                .map_err(|_| Error::UnsupportedDatatype(trimmed.to_string()))?;
            return Ok(Datatype::BoundedString(len));
        }

        if let Some(caps) = vector_pattern().captures(trimmed) {
            let element = match caps.get(1).map(|m| m.as_str().to_ascii_uppercase()) {
                Some(kind) if kind.starts_with("INT") => ScalarKind::Integer,
                _ => ScalarKind::Float,
            };
            let len: usize = caps[2]
                .parse()
                .map_err(|_| Error::UnsupportedDatatype(trimmed.to_string()))?;
            return Ok(Datatype::Vector { element, len });
        }

        Err(Error::UnsupportedDatatype(trimmed.to_string()))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
