//! Condition algebra
//!
//! Backend-agnostic predicates used for `WHERE` clauses. A condition names
//! tables either directly or through the aliases of a query; translation
//! turns it into SQL text plus bound parameters.

use super::types::to_native_value;
use crate::ontology::Datatype;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::collections::BTreeMap;

/// Query aliases: alias → table name
pub type AliasMap = BTreeMap<String, String>;

/// A predicate over one or more tables
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `table.column = value`
    Equals {
        table: String,
        column: String,
        value: Value,
        datatype: Datatype,
    },
    /// Conjunction; empty means always true
    And(Vec<Condition>),
    /// `table1.column1 = table2.column2`
    Join {
        table1: String,
        column1: String,
        table2: String,
        column2: String,
    },
}

impl Condition {
    pub fn equals(
        table: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
        datatype: Datatype,
    ) -> Self {
        Condition::Equals {
            table: table.into(),
            column: column.into(),
            value: value.into(),
            datatype,
        }
    }

    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    pub fn join(
        table1: impl Into<String>,
        column1: impl Into<String>,
        table2: impl Into<String>,
        column2: impl Into<String>,
    ) -> Self {
        Condition::Join {
            table1: table1.into(),
            column1: column1.into(),
            table2: table2.into(),
            column2: column2.into(),
        }
    }

    /// Combine two optional conditions with AND
    pub fn combine(left: Option<Condition>, right: Condition) -> Condition {
        match left {
            None => right,
            Some(Condition::And(mut items)) => {
                items.push(right);
                Condition::And(items)
            }
            Some(other) => Condition::And(vec![other, right]),
        }
    }
}

/// A translated predicate: SQL text with `?` placeholders and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlPredicate {
    fn always_true() -> Self {
        Self {
            sql: "1 = 1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Quote an SQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Translate a condition into a native predicate. Without an alias map the
/// table fields name real tables; with one they must name its aliases.
pub fn translate(condition: Option<&Condition>, aliases: Option<&AliasMap>) -> Result<SqlPredicate> {
    match condition {
        None => Ok(SqlPredicate::always_true()),
        Some(condition) => {
            let mut params = Vec::new();
            let sql = translate_into(condition, aliases, &mut params)?;
            Ok(SqlPredicate { sql, params })
        }
    }
}

fn translate_into(
    condition: &Condition,
    aliases: Option<&AliasMap>,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match condition {
        Condition::Equals {
            table,
            column,
            value,
            datatype,
        } => {
            let column = column_ref(table, column, aliases)?;
            if value.is_null() {
                return Ok(format!("{} IS NULL", column));
            }
            if datatype.is_vector() || matches!(value, Value::Vector(_)) {
                return Err(Error::UnsupportedCondition(format!(
                    "equality on vector column {}",
                    column
                )));
            }
            params.push(to_native_value(value, datatype)?);
            Ok(format!("{} = ?", column))
        }
        Condition::And(conditions) => {
            if conditions.is_empty() {
                return Ok("1 = 1".to_string());
            }
            let parts = conditions
                .iter()
                .map(|c| translate_into(c, aliases, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" AND ")))
        }
        Condition::Join {
            table1,
            column1,
            table2,
            column2,
        } => Ok(format!(
            "{} = {}",
            column_ref(table1, column1, aliases)?,
            column_ref(table2, column2, aliases)?
        )),
    }
}

fn column_ref(table: &str, column: &str, aliases: Option<&AliasMap>) -> Result<String> {
    if let Some(aliases) = aliases {
        if !aliases.contains_key(table) {
            return Err(Error::UnsupportedCondition(format!(
                "condition refers to unknown table alias '{}'",
                table
            )));
        }
    }
    Ok(format!("{}.{}", quote_ident(table), quote_ident(column)))
}
