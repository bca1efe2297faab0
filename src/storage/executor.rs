//! Query/Mutation Executor
//!
//! Owns the native connection and the schema cache. Mutations and DDL run
//! inside the session's open transaction; selects outside a transaction run
//! in autocommit mode.

use super::condition::{quote_ident, translate, AliasMap, Condition};
use super::connection::ConnectionTarget;
use super::schema::{
    master_table_spec, relationship_table_spec, SchemaManager, TableDef, TableSpec, MASTER_TABLE,
    RELATIONSHIP_TABLE,
};
use super::types::{from_native_value, to_native_value};
use crate::ontology::Datatype;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The row was written. Carries the generated key when the table lets
    /// the backend generate its primary key.
    Created(Option<i64>),
    /// The row violates a uniqueness constraint and was not written
    Duplicate,
}

impl Inserted {
    pub fn key(&self) -> Option<i64> {
        match self {
            Inserted::Created(key) => *key,
            Inserted::Duplicate => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Inserted::Duplicate)
    }
}

/// A select request: aliased tables, positional columns and a filter
#[derive(Debug, Clone, Default)]
pub struct SqlQuery {
    pub tables: AliasMap,
    pub columns: Vec<(String, String)>,
    pub datatypes: Vec<Datatype>,
    pub condition: Option<Condition>,
}

impl SqlQuery {
    pub fn new(alias: impl Into<String>, table: impl Into<String>) -> Self {
        let mut tables = AliasMap::new();
        tables.insert(alias.into(), table.into());
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn join_table(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        self.tables.insert(alias.into(), table.into());
        self
    }

    pub fn column(mut self, alias: impl Into<String>, column: impl Into<String>, datatype: Datatype) -> Self {
        self.columns.push((alias.into(), column.into()));
        self.datatypes.push(datatype);
        self
    }

    pub fn columns<S: AsRef<str>>(mut self, alias: &str, columns: &[S], datatypes: &[Datatype]) -> Self {
        for (column, datatype) in columns.iter().zip(datatypes) {
            self = self.column(alias, column.as_ref(), datatype.clone());
        }
        self
    }

    /// AND a condition onto the existing filter
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(Condition::combine(self.condition.take(), condition));
        self
    }

    fn to_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        if self.columns.is_empty() {
            return Err(Error::InvalidQuery("no columns selected".to_string()));
        }
        if self.columns.len() != self.datatypes.len() {
            return Err(Error::InvalidQuery(format!(
                "{} columns but {} datatypes",
                self.columns.len(),
                self.datatypes.len()
            )));
        }

        let mut columns = Vec::with_capacity(self.columns.len());
        for (alias, column) in &self.columns {
            if !self.tables.contains_key(alias) {
                return Err(Error::InvalidQuery(format!("unknown table alias '{}'", alias)));
            }
            columns.push(format!("{}.{}", quote_ident(alias), quote_ident(column)));
        }
        let tables: Vec<String> = self
            .tables
            .iter()
            .map(|(alias, table)| format!("{} AS {}", quote_ident(table), quote_ident(alias)))
            .collect();
        let predicate = translate(self.condition.as_ref(), Some(&self.tables))?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            columns.join(", "),
            tables.join(", "),
            predicate.sql
        );
        Ok((sql, predicate.params))
    }
}

/// One-pass sequence of rows, positional to the selected columns.
/// Rows are materialised before the cursor is handed out.
#[derive(Debug)]
pub struct Cursor {
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Cursor {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new().into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// Row count of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub name: String,
    pub rows: usize,
}

/// Database statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbStats {
    pub entities: usize,
    pub relationships: usize,
    pub tables: Vec<TableCount>,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Entities: {}", self.entities)?;
        writeln!(f, "  Relationships: {}", self.relationships)?;
        for table in &self.tables {
            writeln!(f, "  {}: {}", table.name, table.rows)?;
        }
        Ok(())
    }
}

/// Executes select/insert/update/delete and DDL against one connection
pub struct Executor {
    conn: Connection,
    schema: SchemaManager,
    in_transaction: bool,
}

impl Executor {
    /// Connect and reflect the existing schema
    pub fn open(target: &ConnectionTarget, busy_timeout: Duration) -> Result<Self> {
        let conn = target.connect(busy_timeout)?;
        let mut executor = Self {
            conn,
            schema: SchemaManager::new(),
            in_transaction: false,
        };
        executor.schema.reflect_all(&executor.conn)?;
        tracing::debug!("Connected to {}", target);
        Ok(executor)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&ConnectionTarget::Memory, Duration::from_millis(0))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn require_transaction(&self) -> Result<()> {
        if self.in_transaction {
            Ok(())
        } else {
            Err(Error::NoTransaction)
        }
    }

    // ========== Transactions ==========

    pub fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::TransactionAlreadyOpen);
        }
        self.conn.execute("BEGIN TRANSACTION", [])?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction. On failure the transaction stays open
    /// so the caller can roll it back.
    pub fn commit(&mut self) -> Result<()> {
        self.require_transaction()?;
        if self.conn.is_autocommit() {
            self.in_transaction = false;
            self.schema.discard_uncommitted();
            return Err(Error::InvalidOperation(
                "transaction was rolled back by the backend".to_string(),
            ));
        }
        self.conn.execute("COMMIT", [])?;
        self.in_transaction = false;
        self.schema.mark_committed();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.require_transaction()?;
        self.in_transaction = false;
        // SQLite may already have rolled back on its own after some errors
        if !self.conn.is_autocommit() {
            self.conn.execute("ROLLBACK", [])?;
        }
        self.schema.discard_uncommitted();
        // tables dropped inside the transaction exist again
        self.schema.reflect_all(&self.conn)?;
        Ok(())
    }

    /// Run `f` inside the open transaction, or inside one of its own that
    /// is committed on success and rolled back on failure
    pub fn run_in_transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.in_transaction {
            return f(self);
        }
        self.begin()?;
        let result = f(self).and_then(|value| self.commit().map(|_| value));
        if result.is_err() && self.in_transaction {
            if let Err(e) = self.rollback() {
                tracing::warn!("Rollback failed: {}", e);
            }
        }
        result
    }

    // ========== Schema ==========

    /// Create the master and relationship tables if they are missing
    pub fn create_base_tables(&mut self) -> Result<()> {
        self.run_in_transaction(|exec| {
            exec.create_table(&master_table_spec())?;
            exec.create_table(&relationship_table_spec())?;
            Ok(())
        })
    }

    pub fn create_table(&mut self, spec: &TableSpec) -> Result<bool> {
        self.require_transaction()?;
        self.schema.create_table(&self.conn, spec)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.require_transaction()?;
        self.schema.drop_table(&self.conn, name)
    }

    pub fn has_table(&mut self, name: &str) -> Result<bool> {
        Ok(self.schema.get_or_reflect(&self.conn, name)?.is_some())
    }

    pub fn table_def(&mut self, name: &str) -> Result<Option<TableDef>> {
        Ok(self.schema.get_or_reflect(&self.conn, name)?.cloned())
    }

    pub fn list_tables(&self, prefix: &str) -> BTreeSet<String> {
        self.schema.list_tables(prefix)
    }

    /// Re-read every table shape from the database
    pub fn reflect(&mut self) -> Result<usize> {
        self.schema.clear_cache();
        self.schema.reflect_all(&self.conn)
    }

    // ========== Rows ==========

    /// Run a select. A query over a table that does not exist yields no rows.
    pub fn select(&mut self, query: &SqlQuery) -> Result<Cursor> {
        for table in query.tables.values() {
            if !self.has_table(table)? {
                tracing::debug!("Select on missing table {}", table);
                return Ok(Cursor::empty());
            }
        }

        let (sql, params) = query.to_sql()?;
        let width = query.columns.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let raw: Vec<Vec<SqlValue>> = stmt
            .query_map(params_from_iter(params), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<SqlValue>>>()
            })?
            .collect::<rusqlite::Result<_>>()?;

        let rows = raw
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&query.datatypes)
                    .map(|(value, datatype)| from_native_value(datatype, value))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Cursor {
            rows: rows.into_iter(),
        })
    }

    /// Insert one row. A row that violates a uniqueness constraint is
    /// reported as `Inserted::Duplicate` instead of failing.
    pub fn insert<S: AsRef<str>>(
        &mut self,
        table: &str,
        columns: &[S],
        values: &[Value],
        datatypes: &[Datatype],
    ) -> Result<Inserted> {
        self.require_transaction()?;
        check_widths(columns.len(), values.len(), datatypes.len())?;
        let generate_pk = match self.table_def(table)? {
            Some(def) => def.generate_pk,
            None => return Err(Error::UnknownTable(table.to_string())),
        };

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table))
        } else {
            let names: Vec<String> = columns.iter().map(|c| quote_ident(c.as_ref())).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                names.join(", "),
                placeholders
            )
        };
        let params = native_params(values, datatypes)?;

        match self.conn.execute(&sql, params_from_iter(params)) {
            Ok(_) if generate_pk => Ok(Inserted::Created(Some(self.conn.last_insert_rowid()))),
            Ok(_) => Ok(Inserted::Created(None)),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                tracing::debug!("Duplicate row in {} ignored", table);
                Ok(Inserted::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Update matching rows; returns how many matched
    pub fn update<S: AsRef<str>>(
        &mut self,
        table: &str,
        columns: &[S],
        values: &[Value],
        datatypes: &[Datatype],
        condition: Option<&Condition>,
    ) -> Result<usize> {
        self.require_transaction()?;
        check_widths(columns.len(), values.len(), datatypes.len())?;
        if columns.is_empty() {
            return Err(Error::InvalidQuery(format!("update of {} sets no columns", table)));
        }
        if !self.has_table(table)? {
            return Err(Error::UnknownTable(table.to_string()));
        }

        let assignments: Vec<String> = columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c.as_ref())))
            .collect();
        let predicate = translate(condition, None)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            predicate.sql
        );
        let mut params = native_params(values, datatypes)?;
        params.extend(predicate.params);

        Ok(self.conn.execute(&sql, params_from_iter(params))?)
    }

    /// Delete matching rows; returns how many were deleted
    pub fn delete(&mut self, table: &str, condition: Option<&Condition>) -> Result<usize> {
        self.require_transaction()?;
        if !self.has_table(table)? {
            return Ok(0);
        }
        let predicate = translate(condition, None)?;
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), predicate.sql);
        Ok(self.conn.execute(&sql, params_from_iter(predicate.params))?)
    }

    pub fn count_rows(&mut self, table: &str) -> Result<usize> {
        if !self.has_table(table)? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&mut self) -> Result<DbStats> {
        let names: Vec<String> = self.list_tables("").into_iter().collect();
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let rows = self.count_rows(&name)?;
            tables.push(TableCount { name, rows });
        }
        Ok(DbStats {
            entities: self.count_rows(MASTER_TABLE)?,
            relationships: self.count_rows(RELATIONSHIP_TABLE)?,
            tables,
        })
    }

    /// Release the connection, rolling back an open transaction
    pub fn close(mut self) -> Result<()> {
        if self.in_transaction {
            self.rollback()?;
        }
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

fn check_widths(columns: usize, values: usize, datatypes: usize) -> Result<()> {
    if columns != values || columns != datatypes {
        return Err(Error::InvalidQuery(format!(
            "{} columns, {} values, {} datatypes",
            columns, values, datatypes
        )));
    }
    Ok(())
}

fn native_params(values: &[Value], datatypes: &[Datatype]) -> Result<Vec<SqlValue>> {
    values
        .iter()
        .zip(datatypes)
        .map(|(value, datatype)| to_native_value(value, datatype))
        .collect()
}
