//! Connection targets
//!
//! Accepted forms:
//! - `sqlite:///relative/path.db`, `sqlite:////absolute/path.db`
//! - `sqlite://`, `sqlite::memory:`, `:memory:` for an in-memory database
//! - a bare filesystem path

use crate::{Error, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Memory,
    File(PathBuf),
}

impl ConnectionTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Connection("empty connection string".to_string()));
        }

        match url {
            ":memory:" | "sqlite://" | "sqlite::memory:" | "sqlite:///:memory:" => {
                return Ok(ConnectionTarget::Memory)
            }
            _ => {}
        }

        if let Some(rest) = url.strip_prefix("sqlite:///") {
            // sqlite:////abs keeps its leading slash in `rest`
            return Ok(ConnectionTarget::File(PathBuf::from(rest)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(Error::Connection(format!("unsupported backend '{}'", scheme)));
        }
        Ok(ConnectionTarget::File(PathBuf::from(url)))
    }

    /// Open a native connection
    pub fn connect(&self, busy_timeout: Duration) -> Result<Connection> {
        let conn = match self {
            ConnectionTarget::Memory => Connection::open_in_memory(),
            ConnectionTarget::File(path) => Connection::open(path),
        }
        .map_err(|e| Error::Connection(format!("{}: {}", self, e)))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Connection(format!("{}: {}", self, e)))?;
        Ok(conn)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Memory => write!(f, "sqlite::memory:"),
            ConnectionTarget::File(path) => write!(f, "sqlite:///{}", path.display()),
        }
    }
}
