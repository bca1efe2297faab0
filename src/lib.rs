//! # Relgraph - Graph-to-relational persistence engine
//!
//! Stores a typed, mutable object graph inside a relational database and
//! hides the relational schema behind a session that behaves like an
//! in-memory object graph.
//!
//! Relgraph provides:
//! - A closed datatype model with an explicit mapping to native SQL column types
//! - A backend-agnostic condition algebra translated into SQL predicates
//! - A schema manager that creates per-type data tables on demand and reflects existing ones
//! - A wrapper session with buffered commits, lazy loading, pruning and expiry
//! - A migration tool that upgrades databases written with the legacy layout

pub mod uid;
pub mod value;
pub mod ontology;
pub mod graph;
pub mod storage;
pub mod session;
pub mod migrate;
pub mod config;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use uid::Uid;
pub use value::Value;
pub use ontology::{Datatype, Ontology, QualifiedName};
pub use graph::{Entity, Graph};
pub use storage::{Condition, Executor, SqlQuery};
pub use session::{SessionOptions, SessionState, WrapperSession};

/// Result type alias for Relgraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Relgraph operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot connect to backend: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Unsupported datatype: {0}")]
    UnsupportedDatatype(String),

    #[error("Unsupported condition: {0}")]
    UnsupportedCondition(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Value conversion error: {0}")]
    ValueConversion(String),

    #[error("Ontology error: {0}")]
    Ontology(String),

    #[error("Entity not found: {0}")]
    UnknownEntity(Uid),

    #[error("Unknown attribute '{attribute}' for class {class}")]
    UnknownAttribute { class: String, attribute: String },

    #[error("Table not found: {0}")]
    UnknownTable(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("No transaction is open")]
    NoTransaction,

    #[error("A transaction is already open")]
    TransactionAlreadyOpen,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Commit failed and was rolled back: {0}")]
    Transaction(#[source] Box<Error>),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
