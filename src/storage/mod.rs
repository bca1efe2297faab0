//! Storage Layer - SQLite-backed persistence
//!
//! - `types`: abstract datatypes ↔ native column types and values
//! - `condition`: backend-agnostic predicates and their SQL translation
//! - `schema`: table creation, reflection and the persisted layout
//! - `executor`: select/insert/update/delete inside a session transaction

pub mod condition;
pub mod connection;
pub mod executor;
pub mod schema;
pub mod types;

pub use condition::{translate, AliasMap, Condition, SqlPredicate};
pub use connection::ConnectionTarget;
pub use executor::{Cursor, DbStats, Executor, Inserted, SqlQuery, TableCount};
pub use schema::{
    data_table_name, vector_column, ColumnDef, DataLayout, SchemaManager, TableDef, TableSpec,
    DATA_TABLE_PREFIX, MASTER_TABLE, RELATIONSHIP_TABLE,
};
pub use types::NativeType;
