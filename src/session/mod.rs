//! Wrapper Session - the object graph backed by the relational store
//!
//! A session owns one connection, a registry of loaded entities, a buffer
//! of pending changes and the set of expired entities. Changes become
//! visible to other sessions on `commit`.

mod buffer;
mod flush;
mod load;
mod prune;
mod wrapper;

pub use buffer::ChangeBuffer;
pub use load::Loaded;
pub use wrapper::WrapperSession;

use crate::ontology::QualifiedName;
use std::time::Duration;

/// Default busy timeout for concurrent writers
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Options for opening a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Class of the root (wrapper) entity; used as edge target hint
    pub root_class: QualifiedName,
    pub busy_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            root_class: QualifiedName::new("CUBA", "WRAPPER"),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl SessionOptions {
    pub fn with_root_class(mut self, root_class: QualifiedName) -> Self {
        self.root_class = root_class;
        self
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connected,
    TransactionOpen,
}
