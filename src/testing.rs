//! Shared fixtures for unit tests

use crate::ontology::{Ontology, QualifiedName};
use std::sync::Arc;

pub const CITY_ONTOLOGY: &str = include_str!("../tests/fixtures/city.toml");

pub fn city_ontology() -> Arc<Ontology> {
    Arc::new(Ontology::from_toml_str(CITY_ONTOLOGY).unwrap())
}

pub fn qn(name: &str) -> QualifiedName {
    QualifiedName::parse(name).unwrap()
}
