//! Ontology - the type system consumed by the persistence engine
//!
//! The engine only needs a narrow view of the type system:
//! - class name → attribute schema (inherited attributes included)
//! - class name → superclasses / subclasses
//! - relationship → inverse relationship
//!
//! Classes and relationships are addressed by a `QualifiedName`
//! (`NAMESPACE.NAME`). Ontologies can be built in code or loaded from TOML
//! (see `loader`).

pub mod datatype;
mod loader;

pub use datatype::{Datatype, ScalarKind};

use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Namespaced name of a class or relationship, written `NAMESPACE.NAME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `NAMESPACE.NAME`
    pub fn parse(text: &str) -> Result<Self> {
        let (namespace, name) = text
            .trim()
            .split_once('.')
            .ok_or_else(|| Error::Ontology(format!("expected NAMESPACE.NAME, got '{}'", text)))?;
        if namespace.is_empty() || name.is_empty() {
            return Err(Error::Ontology(format!("expected NAMESPACE.NAME, got '{}'", text)));
        }
        Ok(Self::new(namespace, name))
    }

    /// Parse a name that may omit its namespace, defaulting to `namespace`
    pub fn parse_in(namespace: &str, text: &str) -> Result<Self> {
        if text.contains('.') {
            Self::parse(text)
        } else {
            Ok(Self::new(namespace, text.trim()))
        }
    }

    /// Deterministic table-name fragment: `<NAMESPACE>___<NAME>`
    pub fn table_name(&self) -> String {
        format!("{}___{}", self.namespace, self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for QualifiedName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        QualifiedName::parse(s)
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        QualifiedName::parse(&value)
    }
}

impl From<QualifiedName> for String {
    fn from(value: QualifiedName) -> Self {
        value.to_string()
    }
}

/// A declared attribute of a class
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    /// `None` when the ontology declares no datatype (stored as unbounded string)
    pub datatype: Option<Datatype>,
    pub default: Option<Value>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype: Some(datatype),
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Declared datatype, falling back to an unbounded string
    pub fn effective_datatype(&self) -> Datatype {
        self.datatype.clone().unwrap_or(Datatype::String)
    }

    /// Default value for a freshly created entity
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

/// A class (entity type)
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: QualifiedName,
    pub superclasses: Vec<QualifiedName>,
    pub attributes: Vec<AttributeDef>,
}

impl ClassDef {
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            superclasses: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn subclass_of(mut self, superclass: QualifiedName) -> Self {
        self.superclasses.push(superclass);
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// A relationship label and its declared inverse
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDef {
    pub name: QualifiedName,
    pub inverse: Option<QualifiedName>,
}

/// The type system: classes, relationships and their inverses.
#[derive(Debug, Clone, Default)]
pub struct Ontology {
    classes: BTreeMap<QualifiedName, ClassDef>,
    relationships: BTreeMap<QualifiedName, RelationshipDef>,
    default_relationship: Option<QualifiedName>,
}

impl Ontology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class (replaces an existing definition with the same name)
    pub fn add_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Register a relationship; the inverse is registered too so that the
    /// lookup works in both directions.
    pub fn add_relationship(&mut self, name: QualifiedName, inverse: Option<QualifiedName>) {
        if let Some(inverse) = &inverse {
            let entry = self
                .relationships
                .entry(inverse.clone())
                .or_insert_with(|| RelationshipDef {
                    name: inverse.clone(),
                    inverse: None,
                });
            entry.inverse = Some(name.clone());
        }
        let entry = self
            .relationships
            .entry(name.clone())
            .or_insert_with(|| RelationshipDef {
                name: name.clone(),
                inverse: None,
            });
        if inverse.is_some() {
            entry.inverse = inverse;
        }
    }

    /// Relationship used when an entity is added without an explicit one
    pub fn set_default_relationship(&mut self, relationship: QualifiedName) {
        self.default_relationship = Some(relationship);
    }

    pub fn default_relationship(&self) -> Option<&QualifiedName> {
        self.default_relationship.as_ref()
    }

    pub fn class(&self, name: &QualifiedName) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }

    pub fn relationship(&self, name: &QualifiedName) -> Option<&RelationshipDef> {
        self.relationships.get(name)
    }

    pub fn is_relationship(&self, name: &QualifiedName) -> bool {
        self.relationships.contains_key(name)
    }

    /// Inverse of a relationship, if the ontology declares one
    pub fn inverse(&self, relationship: &QualifiedName) -> Option<&QualifiedName> {
        self.relationships
            .get(relationship)
            .and_then(|r| r.inverse.as_ref())
    }

    /// Transitive superclasses (nearest first), excluding the class itself
    pub fn superclasses(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<QualifiedName> = self
            .classes
            .get(class)
            .map(|c| c.superclasses.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(current) = queue.pop_front() {
            if current == *class || !seen.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.classes.get(&current) {
                queue.extend(def.superclasses.iter().cloned());
            }
            result.push(current);
        }
        result
    }

    /// The class itself followed by all transitive subclasses
    pub fn subclasses(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        let mut result = vec![class.clone()];
        let mut seen: HashSet<QualifiedName> = HashSet::from([class.clone()]);
        let mut queue = VecDeque::from([class.clone()]);

        while let Some(current) = queue.pop_front() {
            for def in self.classes.values() {
                if def.superclasses.contains(&current) && seen.insert(def.name.clone()) {
                    result.push(def.name.clone());
                    queue.push_back(def.name.clone());
                }
            }
        }
        result
    }

    pub fn is_subclass_of(&self, class: &QualifiedName, ancestor: &QualifiedName) -> bool {
        class == ancestor || self.superclasses(class).contains(ancestor)
    }

    /// All attributes of a class, inherited ones first. A subclass
    /// redeclaring an attribute overrides the inherited definition in place.
    /// Unknown classes have no attributes.
    pub fn attributes(&self, class: &QualifiedName) -> Vec<AttributeDef> {
        let mut attributes = Vec::new();
        let mut visited = HashSet::new();
        self.collect_attributes(class, &mut attributes, &mut visited);
        attributes
    }

    pub fn attribute(&self, class: &QualifiedName, name: &str) -> Option<AttributeDef> {
        self.attributes(class).into_iter().find(|a| a.name == name)
    }

    fn collect_attributes(
        &self,
        class: &QualifiedName,
        out: &mut Vec<AttributeDef>,
        visited: &mut HashSet<QualifiedName>,
    ) {
        if !visited.insert(class.clone()) {
            return;
        }
        let Some(def) = self.classes.get(class) else {
            return;
        };
        for superclass in &def.superclasses {
            self.collect_attributes(superclass, out, visited);
        }
        for attribute in &def.attributes {
            match out.iter_mut().find(|a| a.name == attribute.name) {
                Some(existing) => *existing = attribute.clone(),
                None => out.push(attribute.clone()),
            }
        }
    }
}
