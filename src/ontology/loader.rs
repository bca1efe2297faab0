//! TOML ontology documents
//!
//! One document describes one namespace:
//!
//! ```toml
//! namespace = "CITY"
//! default_relationship = "HAS_PART"
//!
//! [classes.CITIZEN]
//! superclasses = ["PERSON"]
//!
//! [classes.PERSON.attributes.age]
//! datatype = "XSD:integer"
//! default = 25
//!
//! [relationships.HAS_PART]
//! inverse = "IS_PART_OF"
//! ```
//!
//! Names without a namespace refer to the document's own namespace.

use super::{AttributeDef, ClassDef, Datatype, Ontology, QualifiedName};
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawNamespace {
    namespace: String,
    #[serde(default)]
    default_relationship: Option<String>,
    #[serde(default)]
    classes: BTreeMap<String, RawClass>,
    #[serde(default)]
    relationships: BTreeMap<String, RawRelationship>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClass {
    #[serde(default)]
    superclasses: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, RawAttribute>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default)]
    default: Option<toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelationship {
    #[serde(default)]
    inverse: Option<String>,
}

impl Ontology {
    /// Build an ontology from a single TOML namespace document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let mut ontology = Ontology::new();
        ontology.load_toml_str(source)?;
        Ok(ontology)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Merge a TOML namespace document into this ontology
    pub fn load_toml_str(&mut self, source: &str) -> Result<()> {
        let raw: RawNamespace = toml::from_str(source)?;
        let namespace = raw.namespace.trim().to_string();
        if namespace.is_empty() || namespace.contains('.') {
            return Err(Error::Ontology(format!("invalid namespace '{}'", raw.namespace)));
        }

        for (name, class) in raw.classes {
            let mut def = ClassDef::new(QualifiedName::parse_in(&namespace, &name)?);
            for superclass in &class.superclasses {
                def.superclasses.push(QualifiedName::parse_in(&namespace, superclass)?);
            }
            for (attr_name, attr) in class.attributes {
                def.attributes.push(parse_attribute(&def.name, attr_name, attr)?);
            }
            self.add_class(def);
        }

        for (name, relationship) in raw.relationships {
            let name = QualifiedName::parse_in(&namespace, &name)?;
            let inverse = relationship
                .inverse
                .as_deref()
                .map(|inv| QualifiedName::parse_in(&namespace, inv))
                .transpose()?;
            self.add_relationship(name, inverse);
        }

        if let Some(default) = raw.default_relationship {
            let default = QualifiedName::parse_in(&namespace, &default)?;
            if !self.is_relationship(&default) {
                return Err(Error::Ontology(format!(
                    "default relationship {} is not declared",
                    default
                )));
            }
            self.set_default_relationship(default);
        }

        tracing::debug!("Loaded ontology namespace {}", namespace);
        Ok(())
    }
}

fn parse_attribute(class: &QualifiedName, name: String, raw: RawAttribute) -> Result<AttributeDef> {
    let datatype = raw
        .datatype
        .as_deref()
        .map(str::parse::<Datatype>)
        .transpose()?;
    let default = match raw.default {
        Some(value) => {
            let effective = datatype.clone().unwrap_or(Datatype::String);
            let converted = toml_to_value(&value, &effective).map_err(|e| {
                Error::Ontology(format!("invalid default for {}.{}: {}", class, name, e))
            })?;
            Some(effective.coerce(converted)?)
        }
        None => None,
    };
    Ok(AttributeDef {
        name,
        datatype,
        default,
    })
}

fn toml_to_value(value: &toml::Value, datatype: &Datatype) -> Result<Value> {
    match (datatype, value) {
        (Datatype::Uid, toml::Value::String(s)) => Ok(Value::Uid(Uid::parse(s)?)),
        (Datatype::Vector { element, .. }, toml::Value::Array(items)) => {
            let element = element.datatype();
            items
                .iter()
                .map(|item| toml_to_value(item, &element))
                .collect::<Result<Vec<_>>>()
                .map(Value::Vector)
        }
        (_, toml::Value::String(s)) => Ok(Value::Text(s.clone())),
        (_, toml::Value::Integer(i)) => Ok(Value::Integer(*i)),
        (_, toml::Value::Float(x)) => Ok(Value::Float(*x)),
        (_, toml::Value::Boolean(b)) => Ok(Value::Bool(*b)),
        (_, other) => Err(Error::ValueConversion(format!("unsupported default {}", other))),
    }
}
