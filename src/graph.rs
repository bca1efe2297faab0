//! Object graph - in-memory representation of entities and their edges
//!
//! `Graph` is used both to build a graph before handing it to a session and
//! as the session's registry of loaded objects.

use crate::ontology::{Ontology, QualifiedName};
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Neighbors of an entity: relationship → (target uid → target class)
pub type NeighborMap = BTreeMap<QualifiedName, BTreeMap<Uid, QualifiedName>>;

/// A node of the object graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uid: Uid,
    pub oclass: QualifiedName,
    pub attributes: BTreeMap<String, Value>,
    pub neighbors: NeighborMap,
}

impl Entity {
    /// Create an entity with no attributes and no neighbors
    pub fn new(uid: Uid, oclass: QualifiedName) -> Self {
        Self {
            uid,
            oclass,
            attributes: BTreeMap::new(),
            neighbors: BTreeMap::new(),
        }
    }

    /// Create an entity with a fresh uid, filling unspecified attributes
    /// with their ontology defaults.
    pub fn build<K, V>(
        ontology: &Ontology,
        oclass: QualifiedName,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::build_with_uid(ontology, Uid::generate(), oclass, attributes)
    }

    pub fn build_with_uid<K, V>(
        ontology: &Ontology,
        uid: Uid,
        oclass: QualifiedName,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        if ontology.class(&oclass).is_none() {
            return Err(Error::Ontology(format!("unknown class {}", oclass)));
        }
        let declared = ontology.attributes(&oclass);
        let mut entity = Entity::new(uid, oclass);
        for attribute in &declared {
            entity
                .attributes
                .insert(attribute.name.clone(), attribute.initial_value());
        }
        for (name, value) in attributes {
            let name = name.into();
            let def = declared
                .iter()
                .find(|a| a.name == name)
                .ok_or_else(|| Error::UnknownAttribute {
                    class: entity.oclass.to_string(),
                    attribute: name.clone(),
                })?;
            let value = def.effective_datatype().coerce(value.into())?;
            entity.attributes.insert(name, value);
        }
        Ok(entity)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Targets of one relationship
    pub fn neighbors_by(&self, relationship: &QualifiedName) -> Vec<Uid> {
        self.neighbors
            .get(relationship)
            .map(|targets| targets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Targets over all relationships
    pub fn neighbor_uids(&self) -> BTreeSet<Uid> {
        self.neighbors
            .values()
            .flat_map(|targets| targets.keys().copied())
            .collect()
    }

    pub fn is_linked_to(&self, uid: Uid) -> bool {
        self.neighbors.values().any(|targets| targets.contains_key(&uid))
    }

    pub fn add_neighbor(&mut self, relationship: QualifiedName, uid: Uid, oclass: QualifiedName) {
        self.neighbors.entry(relationship).or_default().insert(uid, oclass);
    }

    /// Remove `uid` under one relationship, or under all of them when
    /// `relationship` is `None`. Returns the relationships that were removed.
    pub fn remove_neighbor(&mut self, relationship: Option<&QualifiedName>, uid: Uid) -> Vec<QualifiedName> {
        let mut removed = Vec::new();
        for (rel, targets) in self.neighbors.iter_mut() {
            if relationship.is_some_and(|r| r != rel) {
                continue;
            }
            if targets.remove(&uid).is_some() {
                removed.push(rel.clone());
            }
        }
        self.neighbors.retain(|_, targets| !targets.is_empty());
        removed
    }
}

/// A set of entities addressed by uid.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    entities: HashMap<Uid, Entity>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an entity, returning its uid
    pub fn insert(&mut self, entity: Entity) -> Uid {
        let uid = entity.uid;
        self.entities.insert(uid, entity);
        uid
    }

    pub fn get(&self, uid: Uid) -> Option<&Entity> {
        self.entities.get(&uid)
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut Entity> {
        self.entities.get_mut(&uid)
    }

    pub fn remove(&mut self, uid: Uid) -> Option<Entity> {
        self.entities.remove(&uid)
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.entities.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All uids, sorted
    pub fn uids(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.entities.keys().copied().collect();
        uids.sort();
        uids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Connect two entities. The inverse edge is added as well when the
    /// ontology declares one.
    pub fn relate(
        &mut self,
        ontology: &Ontology,
        origin: Uid,
        relationship: &QualifiedName,
        target: Uid,
    ) -> Result<()> {
        let origin_class = self.get(origin).ok_or(Error::UnknownEntity(origin))?.oclass.clone();
        let target_class = self.get(target).ok_or(Error::UnknownEntity(target))?.oclass.clone();

        if let Some(entity) = self.get_mut(origin) {
            entity.add_neighbor(relationship.clone(), target, target_class);
        }
        if let Some(inverse) = ontology.inverse(relationship) {
            if let Some(entity) = self.get_mut(target) {
                entity.add_neighbor(inverse.clone(), origin, origin_class);
            }
        }
        Ok(())
    }

    /// Disconnect two entities (both directions). With `relationship` set to
    /// `None` every edge between the pair is removed. Returns whether any
    /// edge was removed.
    pub fn unrelate(
        &mut self,
        ontology: &Ontology,
        origin: Uid,
        relationship: Option<&QualifiedName>,
        target: Uid,
    ) -> bool {
        let removed = self
            .get_mut(origin)
            .map(|e| e.remove_neighbor(relationship, target))
            .unwrap_or_default();

        let mut any = !removed.is_empty();
        if let Some(entity) = self.get_mut(target) {
            match relationship {
                None => any |= !entity.remove_neighbor(None, origin).is_empty(),
                Some(_) => {
                    for rel in &removed {
                        if let Some(inverse) = ontology.inverse(rel) {
                            any |= !entity.remove_neighbor(Some(inverse), origin).is_empty();
                        }
                    }
                }
            }
        }
        any
    }

    /// Remove `uid` from every neighbor map. Returns the uids whose maps changed.
    pub fn detach(&mut self, uid: Uid) -> Vec<Uid> {
        let mut changed = Vec::new();
        for entity in self.entities.values_mut() {
            if !entity.remove_neighbor(None, uid).is_empty() {
                changed.push(entity.uid);
            }
        }
        changed.sort();
        changed
    }

    /// Uids reachable from `roots` by following neighbor edges (roots included
    /// when present in the graph). Edges leaving the graph are not followed.
    pub fn reachable_from(&self, roots: &[Uid]) -> HashSet<Uid> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Uid> = roots.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            let Some(entity) = self.get(current) else {
                continue;
            };
            if !visited.insert(current) {
                continue;
            }
            queue.extend(entity.neighbor_uids());
        }
        visited
    }
}
