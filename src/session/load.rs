//! Loading entities from storage, lazy iteration and expiry

use super::wrapper::{exec, WrapperSession};
use crate::graph::Entity;
use crate::ontology::{Datatype, QualifiedName};
use crate::storage::schema::{
    master_datatypes, relationship_datatypes, MASTER_COLUMNS, RELATIONSHIP_COLUMNS,
};
use crate::storage::{data_table_name, Condition, DataLayout, SqlQuery, MASTER_TABLE, RELATIONSHIP_TABLE};
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::HashSet;

/// Entities of a class, fetched one at a time as the iterator advances
pub struct Loaded<'a> {
    session: &'a mut WrapperSession,
    uids: std::vec::IntoIter<Uid>,
}

impl Iterator for Loaded<'_> {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let uid = self.uids.next()?;
            match self.session.ensure_loaded(uid) {
                Ok(true) => {
                    if let Some(entity) = self.session.registry.get(uid) {
                        return Some(Ok(entity.clone()));
                    }
                }
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl WrapperSession {
    /// Entities of `class` and its subclasses: stored ones plus those added
    /// in this session. Empty when the class has no table yet.
    pub fn load_by_type(&mut self, class: &QualifiedName) -> Result<Loaded<'_>> {
        let executor = exec(&mut self.executor)?;
        let classes = self.ontology.subclasses(class);

        let mut seen = HashSet::new();
        let mut uids = Vec::new();
        for sub in &classes {
            let query = SqlQuery::new("m", MASTER_TABLE)
                .join_table("d", data_table_name(sub))
                .column("m", "uid", Datatype::Uid)
                .filter(Condition::join("m", "uid", "d", "uid"))
                .filter(Condition::equals("m", "oclass", sub.to_string(), Datatype::String));
            for row in executor.select(&query)? {
                if let Some(uid) = row.first().and_then(Value::as_uid) {
                    if !self.buffer.is_deleted(uid) && seen.insert(uid) {
                        uids.push(uid);
                    }
                }
            }
        }
        for uid in self.buffer.added() {
            let pending = self.registry.get(*uid).is_some_and(|e| classes.contains(&e.oclass));
            if pending && seen.insert(*uid) {
                uids.push(*uid);
            }
        }

        tracing::debug!("{} entities of {}", uids.len(), class);
        Ok(Loaded {
            session: self,
            uids: uids.into_iter(),
        })
    }

    /// Make entities available in the registry. Registered, fresh entities
    /// are left alone. Returns the uids that exist.
    pub fn load(&mut self, uids: &[Uid]) -> Result<Vec<Uid>> {
        let mut found = Vec::with_capacity(uids.len());
        for &uid in uids {
            if self.ensure_loaded(uid)? {
                found.push(uid);
            }
        }
        Ok(found)
    }

    /// Mark entities as stale. The root, entities with pending changes and
    /// entities that are not loaded are skipped.
    pub fn expire(&mut self, uids: &[Uid]) {
        for &uid in uids {
            if uid.is_root() || self.buffer.contains(uid) || !self.registry.contains(uid) {
                continue;
            }
            self.expired.insert(uid);
        }
    }

    pub fn expire_all(&mut self) {
        let uids = self.registry.uids();
        self.expire(&uids);
        tracing::debug!("Expired {} entities", self.expired.len());
    }

    /// Reload entities from storage now. Returns the uids that still exist.
    pub fn refresh(&mut self, uids: &[Uid]) -> Result<Vec<Uid>> {
        self.expire(uids);
        let targets: Vec<Uid> = uids
            .iter()
            .copied()
            .filter(|uid| !uid.is_root() && !self.buffer.contains(*uid))
            .collect();
        self.load_entities(&targets)
    }

    /// Whether `uid` is registered and fresh, loading it if it is not
    pub(super) fn ensure_loaded(&mut self, uid: Uid) -> Result<bool> {
        if uid.is_root() {
            return Ok(true);
        }
        if self.registry.contains(uid) && !self.expired.contains(&uid) {
            return Ok(true);
        }
        Ok(!self.load_entities(&[uid])?.is_empty())
    }

    /// Fetch entities from storage, replacing registered copies. Entities
    /// that are gone from storage are dropped from the registry.
    pub(super) fn load_entities(&mut self, uids: &[Uid]) -> Result<Vec<Uid>> {
        let mut found = Vec::new();
        for &uid in uids {
            if uid.is_root() || self.buffer.is_deleted(uid) {
                continue;
            }
            if self.buffer.contains(uid) && self.registry.contains(uid) {
                found.push(uid);
                continue;
            }
            match self.fetch_entity(uid)? {
                Some((entity, first_level)) => {
                    self.register(entity, first_level);
                    found.push(uid);
                }
                None => self.forget(uid),
            }
        }
        Ok(found)
    }

    pub(super) fn load_first_level(&mut self) -> Result<usize> {
        let uids = self.stored_uids(Some(Condition::equals(
            "m",
            "first_level",
            true,
            Datatype::Boolean,
        )))?;
        Ok(self.load_entities(&uids)?.len())
    }

    /// Uids of the master table, optionally filtered on alias `m`
    pub(super) fn stored_uids(&mut self, condition: Option<Condition>) -> Result<Vec<Uid>> {
        let mut query = SqlQuery::new("m", MASTER_TABLE).column("m", "uid", Datatype::Uid);
        if let Some(condition) = condition {
            query = query.filter(condition);
        }
        Ok(exec(&mut self.executor)?
            .select(&query)?
            .filter_map(|row| row.first().and_then(Value::as_uid))
            .collect())
    }

    /// Stored edge targets of an entity
    pub(super) fn stored_targets(&mut self, uid: Uid) -> Result<Vec<Uid>> {
        let query = SqlQuery::new("r", RELATIONSHIP_TABLE)
            .column("r", "target", Datatype::Uid)
            .filter(Condition::equals("r", "origin", uid, Datatype::Uid));
        Ok(exec(&mut self.executor)?
            .select(&query)?
            .filter_map(|row| row.first().and_then(Value::as_uid))
            .collect())
    }

    /// Master row, data row and outgoing edges of one entity
    fn fetch_entity(&mut self, uid: Uid) -> Result<Option<(Entity, bool)>> {
        let executor = exec(&mut self.executor)?;

        let query = SqlQuery::new("m", MASTER_TABLE)
            .columns("m", &MASTER_COLUMNS, &master_datatypes())
            .filter(Condition::equals("m", "uid", uid, Datatype::Uid));
        let Some(master) = executor.select(&query)?.next() else {
            return Ok(None);
        };
        let oclass: QualifiedName = text(&master[1], "oclass")?.parse()?;
        let first_level = master[2].as_bool().unwrap_or(false);

        let layout = DataLayout::for_class(&self.ontology, &oclass);
        let query = SqlQuery::new("d", layout.table.as_str())
            .column("d", "uid", Datatype::Uid)
            .columns("d", layout.columns(), layout.datatypes())
            .filter(Condition::equals("d", "uid", uid, Datatype::Uid));
        let attributes = match executor.select(&query)?.next() {
            Some(row) => layout.attributes_from(&row[1..]),
            None => {
                tracing::debug!("{} has no row in {}", uid, layout.table);
                layout
                    .attributes()
                    .iter()
                    .map(|a| (a.name.clone(), a.initial_value()))
                    .collect()
            }
        };

        let mut entity = Entity::new(uid, oclass);
        entity.attributes = attributes;

        let query = SqlQuery::new("r", RELATIONSHIP_TABLE)
            .columns("r", &RELATIONSHIP_COLUMNS, &relationship_datatypes())
            .filter(Condition::equals("r", "origin", uid, Datatype::Uid));
        for row in executor.select(&query)? {
            let target = row[1]
                .as_uid()
                .ok_or_else(|| Error::ValueConversion(format!("edge target {}", row[1])))?;
            let relationship: QualifiedName = text(&row[2], "name")?.parse()?;
            let target_class = match &row[3] {
                Value::Null if target.is_root() => self.options.root_class.clone(),
                other => text(other, "target_oclass")?.parse()?,
            };
            entity.add_neighbor(relationship, target, target_class);
        }

        Ok(Some((entity, first_level)))
    }

    /// Put a fetched entity into the registry and restore the root's edge
    /// to it, which is not stored. Neighbors gained or lost since the
    /// previous copy are reconciled.
    fn register(&mut self, entity: Entity, first_level: bool) {
        let uid = entity.uid;
        let oclass = entity.oclass.clone();
        let to_root: Vec<QualifiedName> = entity
            .neighbors
            .iter()
            .filter(|(_, targets)| targets.contains_key(&Uid::ROOT))
            .map(|(rel, _)| rel.clone())
            .collect();

        let before = self.registry.get(uid).map(Entity::neighbor_uids).unwrap_or_default();
        let after = entity.neighbor_uids();
        let gained: Vec<(QualifiedName, Uid)> = entity
            .neighbors
            .iter()
            .flat_map(|(rel, targets)| targets.keys().map(move |t| (rel.clone(), *t)))
            .filter(|(_, t)| !before.contains(t))
            .collect();
        let lost: Vec<Uid> = before.difference(&after).copied().collect();

        self.registry.insert(entity);
        self.expired.remove(&uid);
        self.reconcile_neighbors(uid, &oclass, &gained, &lost);

        let Some(root) = self.registry.get_mut(Uid::ROOT) else {
            return;
        };
        root.remove_neighbor(None, uid);
        for rel in &to_root {
            if let Some(inverse) = self.ontology.inverse(rel) {
                root.add_neighbor(inverse.clone(), uid, oclass.clone());
            }
        }
        if first_level && !root.is_linked_to(uid) {
            if let Some(default) = self.ontology.default_relationship() {
                root.add_neighbor(default.clone(), uid, oclass);
            }
        }
    }

    /// Keep neighbors of a reloaded entity consistent with its new edges.
    /// A neighbor whose back edge disagrees is expired when fresh, or
    /// patched in place when it has pending changes.
    fn reconcile_neighbors(&mut self, uid: Uid, oclass: &QualifiedName, gained: &[(QualifiedName, Uid)], lost: &[Uid]) {
        let mut stale = Vec::new();

        for &target in lost {
            if target.is_root() || target == uid {
                continue;
            }
            let pending = self.buffer.contains(target);
            let Some(neighbor) = self.registry.get_mut(target) else {
                continue;
            };
            if !neighbor.is_linked_to(uid) {
                continue;
            }
            if pending {
                neighbor.remove_neighbor(None, uid);
            } else {
                stale.push(target);
            }
        }

        for (rel, target) in gained {
            if target.is_root() || *target == uid {
                continue;
            }
            let pending = self.buffer.contains(*target);
            let inverse = self.ontology.inverse(rel).cloned();
            let Some(neighbor) = self.registry.get_mut(*target) else {
                continue;
            };
            if neighbor.is_linked_to(uid) {
                continue;
            }
            match (pending, inverse) {
                (_, None) => {}
                (true, Some(inverse)) => neighbor.add_neighbor(inverse, uid, oclass.clone()),
                (false, Some(_)) => stale.push(*target),
            }
        }

        if !stale.is_empty() {
            tracing::debug!("Expiring {} neighbors of {} whose edges moved", stale.len(), uid);
            self.expire(&stale);
        }
    }

    /// Drop an entity that no longer exists in storage
    fn forget(&mut self, uid: Uid) {
        if self.registry.remove(uid).is_some() {
            tracing::warn!("{} no longer exists in storage", uid);
            self.registry.detach(uid);
        }
        self.expired.remove(&uid);
    }
}

fn text<'a>(value: &'a Value, column: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::ValueConversion(format!("{} is not text: {}", column, value)))
}
