//! Pending changes of a session
//!
//! Added and updated entities are tracked by uid; their state is read from
//! the registry when the buffer is flushed. Deleted entities are gone from
//! the registry, so the buffer keeps their last snapshot.

use crate::graph::Entity;
use crate::uid::Uid;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone)]
pub struct ChangeBuffer {
    added: BTreeSet<Uid>,
    updated: BTreeSet<Uid>,
    deleted: BTreeMap<Uid, Entity>,
}

impl ChangeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new entity. An entity deleted earlier in the same buffer
    /// may still exist in storage, so it is written as an update instead.
    pub fn mark_added(&mut self, uid: Uid) {
        if self.deleted.remove(&uid).is_some() {
            self.updated.insert(uid);
        } else if !self.updated.contains(&uid) {
            self.added.insert(uid);
        }
    }

    /// Record a change to an entity. No-op for entities that are already
    /// pending as added or deleted.
    pub fn mark_updated(&mut self, uid: Uid) {
        if self.added.contains(&uid) || self.deleted.contains_key(&uid) {
            return;
        }
        self.updated.insert(uid);
    }

    /// Record a deletion; it overrides a pending add or update
    pub fn mark_deleted(&mut self, entity: Entity) {
        self.added.remove(&entity.uid);
        self.updated.remove(&entity.uid);
        self.deleted.insert(entity.uid, entity);
    }

    pub fn added(&self) -> &BTreeSet<Uid> {
        &self.added
    }

    pub fn updated(&self) -> &BTreeSet<Uid> {
        &self.updated
    }

    pub fn deleted(&self) -> &BTreeMap<Uid, Entity> {
        &self.deleted
    }

    pub fn is_added(&self, uid: Uid) -> bool {
        self.added.contains(&uid)
    }

    pub fn is_deleted(&self, uid: Uid) -> bool {
        self.deleted.contains_key(&uid)
    }

    /// Whether the entity has any pending change
    pub fn contains(&self, uid: Uid) -> bool {
        self.added.contains(&uid) || self.updated.contains(&uid) || self.deleted.contains_key(&uid)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::qn;

    fn entity(n: u128) -> Entity {
        Entity::new(Uid::from_u128(n), qn("CITY.CITIZEN"))
    }

    #[test]
    fn test_generations_are_disjoint() {
        let mut buffer = ChangeBuffer::new();
        let a = Uid::from_u128(1);
        buffer.mark_added(a);
        buffer.mark_updated(a);
        assert!(buffer.is_added(a));
        assert!(buffer.updated().is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_delete_wins() {
        let mut buffer = ChangeBuffer::new();
        buffer.mark_added(Uid::from_u128(1));
        buffer.mark_updated(Uid::from_u128(2));
        buffer.mark_deleted(entity(1));
        buffer.mark_deleted(entity(2));
        buffer.mark_updated(Uid::from_u128(2));

        assert!(buffer.added().is_empty());
        assert!(buffer.updated().is_empty());
        assert_eq!(buffer.deleted().len(), 2);
    }

    #[test]
    fn test_readd_after_delete_is_update() {
        let mut buffer = ChangeBuffer::new();
        buffer.mark_deleted(entity(1));
        buffer.mark_added(Uid::from_u128(1));
        assert!(!buffer.is_deleted(Uid::from_u128(1)));
        assert!(buffer.updated().contains(&Uid::from_u128(1)));
    }

    #[test]
    fn test_clear() {
        let mut buffer = ChangeBuffer::new();
        buffer.mark_added(Uid::from_u128(1));
        buffer.mark_deleted(entity(2));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.contains(Uid::from_u128(2)));
    }
}
