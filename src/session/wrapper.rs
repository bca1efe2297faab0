//! Session lifecycle and graph operations

use super::{ChangeBuffer, SessionOptions, SessionState};
use crate::graph::{Entity, Graph};
use crate::migrate::{detect_layout, LayoutVersion};
use crate::ontology::{Ontology, QualifiedName};
use crate::storage::{ConnectionTarget, Cursor, DbStats, Executor, SqlQuery};
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// A session that persists an object graph in a relational database
pub struct WrapperSession {
    /// `None` once the session is closed
    pub(super) executor: Option<Executor>,
    pub(super) ontology: Arc<Ontology>,
    pub(super) options: SessionOptions,
    pub(super) registry: Graph,
    pub(super) buffer: ChangeBuffer,
    pub(super) expired: HashSet<Uid>,
}

pub(super) fn exec(executor: &mut Option<Executor>) -> Result<&mut Executor> {
    executor.as_mut().ok_or(Error::SessionClosed)
}

impl WrapperSession {
    /// Open a session on a connection string such as `sqlite:///test.db`
    pub fn open(url: &str, ontology: Arc<Ontology>, options: SessionOptions) -> Result<Self> {
        let target = ConnectionTarget::parse(url)?;
        Self::connect(&target, ontology, options)
    }

    /// Open a session on a private in-memory database (for testing)
    pub fn open_in_memory(ontology: Arc<Ontology>, options: SessionOptions) -> Result<Self> {
        Self::connect(&ConnectionTarget::Memory, ontology, options)
    }

    pub fn connect(target: &ConnectionTarget, ontology: Arc<Ontology>, options: SessionOptions) -> Result<Self> {
        let mut executor = Executor::open(target, options.busy_timeout)?;
        if detect_layout(&mut executor)? == LayoutVersion::Legacy {
            return Err(Error::Migration(format!(
                "{} uses a legacy table layout, run `relgraph migrate` first",
                target
            )));
        }
        executor.create_base_tables()?;

        let mut session = Self {
            executor: Some(executor),
            ontology,
            options,
            registry: Graph::new(),
            buffer: ChangeBuffer::new(),
            expired: HashSet::new(),
        };
        session.reset_registry();
        session.load_first_level()?;

        tracing::info!(
            "Opened session on {} ({} first-level entities)",
            target,
            session.registry.len() - 1
        );
        Ok(session)
    }

    /// Release the connection. An open transaction is rolled back and
    /// pending changes are dropped. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(executor) = self.executor.take() {
            if !self.buffer.is_empty() {
                tracing::warn!("Closing session with {} uncommitted changes", self.buffer.len());
            }
            self.buffer.clear();
            executor.close()?;
            tracing::info!("Closed session");
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        match &self.executor {
            None => SessionState::Closed,
            Some(executor) if executor.in_transaction() => SessionState::TransactionOpen,
            Some(_) => SessionState::Connected,
        }
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Loaded entities, the root included
    pub fn registry(&self) -> &Graph {
        &self.registry
    }

    pub fn buffer(&self) -> &ChangeBuffer {
        &self.buffer
    }

    pub fn is_expired(&self, uid: Uid) -> bool {
        self.expired.contains(&uid)
    }

    pub(super) fn reset_registry(&mut self) {
        self.registry = Graph::new();
        self.registry
            .insert(Entity::new(Uid::ROOT, self.options.root_class.clone()));
        self.expired.clear();
    }

    // ========== Transactions ==========

    pub fn begin_transaction(&mut self) -> Result<()> {
        exec(&mut self.executor)?.begin()
    }

    /// Write all pending changes and commit. A transaction is opened if
    /// none is. Afterwards every loaded entity is expired, so commits made
    /// by other sessions are picked up on next access. On failure the
    /// transaction is rolled back, the pending changes are kept and
    /// `Error::Transaction` carries the cause.
    pub fn commit(&mut self) -> Result<()> {
        let executor = exec(&mut self.executor)?;
        if !executor.in_transaction() {
            executor.begin()?;
        }

        let pending = self.buffer.len();
        let result = self
            .flush()
            .and_then(|_| exec(&mut self.executor)?.commit());

        match result {
            Ok(()) => {
                self.buffer.clear();
                self.expire_all();
                tracing::info!("Committed {} changes", pending);
                Ok(())
            }
            Err(e) => {
                if let Some(executor) = self.executor.as_mut() {
                    if executor.in_transaction() {
                        if let Err(rollback) = executor.rollback() {
                            tracing::warn!("Rollback after failed commit failed: {}", rollback);
                        }
                    }
                }
                tracing::warn!("Commit failed and was rolled back: {}", e);
                Err(Error::Transaction(Box::new(e)))
            }
        }
    }

    /// Discard the open transaction and every pending change. The registry
    /// is reloaded to the last committed state.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let executor = exec(&mut self.executor)?;
        if executor.in_transaction() {
            executor.rollback()?;
        }

        let reload: Vec<Uid> = self
            .registry
            .uids()
            .into_iter()
            .filter(|uid| !uid.is_root() && !self.buffer.is_added(*uid))
            .collect();
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.reset_registry();
        self.load_entities(&reload)?;
        self.load_first_level()?;

        tracing::info!("Rolled back, {} pending changes discarded", discarded);
        Ok(())
    }

    // ========== Graph operations ==========

    /// Add the part of `graph` reachable from `uid` to the session and link
    /// `uid` to `parent`. Without a relationship the ontology's default one
    /// is used.
    pub fn add(
        &mut self,
        parent: Uid,
        relationship: Option<&QualifiedName>,
        graph: &Graph,
        uid: Uid,
    ) -> Result<Uid> {
        exec(&mut self.executor)?;
        let relationship = self.resolve_relationship(relationship)?;
        if !graph.contains(uid) {
            return Err(Error::UnknownEntity(uid));
        }
        if !self.ensure_loaded(parent)? {
            return Err(Error::UnknownEntity(parent));
        }

        let members = graph.reachable_from(&[uid]);
        let mut ordered: Vec<Uid> = members.iter().copied().filter(|m| !m.is_root()).collect();
        ordered.sort();

        for member in ordered {
            let Some(entity) = graph.get(member) else {
                continue;
            };
            let mut entity = entity.clone();
            let external: Vec<(QualifiedName, Uid)> = entity
                .neighbors
                .iter()
                .flat_map(|(rel, targets)| targets.keys().map(move |t| (rel.clone(), *t)))
                .filter(|(_, target)| !members.contains(target))
                .collect();

            match self.registry.get(member) {
                Some(existing) => {
                    for (rel, targets) in &existing.neighbors {
                        for (target, class) in targets {
                            entity.add_neighbor(rel.clone(), *target, class.clone());
                        }
                    }
                    self.buffer.mark_updated(member);
                }
                None => self.buffer.mark_added(member),
            }
            self.registry.insert(entity);
            self.expired.remove(&member);

            for (rel, target) in external {
                self.link_external(member, &rel, target)?;
            }
        }

        self.registry.relate(&self.ontology, parent, &relationship, uid)?;
        self.mark_changed(parent);
        self.mark_changed(uid);
        tracing::debug!("Added {} entities under {}", members.len(), parent);
        Ok(uid)
    }

    /// Give the target of an edge leaving an added subgraph its inverse edge
    fn link_external(&mut self, origin: Uid, relationship: &QualifiedName, target: Uid) -> Result<()> {
        if !self.ensure_loaded(target)? {
            tracing::warn!("Dropping edge {} -> {}: target does not exist", origin, target);
            if let Some(entity) = self.registry.get_mut(origin) {
                entity.remove_neighbor(Some(relationship), target);
            }
            return Ok(());
        }

        let Some(origin_class) = self.registry.get(origin).map(|e| e.oclass.clone()) else {
            return Ok(());
        };
        if let Some(inverse) = self.ontology.inverse(relationship) {
            if let Some(entity) = self.registry.get_mut(target) {
                entity.add_neighbor(inverse.clone(), origin, origin_class);
            }
            self.mark_changed(target);
        }
        Ok(())
    }

    /// Connect two stored or pending entities
    pub fn relate(&mut self, origin: Uid, relationship: &QualifiedName, target: Uid) -> Result<()> {
        exec(&mut self.executor)?;
        let relationship = self.resolve_relationship(Some(relationship))?;
        for uid in [origin, target] {
            if !self.ensure_loaded(uid)? {
                return Err(Error::UnknownEntity(uid));
            }
        }
        self.registry.relate(&self.ontology, origin, &relationship, target)?;
        self.mark_changed(origin);
        self.mark_changed(target);
        Ok(())
    }

    /// Remove the edge between two entities (both directions). Without a
    /// relationship every edge between them goes. Returns whether an edge
    /// was removed.
    pub fn unrelate(&mut self, origin: Uid, relationship: Option<&QualifiedName>, target: Uid) -> Result<bool> {
        exec(&mut self.executor)?;
        for uid in [origin, target] {
            if !self.ensure_loaded(uid)? {
                return Err(Error::UnknownEntity(uid));
            }
        }
        let removed = self.registry.unrelate(&self.ontology, origin, relationship, target);
        if removed {
            self.mark_changed(origin);
            self.mark_changed(target);
        }
        Ok(removed)
    }

    /// Detach `target` from `parent`. The target stays stored until it is
    /// deleted or pruned.
    pub fn remove(&mut self, parent: Uid, target: Uid) -> Result<bool> {
        self.unrelate(parent, None, target)
    }

    pub fn set_attribute(&mut self, uid: Uid, name: &str, value: impl Into<Value>) -> Result<()> {
        exec(&mut self.executor)?;
        if uid.is_root() {
            return Err(Error::InvalidOperation("the root entity has no attributes".to_string()));
        }
        if !self.ensure_loaded(uid)? {
            return Err(Error::UnknownEntity(uid));
        }

        let entity = self.registry.get_mut(uid).ok_or(Error::UnknownEntity(uid))?;
        let def = self
            .ontology
            .attribute(&entity.oclass, name)
            .ok_or_else(|| Error::UnknownAttribute {
                class: entity.oclass.to_string(),
                attribute: name.to_string(),
            })?;
        let value = def.effective_datatype().coerce(value.into())?;
        entity.attributes.insert(name.to_string(), value);
        self.mark_changed(uid);
        Ok(())
    }

    /// Delete an entity and every edge touching it. Returns false when the
    /// entity does not exist.
    pub fn delete(&mut self, uid: Uid) -> Result<bool> {
        exec(&mut self.executor)?;
        if uid.is_root() {
            return Err(Error::InvalidOperation("the root entity cannot be deleted".to_string()));
        }
        if !self.ensure_loaded(uid)? {
            return Ok(false);
        }
        self.delete_registered(uid);
        Ok(true)
    }

    pub(super) fn delete_registered(&mut self, uid: Uid) {
        if let Some(entity) = self.registry.remove(uid) {
            for changed in self.registry.detach(uid) {
                self.mark_changed(changed);
            }
            self.expired.remove(&uid);
            self.buffer.mark_deleted(entity);
        }
    }

    /// Current state of an entity, loading or refreshing it when needed.
    /// `None` when it does not exist.
    pub fn get(&mut self, uid: Uid) -> Result<Option<&Entity>> {
        exec(&mut self.executor)?;
        if !self.ensure_loaded(uid)? {
            return Ok(None);
        }
        Ok(self.registry.get(uid))
    }

    /// Neighbors of an entity under one or all relationships. Neighbors not
    /// yet loaded are fetched; ones that no longer exist are skipped.
    pub fn neighbors(&mut self, uid: Uid, relationship: Option<&QualifiedName>) -> Result<Vec<Uid>> {
        exec(&mut self.executor)?;
        if !self.ensure_loaded(uid)? {
            return Err(Error::UnknownEntity(uid));
        }
        let entity = self.registry.get(uid).ok_or(Error::UnknownEntity(uid))?;
        let targets: Vec<Uid> = match relationship {
            Some(rel) => entity.neighbors_by(rel),
            None => entity.neighbor_uids().into_iter().collect(),
        };

        let missing: Vec<Uid> = targets
            .iter()
            .copied()
            .filter(|t| !t.is_root() && (!self.registry.contains(*t) || self.expired.contains(t)))
            .collect();
        self.load_entities(&missing)?;

        Ok(targets
            .into_iter()
            .filter(|t| self.registry.contains(*t))
            .collect())
    }

    // ========== Storage access ==========

    /// Run a custom select
    pub fn query(&mut self, query: &SqlQuery) -> Result<Cursor> {
        exec(&mut self.executor)?.select(query)
    }

    pub fn stats(&mut self) -> Result<DbStats> {
        exec(&mut self.executor)?.stats()
    }

    pub(super) fn mark_changed(&mut self, uid: Uid) {
        if !uid.is_root() {
            self.buffer.mark_updated(uid);
        }
    }

    fn resolve_relationship(&self, relationship: Option<&QualifiedName>) -> Result<QualifiedName> {
        match relationship {
            Some(rel) if self.ontology.is_relationship(rel) => Ok(rel.clone()),
            Some(rel) => Err(Error::Ontology(format!("{} is not a relationship", rel))),
            None => self
                .ontology
                .default_relationship()
                .cloned()
                .ok_or_else(|| Error::Ontology("no default relationship declared".to_string())),
        }
    }
}

impl Drop for WrapperSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close session: {}", e);
        }
    }
}
