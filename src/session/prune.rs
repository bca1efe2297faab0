//! Reachability sweep and database reset

use super::wrapper::{exec, WrapperSession};
use crate::graph::Entity;
use crate::ontology::{Datatype, QualifiedName};
use crate::storage::schema::{master_table_spec, relationship_table_spec};
use crate::storage::{Condition, SqlQuery, DATA_TABLE_PREFIX, MASTER_TABLE};
use crate::uid::Uid;
use crate::Result;
use std::collections::{HashSet, VecDeque};

impl WrapperSession {
    /// Delete every entity that cannot be reached from the root (or from
    /// `roots` when given). Loaded state is followed for registered
    /// entities, stored edges for the rest. Returns the deleted uids.
    pub fn prune(&mut self, roots: &[Uid]) -> Result<Vec<Uid>> {
        exec(&mut self.executor)?;
        let roots = if roots.is_empty() {
            vec![Uid::ROOT]
        } else {
            roots.to_vec()
        };
        let reachable = self.mark_reachable(&roots)?;

        let mut pruned = Vec::new();
        for uid in self.registry.uids() {
            if !uid.is_root() && !reachable.contains(&uid) {
                self.delete_registered(uid);
                pruned.push(uid);
            }
        }

        for (uid, oclass) in self.stored_classes()? {
            if reachable.contains(&uid) || self.buffer.is_deleted(uid) || self.registry.contains(uid) {
                continue;
            }
            for changed in self.registry.detach(uid) {
                self.mark_changed(changed);
            }
            self.buffer.mark_deleted(Entity::new(uid, oclass));
            pruned.push(uid);
        }

        pruned.sort();
        tracing::info!("Pruned {} unreachable entities", pruned.len());
        Ok(pruned)
    }

    fn mark_reachable(&mut self, roots: &[Uid]) -> Result<HashSet<Uid>> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Uid> = roots.iter().copied().collect();

        while let Some(uid) = queue.pop_front() {
            if !visited.insert(uid) {
                continue;
            }
            for next in self.successors(uid)? {
                if !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(visited)
    }

    fn successors(&mut self, uid: Uid) -> Result<Vec<Uid>> {
        if self.buffer.is_deleted(uid) {
            return Ok(Vec::new());
        }
        if self.expired.contains(&uid) {
            self.load_entities(&[uid])?;
        }

        if let Some(entity) = self.registry.get(uid) {
            let mut next: Vec<Uid> = entity.neighbor_uids().into_iter().collect();
            if uid.is_root() {
                // first-level entities committed by other sessions
                let stored = self.stored_uids(Some(Condition::equals(
                    "m",
                    "first_level",
                    true,
                    Datatype::Boolean,
                )))?;
                next.extend(stored.into_iter().filter(|u| !self.registry.contains(*u)));
            }
            return Ok(next);
        }
        self.stored_targets(uid)
    }

    fn stored_classes(&mut self) -> Result<Vec<(Uid, QualifiedName)>> {
        let query = SqlQuery::new("m", MASTER_TABLE)
            .column("m", "uid", Datatype::Uid)
            .column("m", "oclass", Datatype::String);
        let mut stored = Vec::new();
        for row in exec(&mut self.executor)?.select(&query)? {
            if let (Some(uid), Some(oclass)) = (row[0].as_uid(), row[1].as_str()) {
                stored.push((uid, oclass.parse()?));
            }
        }
        Ok(stored)
    }

    /// Delete every row of every table. Table definitions stay. The
    /// registry is reset to a bare root and pending changes are dropped.
    pub fn clear_database(&mut self) -> Result<()> {
        let executor = exec(&mut self.executor)?;
        let tables = executor.run_in_transaction(|exec| {
            exec.reflect()?;
            let tables = exec.list_tables(DATA_TABLE_PREFIX);
            for table in &tables {
                exec.delete(table, None)?;
            }
            Ok(tables.len())
        })?;

        self.buffer.clear();
        self.reset_registry();
        tracing::info!("Cleared {} tables", tables);
        Ok(())
    }

    /// Drop every table and recreate the empty master and relationship
    /// tables
    pub fn drop_database(&mut self) -> Result<()> {
        let executor = exec(&mut self.executor)?;
        let tables = executor.run_in_transaction(|exec| {
            exec.reflect()?;
            let tables = exec.list_tables(DATA_TABLE_PREFIX);
            for table in &tables {
                exec.drop_table(table)?;
            }
            exec.create_table(&master_table_spec())?;
            exec.create_table(&relationship_table_spec())?;
            Ok(tables.len())
        })?;

        self.buffer.clear();
        self.reset_registry();
        tracing::info!("Dropped {} tables", tables);
        Ok(())
    }
}
