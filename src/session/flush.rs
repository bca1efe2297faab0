//! Writing the change buffer
//!
//! Added entities are inserted, updated ones are upserted with their
//! outgoing edges rewritten, deleted ones are removed together with every
//! edge touching them. Edges leaving the root are never stored.

use super::wrapper::{exec, WrapperSession};
use crate::graph::Entity;
use crate::ontology::{Datatype, Ontology};
use crate::storage::schema::{
    master_datatypes, relationship_datatypes, MASTER_COLUMNS, RELATIONSHIP_COLUMNS,
};
use crate::storage::{data_table_name, Condition, DataLayout, Executor, MASTER_TABLE, RELATIONSHIP_TABLE};
use crate::uid::Uid;
use crate::value::Value;
use crate::Result;

impl WrapperSession {
    /// Write added, then updated, then deleted entities inside the open
    /// transaction
    pub(super) fn flush(&mut self) -> Result<()> {
        let executor = exec(&mut self.executor)?;
        let mut writer = Writer {
            executor,
            ontology: &self.ontology,
        };

        for uid in self.buffer.added() {
            if let Some(entity) = self.registry.get(*uid) {
                writer.insert_entity(entity)?;
            }
        }
        for uid in self.buffer.updated() {
            if let Some(entity) = self.registry.get(*uid) {
                writer.update_entity(entity)?;
            }
        }
        for entity in self.buffer.deleted().values() {
            writer.delete_entity(entity)?;
        }

        tracing::debug!(
            "Flushed {} added, {} updated, {} deleted",
            self.buffer.added().len(),
            self.buffer.updated().len(),
            self.buffer.deleted().len()
        );
        Ok(())
    }
}

struct Writer<'a> {
    executor: &'a mut Executor,
    ontology: &'a Ontology,
}

impl Writer<'_> {
    fn layout(&mut self, entity: &Entity) -> Result<DataLayout> {
        let layout = DataLayout::for_class(self.ontology, &entity.oclass);
        if self.executor.create_table(&layout.table_spec())? {
            tracing::info!("Created table {}", layout.table);
        }
        Ok(layout)
    }

    fn insert_entity(&mut self, entity: &Entity) -> Result<()> {
        let layout = self.layout(entity)?;
        if self
            .executor
            .insert(MASTER_TABLE, &MASTER_COLUMNS, &master_row(entity), &master_datatypes())?
            .is_duplicate()
        {
            tracing::debug!("{} is already stored, updating it instead", entity.uid);
            return self.update_entity(entity);
        }
        self.insert_data_row(&layout, entity)?;
        self.insert_edges(entity)
    }

    fn update_entity(&mut self, entity: &Entity) -> Result<()> {
        let by_uid = Condition::equals(MASTER_TABLE, "uid", entity.uid, Datatype::Uid);
        let matched = self.executor.update(
            MASTER_TABLE,
            &["first_level"],
            &[Value::Bool(is_first_level(entity))],
            &[Datatype::Boolean],
            Some(&by_uid),
        )?;
        if matched == 0 {
            self.executor
                .insert(MASTER_TABLE, &MASTER_COLUMNS, &master_row(entity), &master_datatypes())?;
        }

        let layout = self.layout(entity)?;
        let matched = if layout.columns().is_empty() {
            0
        } else {
            let by_uid = Condition::equals(&layout.table, "uid", entity.uid, Datatype::Uid);
            self.executor.update(
                &layout.table,
                layout.columns(),
                &layout.values_of(entity)?,
                layout.datatypes(),
                Some(&by_uid),
            )?
        };
        if matched == 0 {
            self.insert_data_row(&layout, entity)?;
        }

        let outgoing = Condition::equals(RELATIONSHIP_TABLE, "origin", entity.uid, Datatype::Uid);
        self.executor.delete(RELATIONSHIP_TABLE, Some(&outgoing))?;
        self.insert_edges(entity)
    }

    fn delete_entity(&mut self, entity: &Entity) -> Result<()> {
        let table = data_table_name(&entity.oclass);
        let by_uid = Condition::equals(&table, "uid", entity.uid, Datatype::Uid);
        self.executor.delete(&table, Some(&by_uid))?;

        for column in ["origin", "target"] {
            let touching = Condition::equals(RELATIONSHIP_TABLE, column, entity.uid, Datatype::Uid);
            self.executor.delete(RELATIONSHIP_TABLE, Some(&touching))?;
        }

        let by_uid = Condition::equals(MASTER_TABLE, "uid", entity.uid, Datatype::Uid);
        self.executor.delete(MASTER_TABLE, Some(&by_uid))?;
        Ok(())
    }

    fn insert_data_row(&mut self, layout: &DataLayout, entity: &Entity) -> Result<()> {
        let mut columns = vec!["uid".to_string()];
        columns.extend(layout.columns().iter().cloned());
        let mut values = vec![Value::Uid(entity.uid)];
        values.extend(layout.values_of(entity)?);
        let mut datatypes = vec![Datatype::Uid];
        datatypes.extend(layout.datatypes().iter().cloned());

        self.executor.insert(&layout.table, &columns, &values, &datatypes)?;
        Ok(())
    }

    fn insert_edges(&mut self, entity: &Entity) -> Result<()> {
        if entity.uid.is_root() {
            return Ok(());
        }
        let datatypes = relationship_datatypes();
        for (relationship, targets) in &entity.neighbors {
            for (target, target_class) in targets {
                let row = [
                    Value::Uid(entity.uid),
                    Value::Uid(*target),
                    Value::from(relationship.to_string()),
                    Value::from(target_class.to_string()),
                ];
                self.executor
                    .insert(RELATIONSHIP_TABLE, &RELATIONSHIP_COLUMNS, &row, &datatypes)?;
            }
        }
        Ok(())
    }
}

fn is_first_level(entity: &Entity) -> bool {
    entity.is_linked_to(Uid::ROOT)
}

fn master_row(entity: &Entity) -> [Value; 3] {
    [
        Value::Uid(entity.uid),
        Value::from(entity.oclass.to_string()),
        Value::Bool(is_first_level(entity)),
    ]
}
