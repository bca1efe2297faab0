//! Migration Tool - upgrade databases written with an older layout
//!
//! The legacy layout lacks `CUDS_MASTER.first_level` and
//! `CUDS_RELATIONSHIPS.target_oclass`. Both tables are rewritten inside one
//! transaction; data tables keep their layout and are left untouched.

use crate::ontology::{Datatype, Ontology, QualifiedName};
use crate::session::SessionOptions;
use crate::storage::schema::{
    class_of_data_table, is_data_table, master_datatypes, master_table_spec, relationship_datatypes,
    relationship_table_spec, MASTER_COLUMNS, RELATIONSHIP_COLUMNS,
};
use crate::storage::{ConnectionTarget, Executor, SqlQuery, DATA_TABLE_PREFIX, MASTER_TABLE, RELATIONSHIP_TABLE};
use crate::uid::Uid;
use crate::value::Value;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Layout of the master and relationship tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayoutVersion {
    /// No master or relationship table
    Empty,
    Legacy,
    Current,
}

impl std::fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutVersion::Empty => write!(f, "empty"),
            LayoutVersion::Legacy => write!(f, "legacy"),
            LayoutVersion::Current => write!(f, "current"),
        }
    }
}

/// What a migration did
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from: LayoutVersion,
    pub entities: usize,
    pub relationships: usize,
    pub data_tables: usize,
}

pub fn detect_layout(executor: &mut Executor) -> Result<LayoutVersion> {
    let master = executor.table_def(MASTER_TABLE)?;
    let relationships = executor.table_def(RELATIONSHIP_TABLE)?;

    let version = match (master, relationships) {
        (None, None) => LayoutVersion::Empty,
        (Some(master), Some(relationships))
            if MASTER_COLUMNS.iter().all(|c| master.has_column(c))
                && RELATIONSHIP_COLUMNS.iter().all(|c| relationships.has_column(c)) =>
        {
            LayoutVersion::Current
        }
        _ => LayoutVersion::Legacy,
    };
    Ok(version)
}

/// Open the database behind `url` and bring it to the current layout
pub fn migrate_database(
    url: &str,
    options: &SessionOptions,
    progress: impl FnMut(&str),
) -> Result<MigrationReport> {
    let target = ConnectionTarget::parse(url)?;
    let mut executor = Executor::open(&target, options.busy_timeout)?;
    let report = migrate(&mut executor, &options.root_class, progress)?;
    executor.close()?;
    Ok(report)
}

/// Bring the database to the current layout. Nothing is changed when any
/// step fails.
pub fn migrate(
    executor: &mut Executor,
    root_class: &QualifiedName,
    mut progress: impl FnMut(&str),
) -> Result<MigrationReport> {
    let from = detect_layout(executor)?;
    tracing::info!("Detected {} layout", from);

    let result = executor.run_in_transaction(|exec| match from {
        LayoutVersion::Current => Ok(MigrationReport {
            from,
            entities: exec.count_rows(MASTER_TABLE)?,
            relationships: exec.count_rows(RELATIONSHIP_TABLE)?,
            data_tables: 0,
        }),
        LayoutVersion::Empty => {
            progress("Creating tables");
            exec.create_base_tables()?;
            Ok(MigrationReport {
                from,
                entities: 0,
                relationships: 0,
                data_tables: 0,
            })
        }
        LayoutVersion::Legacy => rewrite_legacy(exec, root_class, &mut progress),
    });

    result.map_err(|e| match e {
        Error::Migration(_) => e,
        other => Error::Migration(other.to_string()),
    })
}

/// Check a database against an ontology. Returns the stored classes and
/// relationship names the ontology does not declare.
pub fn validate_database(url: &str, options: &SessionOptions, ontology: &Ontology) -> Result<BTreeSet<String>> {
    let target = ConnectionTarget::parse(url)?;
    let mut executor = Executor::open(&target, options.busy_timeout)?;
    let unknown = undeclared_names(&mut executor, ontology)?;
    executor.close()?;
    Ok(unknown)
}

pub fn undeclared_names(executor: &mut Executor, ontology: &Ontology) -> Result<BTreeSet<String>> {
    let mut unknown = BTreeSet::new();

    let classes = SqlQuery::new("m", MASTER_TABLE).column("m", "oclass", Datatype::String);
    for row in executor.select(&classes)? {
        if let Some(name) = row[0].as_str() {
            let declared = QualifiedName::parse(name).is_ok_and(|c| ontology.class(&c).is_some());
            if !declared {
                unknown.insert(name.to_string());
            }
        }
    }

    let relationships = SqlQuery::new("r", RELATIONSHIP_TABLE).column("r", "name", Datatype::String);
    for row in executor.select(&relationships)? {
        if let Some(name) = row[0].as_str() {
            let declared = QualifiedName::parse(name).is_ok_and(|r| ontology.is_relationship(&r));
            if !declared {
                unknown.insert(name.to_string());
            }
        }
    }

    if !unknown.is_empty() {
        tracing::warn!("{} stored names are not declared in the ontology", unknown.len());
    }
    Ok(unknown)
}

struct LegacyEdge {
    origin: Uid,
    target: Uid,
    name: String,
    target_class: Option<String>,
}

fn rewrite_legacy(
    exec: &mut Executor,
    root_class: &QualifiedName,
    progress: &mut impl FnMut(&str),
) -> Result<MigrationReport> {
    progress("Reading data tables");
    exec.reflect()?;
    let data_tables: Vec<String> = exec
        .list_tables(DATA_TABLE_PREFIX)
        .into_iter()
        .filter(|t| is_data_table(t))
        .collect();

    // classes recovered from data table names, overridden by the master table
    let mut classes: BTreeMap<Uid, String> = BTreeMap::new();
    for table in &data_tables {
        let Some(class) = class_of_data_table(table) else {
            continue;
        };
        let query = SqlQuery::new("d", table.as_str()).column("d", "uid", Datatype::Uid);
        for row in exec.select(&query)? {
            if let Some(uid) = row[0].as_uid() {
                classes.insert(uid, class.to_string());
            }
        }
    }

    progress("Reading master table");
    let mut entities: BTreeSet<Uid> = classes.keys().copied().collect();
    if let Some(master) = exec.table_def(MASTER_TABLE)? {
        let with_class = master.has_column("oclass");
        let mut query = SqlQuery::new("m", MASTER_TABLE).column("m", "uid", Datatype::Uid);
        if with_class {
            query = query.column("m", "oclass", Datatype::String);
        }
        for row in exec.select(&query)? {
            let uid = row[0]
                .as_uid()
                .ok_or_else(|| Error::Migration(format!("invalid uid {}", row[0])))?;
            if uid.is_root() {
                continue;
            }
            entities.insert(uid);
            if let Some(class) = row.get(1).and_then(Value::as_str) {
                classes.insert(uid, class.to_string());
            }
        }
    }

    progress("Reading relationships");
    let mut edges = Vec::new();
    if let Some(relationships) = exec.table_def(RELATIONSHIP_TABLE)? {
        let with_class = relationships.has_column("target_oclass");
        let mut query = SqlQuery::new("r", RELATIONSHIP_TABLE)
            .column("r", "origin", Datatype::Uid)
            .column("r", "target", Datatype::Uid)
            .column("r", "name", Datatype::String);
        if with_class {
            query = query.column("r", "target_oclass", Datatype::String);
        }
        for row in exec.select(&query)? {
            let (Some(origin), Some(target), Some(name)) = (row[0].as_uid(), row[1].as_uid(), row[2].as_str())
            else {
                return Err(Error::Migration(format!("invalid relationship row {:?}", row)));
            };
            edges.push(LegacyEdge {
                origin,
                target,
                name: name.to_string(),
                target_class: row.get(3).and_then(Value::as_str).map(str::to_string),
            });
        }
    }

    let first_level: BTreeSet<Uid> = edges
        .iter()
        .filter(|e| e.target.is_root())
        .map(|e| e.origin)
        .collect();

    progress("Rewriting master table");
    exec.drop_table(MASTER_TABLE)?;
    exec.create_table(&master_table_spec())?;
    let datatypes = master_datatypes();
    for uid in &entities {
        let Some(class) = classes.get(uid) else {
            tracing::warn!("Skipping {}: class unknown", uid);
            continue;
        };
        let row = [
            Value::Uid(*uid),
            Value::from(class.as_str()),
            Value::Bool(first_level.contains(uid)),
        ];
        exec.insert(MASTER_TABLE, &MASTER_COLUMNS, &row, &datatypes)?;
    }

    progress("Rewriting relationships");
    exec.drop_table(RELATIONSHIP_TABLE)?;
    exec.create_table(&relationship_table_spec())?;
    let datatypes = relationship_datatypes();
    for edge in &edges {
        let target_class = match (&edge.target_class, edge.target.is_root()) {
            (Some(class), _) => Value::from(class.as_str()),
            (None, true) => Value::from(root_class.to_string()),
            (None, false) => classes
                .get(&edge.target)
                .map(|c| Value::from(c.as_str()))
                .unwrap_or(Value::Null),
        };
        let row = [
            Value::Uid(edge.origin),
            Value::Uid(edge.target),
            Value::from(edge.name.as_str()),
            target_class,
        ];
        exec.insert(RELATIONSHIP_TABLE, &RELATIONSHIP_COLUMNS, &row, &datatypes)?;
    }

    let report = MigrationReport {
        from: LayoutVersion::Legacy,
        entities: exec.count_rows(MASTER_TABLE)?,
        relationships: exec.count_rows(RELATIONSHIP_TABLE)?,
        data_tables: data_tables.len(),
    };
    tracing::info!(
        "Migrated {} entities and {} relationships",
        report.entities,
        report.relationships
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::qn;

    fn legacy_executor() -> Executor {
        let exec = Executor::open_in_memory().unwrap();
        exec.connection()
            .execute_batch(
                "CREATE TABLE CUDS_MASTER (uid VARCHAR(36) PRIMARY KEY, oclass VARCHAR);
                 CREATE TABLE CUDS_RELATIONSHIPS (origin VARCHAR(36), target VARCHAR(36), name VARCHAR,
                     PRIMARY KEY (origin, target, name));
                 CREATE TABLE CUDS_CITY___CITY (uid VARCHAR(36) PRIMARY KEY, name VARCHAR);
                 INSERT INTO CUDS_MASTER VALUES ('00000000-0000-0000-0000-000000000001', 'CITY.CITY');
                 INSERT INTO CUDS_CITY___CITY VALUES ('00000000-0000-0000-0000-000000000001', 'Freiburg');
                 INSERT INTO CUDS_RELATIONSHIPS VALUES ('00000000-0000-0000-0000-000000000001',
                     '00000000-0000-0000-0000-000000000000', 'CITY.IS_PART_OF');",
            )
            .unwrap();
        let mut exec = exec;
        exec.reflect().unwrap();
        exec
    }

    #[test]
    fn test_detect_layouts() {
        let mut exec = Executor::open_in_memory().unwrap();
        assert_eq!(detect_layout(&mut exec).unwrap(), LayoutVersion::Empty);
        exec.create_base_tables().unwrap();
        assert_eq!(detect_layout(&mut exec).unwrap(), LayoutVersion::Current);
        assert_eq!(detect_layout(&mut legacy_executor()).unwrap(), LayoutVersion::Legacy);
    }

    #[test]
    fn test_rewrite_legacy() {
        let mut exec = legacy_executor();
        let mut steps = Vec::new();
        let report = migrate(&mut exec, &qn("CITY.CITY_WRAPPER"), |s| steps.push(s.to_string())).unwrap();

        assert_eq!(report.from, LayoutVersion::Legacy);
        assert_eq!(report.entities, 1);
        assert_eq!(report.relationships, 1);
        assert!(!steps.is_empty());
        assert_eq!(detect_layout(&mut exec).unwrap(), LayoutVersion::Current);

        let (first_level, target_class): (bool, String) = exec
            .connection()
            .query_row(
                "SELECT m.first_level, r.target_oclass FROM CUDS_MASTER m, CUDS_RELATIONSHIPS r
                 WHERE m.uid = r.origin",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(first_level);
        assert_eq!(target_class, "CITY.CITY_WRAPPER");
    }

    #[test]
    fn test_undeclared_names() {
        let mut exec = legacy_executor();
        migrate(&mut exec, &qn("CITY.CITY_WRAPPER"), |_| {}).unwrap();
        let onto = crate::testing::city_ontology();
        assert!(undeclared_names(&mut exec, &onto).unwrap().is_empty());

        exec.connection()
            .execute_batch(
                "INSERT INTO CUDS_MASTER VALUES ('00000000-0000-0000-0000-000000000002', 'CITY.CASTLE', 0);
                 INSERT INTO CUDS_RELATIONSHIPS VALUES ('00000000-0000-0000-0000-000000000002',
                     '00000000-0000-0000-0000-000000000001', 'CITY.GUARDS', 'CITY.CITY');",
            )
            .unwrap();
        let unknown: Vec<String> = undeclared_names(&mut exec, &onto).unwrap().into_iter().collect();
        assert_eq!(unknown, vec!["CITY.CASTLE", "CITY.GUARDS"]);
    }

    #[test]
    fn test_current_is_untouched() {
        let mut exec = Executor::open_in_memory().unwrap();
        exec.create_base_tables().unwrap();
        let report = migrate(&mut exec, &qn("CITY.CITY_WRAPPER"), |_| {}).unwrap();
        assert_eq!(report.from, LayoutVersion::Current);
        assert_eq!(report.entities, 0);
    }
}
