//! Schema manager and persisted layout
//!
//! Layout (names are part of the on-disk format):
//! - `CUDS_MASTER(uid, oclass, first_level)` - one row per entity
//! - `CUDS_RELATIONSHIPS(origin, target, name, target_oclass)` - one row per edge
//! - `CUDS_<NAMESPACE>___<NAME>(uid, <attr>..., <attr>___<i>...)` - one table per class
//!
//! The manager caches table shapes for the lifetime of a session. Shapes
//! are either declared here or reflected from the database.

use super::condition::quote_ident;
use super::types::{to_native_type, NativeType};
use crate::graph::Entity;
use crate::ontology::{AttributeDef, Datatype, Ontology, QualifiedName};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const MASTER_TABLE: &str = "CUDS_MASTER";
pub const RELATIONSHIP_TABLE: &str = "CUDS_RELATIONSHIPS";
pub const DATA_TABLE_PREFIX: &str = "CUDS_";

/// Separator between namespace and class name, and between a vector
/// attribute and its component index
pub const NAME_SEPARATOR: &str = "___";

pub const MASTER_COLUMNS: [&str; 3] = ["uid", "oclass", "first_level"];
pub const RELATIONSHIP_COLUMNS: [&str; 4] = ["origin", "target", "name", "target_oclass"];

pub fn master_datatypes() -> Vec<Datatype> {
    vec![Datatype::Uid, Datatype::String, Datatype::Boolean]
}

pub fn relationship_datatypes() -> Vec<Datatype> {
    vec![Datatype::Uid, Datatype::Uid, Datatype::String, Datatype::String]
}

/// Data table of a class: `CUDS_<NAMESPACE>___<NAME>`
pub fn data_table_name(class: &QualifiedName) -> String {
    format!("{}{}", DATA_TABLE_PREFIX, class.table_name())
}

/// Column of one vector component: `<attr>___<index>`
pub fn vector_column(attribute: &str, index: usize) -> String {
    format!("{}{}{}", attribute, NAME_SEPARATOR, index)
}

pub fn is_data_table(name: &str) -> bool {
    name.starts_with(DATA_TABLE_PREFIX) && name != MASTER_TABLE && name != RELATIONSHIP_TABLE
}

/// Class stored in a data table, recovered from the table name
pub fn class_of_data_table(name: &str) -> Option<QualifiedName> {
    if !is_data_table(name) {
        return None;
    }
    let (namespace, class) = name[DATA_TABLE_PREFIX.len()..].split_once(NAME_SEPARATOR)?;
    if namespace.is_empty() || class.is_empty() {
        return None;
    }
    Some(QualifiedName::new(namespace, class))
}

/// Declaration of a table to create
#[derive(Debug, Clone, Default)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
    /// Columns without an entry are declared as unbounded strings
    pub datatypes: HashMap<String, Datatype>,
    pub primary_key: Vec<String>,
    /// Let the backend generate the (single integer) primary key
    pub generate_pk: bool,
    /// column → (referenced table, referenced column)
    pub foreign_keys: BTreeMap<String, (String, String)>,
    /// Secondary indexes, one column group each
    pub indexes: Vec<Vec<String>>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn column(mut self, name: impl Into<String>, datatype: Datatype) -> Self {
        let name = name.into();
        self.datatypes.insert(name.clone(), datatype);
        self.columns.push(name);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_key(mut self, column: &str, table: &str, referenced: &str) -> Self {
        self.foreign_keys
            .insert(column.to_string(), (table.to_string(), referenced.to_string()));
        self
    }

    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// `CREATE TABLE` statement
    pub fn create_sql(&self) -> Result<String> {
        let inline_pk = self.generate_pk && self.primary_key.len() == 1;
        let mut parts = Vec::new();

        for column in &self.columns {
            let native = to_native_type(self.datatypes.get(column))?;
            if inline_pk && self.primary_key[0] == *column {
                parts.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(column)));
            } else {
                parts.push(format!("{} {}", quote_ident(column), native.sql()));
            }
        }

        if !self.primary_key.is_empty() && !inline_pk {
            let pk: Vec<String> = self.primary_key.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        for (column, (table, referenced)) in &self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY({}) REFERENCES {} ({})",
                quote_ident(column),
                quote_ident(table),
                quote_ident(referenced)
            ));
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        ))
    }

    /// `CREATE INDEX` statements
    pub fn index_sql(&self) -> Vec<String> {
        index_statements(&self.name, &self.indexes)
    }
}

fn index_statements(table: &str, indexes: &[Vec<String>]) -> Vec<String> {
    indexes
        .iter()
        .map(|columns| {
            let name = format!("idx_{}_{}", table, columns.join("_"));
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&name),
                quote_ident(table),
                cols.join(", ")
            )
        })
        .collect()
}

pub fn master_table_spec() -> TableSpec {
    TableSpec::new(MASTER_TABLE)
        .column("uid", Datatype::Uid)
        .column("oclass", Datatype::String)
        .column("first_level", Datatype::Boolean)
        .primary_key(&["uid"])
        .index(&["oclass"])
        .index(&["first_level"])
}

pub fn relationship_table_spec() -> TableSpec {
    TableSpec::new(RELATIONSHIP_TABLE)
        .column("origin", Datatype::Uid)
        .column("target", Datatype::Uid)
        .column("name", Datatype::String)
        .column("target_oclass", Datatype::String)
        .primary_key(&["origin", "target", "name"])
        .foreign_key("origin", MASTER_TABLE, "uid")
        .foreign_key("target", MASTER_TABLE, "uid")
        .index(&["origin"])
}

/// Column layout of a class's data table, with vector attributes expanded
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub table: String,
    attributes: Vec<AttributeDef>,
    columns: Vec<String>,
    datatypes: Vec<Datatype>,
}

impl DataLayout {
    pub fn for_class(ontology: &Ontology, class: &QualifiedName) -> Self {
        let attributes = ontology.attributes(class);
        let mut columns = Vec::new();
        let mut datatypes = Vec::new();

        for attribute in &attributes {
            match attribute.effective_datatype() {
                Datatype::Vector { element, len } => {
                    for i in 0..len {
                        columns.push(vector_column(&attribute.name, i));
                        datatypes.push(element.datatype());
                    }
                }
                scalar => {
                    columns.push(attribute.name.clone());
                    datatypes.push(scalar);
                }
            }
        }

        Self {
            table: data_table_name(class),
            attributes,
            columns,
            datatypes,
        }
    }

    /// Attribute columns (without `uid`)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn datatypes(&self) -> &[Datatype] {
        &self.datatypes
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn table_spec(&self) -> TableSpec {
        let mut spec = TableSpec::new(&self.table).column("uid", Datatype::Uid);
        for (column, datatype) in self.columns.iter().zip(&self.datatypes) {
            spec = spec.column(column.clone(), datatype.clone());
        }
        spec.primary_key(&["uid"]).foreign_key("uid", MASTER_TABLE, "uid")
    }

    /// Column values of an entity, positional to `columns()`. Missing
    /// attributes take their ontology default.
    pub fn values_of(&self, entity: &Entity) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.columns.len());
        for attribute in &self.attributes {
            let value = entity
                .attribute(&attribute.name)
                .cloned()
                .unwrap_or_else(|| attribute.initial_value());
            match attribute.effective_datatype() {
                Datatype::Vector { len, .. } => match value {
                    Value::Null => values.extend(std::iter::repeat_n(Value::Null, len)),
                    Value::Vector(items) if items.len() == len => values.extend(items),
                    other => {
                        return Err(Error::ValueConversion(format!(
                            "attribute {} of {} expects {} components, got {}",
                            attribute.name, entity.uid, len, other
                        )))
                    }
                },
                _ => values.push(value),
            }
        }
        Ok(values)
    }

    /// Rebuild attribute values from a row positional to `columns()`
    pub fn attributes_from(&self, row: &[Value]) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        let mut cursor = row.iter();

        for attribute in &self.attributes {
            match attribute.effective_datatype() {
                Datatype::Vector { len, .. } => {
                    let items: Vec<Value> = cursor.by_ref().take(len).cloned().collect();
                    let value = if items.iter().all(Value::is_null) {
                        Value::Null
                    } else {
                        Value::Vector(items)
                    };
                    attributes.insert(attribute.name.clone(), value);
                }
                _ => {
                    let value = cursor.next().cloned().unwrap_or(Value::Null);
                    attributes.insert(attribute.name.clone(), value);
                }
            }
        }
        attributes
    }
}

/// A column of a known table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub native: NativeType,
    pub primary_key: bool,
}

/// Cached shape of a table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub generate_pk: bool,
    pub foreign_keys: BTreeMap<String, (String, String)>,
}

impl TableDef {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn from_spec(spec: &TableSpec) -> Result<Self> {
        let columns = spec
            .columns
            .iter()
            .map(|c| {
                Ok(ColumnDef {
                    name: c.clone(),
                    native: to_native_type(spec.datatypes.get(c))?,
                    primary_key: spec.primary_key.contains(c),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: spec.name.clone(),
            columns,
            generate_pk: spec.generate_pk,
            foreign_keys: spec.foreign_keys.clone(),
        })
    }
}

/// Session-owned cache of table shapes
#[derive(Debug, Default)]
pub struct SchemaManager {
    tables: BTreeMap<String, TableDef>,
    /// Tables created since the last commit
    uncommitted: BTreeSet<String>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflect every table of the database into the cache
    pub fn reflect_all(&mut self, conn: &Connection) -> Result<usize> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        for name in &names {
            if let Some(def) = reflect_table(conn, name)? {
                self.tables.insert(name.clone(), def);
            }
        }
        tracing::debug!("Reflected {} tables", names.len());
        Ok(names.len())
    }

    /// Cached shape of a table, reflecting it from the database on a miss.
    /// `None` when the table does not exist.
    pub fn get_or_reflect(&mut self, conn: &Connection, name: &str) -> Result<Option<&TableDef>> {
        if !self.tables.contains_key(name) {
            match reflect_table(conn, name)? {
                Some(def) => {
                    self.tables.insert(name.to_string(), def);
                }
                None => return Ok(None),
            }
        }
        Ok(self.tables.get(name))
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Create a table unless it is already known. Returns whether a table
    /// was actually created.
    pub fn create_table(&mut self, conn: &Connection, spec: &TableSpec) -> Result<bool> {
        if self.get_or_reflect(conn, &spec.name)?.is_some() {
            return Ok(false);
        }
        self.execute_create(conn, spec)
    }

    /// Run the DDL for a table this manager believes to be missing
    fn execute_create(&mut self, conn: &Connection, spec: &TableSpec) -> Result<bool> {
        let sql = spec.create_sql()?;
        tracing::debug!("Creating table {}", spec.name);
        match conn.execute(&sql, []) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(_, Some(ref message))) if message.contains("already exists") => {
                // another session created it first
                tracing::debug!("Table {} appeared concurrently", spec.name);
                self.tables.remove(&spec.name);
                return match self.get_or_reflect(conn, &spec.name)? {
                    Some(_) => Ok(false),
                    None => Err(Error::UnknownTable(spec.name.clone())),
                };
            }
            Err(e) => return Err(e.into()),
        }

        self.create_indexes(conn, &spec.name, &spec.indexes)?;
        self.tables.insert(spec.name.clone(), TableDef::from_spec(spec)?);
        self.uncommitted.insert(spec.name.clone());
        Ok(true)
    }

    /// Create secondary indexes on an existing table
    pub fn create_indexes(&self, conn: &Connection, table: &str, indexes: &[Vec<String>]) -> Result<()> {
        for stmt in index_statements(table, indexes) {
            conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    pub fn drop_table(&mut self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)), [])?;
        self.tables.remove(name);
        self.uncommitted.remove(name);
        tracing::debug!("Dropped table {}", name);
        Ok(())
    }

    /// Known tables whose name starts with `prefix`
    pub fn list_tables(&self, prefix: &str) -> BTreeSet<String> {
        self.tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// Forget tables whose creation was rolled back
    pub fn discard_uncommitted(&mut self) {
        for name in std::mem::take(&mut self.uncommitted) {
            self.tables.remove(&name);
        }
    }

    /// Forget everything, e.g. after dropped tables were rolled back
    pub fn clear_cache(&mut self) {
        self.tables.clear();
        self.uncommitted.clear();
    }
}

fn reflect_table(conn: &Connection, name: &str) -> Result<Option<TableDef>> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
    let raw: Vec<(String, String, i64)> = stmt
        .query_map([], |row| Ok((row.get(1)?, row.get(2)?, row.get(5)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let mut columns = Vec::with_capacity(raw.len());
    for (column, declared, pk) in raw {
        columns.push(ColumnDef {
            name: column,
            native: NativeType::parse(&declared)?,
            primary_key: pk > 0,
        });
    }

    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(name)))?;
    let foreign_keys: BTreeMap<String, (String, String)> = stmt
        .query_map([], |row| {
            let table: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: Option<String> = row.get(4)?;
            Ok((from, (table, to.unwrap_or_else(|| "uid".to_string()))))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let pk_columns: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary_key).collect();
    let generate_pk = pk_columns.len() == 1 && pk_columns[0].native == NativeType::Integer;

    Ok(Some(TableDef {
        name: name.to_string(),
        columns,
        generate_pk,
        foreign_keys,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{city_ontology, qn};

    #[test]
    fn test_names() {
        assert_eq!(data_table_name(&qn("CITY.CITY")), "CUDS_CITY___CITY");
        assert_eq!(vector_column("coordinates", 1), "coordinates___1");
        assert!(is_data_table("CUDS_CITY___CITY"));
        assert!(!is_data_table(MASTER_TABLE));
        assert_eq!(class_of_data_table("CUDS_CITY___CITIZEN"), Some(qn("CITY.CITIZEN")));
        assert_eq!(class_of_data_table(RELATIONSHIP_TABLE), None);
    }

    #[test]
    fn test_layout_expands_vectors() {
        let onto = city_ontology();
        let layout = DataLayout::for_class(&onto, &qn("CITY.CITY"));
        assert_eq!(layout.columns(), ["name", "coordinates___0", "coordinates___1"]);
        assert_eq!(layout.datatypes()[1], Datatype::Integer);

        let city = Entity::build(&onto, qn("CITY.CITY"), [("name", "Freiburg")]).unwrap();
        let values = layout.values_of(&city).unwrap();
        assert_eq!(values, vec![Value::from("Freiburg"), Value::Integer(0), Value::Integer(0)]);
        assert_eq!(layout.attributes_from(&values), city.attributes);
    }

    #[test]
    fn test_create_sql() {
        let sql = relationship_table_spec().create_sql().unwrap();
        assert!(sql.contains("\"origin\" VARCHAR(36)"));
        assert!(sql.contains("PRIMARY KEY (\"origin\", \"target\", \"name\")"));
        assert!(sql.contains("FOREIGN KEY(\"target\") REFERENCES \"CUDS_MASTER\" (\"uid\")"));

        let indexes = master_table_spec().index_sql();
        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].contains("\"idx_CUDS_MASTER_oclass\""));
    }

    #[test]
    fn test_create_is_idempotent_and_reflectable() {
        let conn = Connection::open_in_memory().unwrap();
        let mut schema = SchemaManager::new();

        assert!(schema.create_table(&conn, &master_table_spec()).unwrap());
        assert!(!schema.create_table(&conn, &master_table_spec()).unwrap());

        let mut fresh = SchemaManager::new();
        let def = fresh.get_or_reflect(&conn, MASTER_TABLE).unwrap().unwrap().clone();
        assert_eq!(def, schema.table(MASTER_TABLE).unwrap().clone());
        assert!(fresh.get_or_reflect(&conn, "CUDS_NOPE").unwrap().is_none());
    }

    #[test]
    fn test_generated_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        let mut schema = SchemaManager::new();
        let mut spec = TableSpec::new("counter")
            .column("id", Datatype::Integer)
            .column("label", Datatype::String)
            .primary_key(&["id"]);
        spec.generate_pk = true;
        schema.create_table(&conn, &spec).unwrap();

        let mut fresh = SchemaManager::new();
        assert!(fresh.get_or_reflect(&conn, "counter").unwrap().unwrap().generate_pk);
    }

    #[test]
    fn test_concurrent_creation_is_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        let mut first = SchemaManager::new();
        let mut second = SchemaManager::new();
        second.reflect_all(&conn).unwrap();
        assert!(second.table(MASTER_TABLE).is_none());

        // created between `second`'s reflection and its DDL
        first.create_table(&conn, &master_table_spec()).unwrap();
        assert!(!second.execute_create(&conn, &master_table_spec()).unwrap());
        assert!(second.table(MASTER_TABLE).is_some());
        assert!(!second.create_table(&conn, &master_table_spec()).unwrap());
    }

    #[test]
    fn test_list_and_discard() {
        let conn = Connection::open_in_memory().unwrap();
        let mut schema = SchemaManager::new();
        schema.create_table(&conn, &master_table_spec()).unwrap();
        schema.mark_committed();
        schema.create_table(&conn, &relationship_table_spec()).unwrap();

        assert_eq!(schema.list_tables("CUDS_").len(), 2);
        schema.discard_uncommitted();
        assert_eq!(
            schema.list_tables("CUDS_").into_iter().collect::<Vec<_>>(),
            vec![MASTER_TABLE.to_string()]
        );
    }
}
