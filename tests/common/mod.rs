#![allow(dead_code)]

use relgraph::{Entity, Graph, Ontology, QualifiedName, SessionOptions, Uid, WrapperSession};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn city_ontology() -> Arc<Ontology> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/city.toml");
    Arc::new(Ontology::from_path(&path).unwrap())
}

pub fn qn(name: &str) -> QualifiedName {
    QualifiedName::parse(name).unwrap()
}

pub fn options() -> SessionOptions {
    SessionOptions::default().with_root_class(qn("CITY.CITY_WRAPPER"))
}

/// A database file inside a temporary directory
pub struct TestDb {
    _dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        Self { _dir: dir, path }
    }

    pub fn url(&self) -> String {
        format!("sqlite:///{}", self.path.display())
    }

    pub fn session(&self, onto: &Arc<Ontology>) -> WrapperSession {
        WrapperSession::open(&self.url(), onto.clone(), options()).unwrap()
    }

    /// Independent connection for inspecting raw tables
    pub fn raw(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }
}

pub fn count(conn: &Connection, table: &str) -> usize {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get::<_, i64>(0))
        .unwrap() as usize
}

pub fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'CUDS_%' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<String>>>()
        .unwrap()
}

/// Freiburg with two citizens
pub struct City {
    pub graph: Graph,
    pub city: Uid,
    pub citizens: [Uid; 2],
}

pub fn freiburg(onto: &Ontology) -> City {
    let mut graph = Graph::new();
    let city = graph.insert(Entity::build(onto, qn("CITY.CITY"), [("name", "Freiburg")]).unwrap());
    let peter = graph.insert(Entity::build(onto, qn("CITY.CITIZEN"), [("name", "Peter")]).unwrap());
    let anne = graph.insert(Entity::build(onto, qn("CITY.CITIZEN"), [("name", "Anne")]).unwrap());
    for citizen in [peter, anne] {
        graph.relate(onto, city, &qn("CITY.HAS_INHABITANT"), citizen).unwrap();
    }
    City {
        graph,
        city,
        citizens: [peter, anne],
    }
}

/// Store Freiburg under the root and commit
pub fn commit_freiburg(session: &mut WrapperSession, onto: &Ontology) -> City {
    let city = freiburg(onto);
    session.add(Uid::ROOT, None, &city.graph, city.city).unwrap();
    session.commit().unwrap();
    city
}
