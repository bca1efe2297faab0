mod common;

use common::{commit_freiburg, count, freiburg, qn, table_names, TestDb};
use relgraph::{Entity, Error, Graph, SessionState, Uid, Value};

#[test]
fn test_insert_writes_master_relationships_and_data() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = commit_freiburg(&mut session, &onto);

    let raw = db.raw();
    let mut stmt = raw
        .prepare("SELECT uid, oclass, first_level FROM CUDS_MASTER ORDER BY oclass, uid")
        .unwrap();
    let master: Vec<(String, String, bool)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(master.len(), 3);
    for (uid, oclass, first_level) in &master {
        if *uid == city.city.to_string() {
            assert_eq!(oclass, "CITY.CITY");
            assert!(first_level);
        } else {
            assert_eq!(oclass, "CITY.CITIZEN");
            assert!(!first_level);
        }
    }

    let mut stmt = raw
        .prepare("SELECT name, COUNT(*) FROM CUDS_RELATIONSHIPS GROUP BY name ORDER BY name")
        .unwrap();
    let edges: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(
        edges,
        vec![
            ("CITY.HAS_INHABITANT".to_string(), 2),
            ("CITY.IS_INHABITANT_OF".to_string(), 2),
            ("CITY.IS_PART_OF".to_string(), 1),
        ]
    );

    let (target, target_class): (String, String) = raw
        .query_row(
            "SELECT target, target_oclass FROM CUDS_RELATIONSHIPS WHERE name = 'CITY.IS_PART_OF'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(target, Uid::ROOT.to_string());
    assert_eq!(target_class, "CITY.CITY_WRAPPER");

    let (name, x, y): (String, i64, i64) = raw
        .query_row(
            "SELECT name, coordinates___0, coordinates___1 FROM CUDS_CITY___CITY",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((name.as_str(), x, y), ("Freiburg", 0, 0));
    assert_eq!(count(&raw, "CUDS_CITY___CITIZEN"), 2);
}

#[test]
fn test_update_rewrites_attributes_and_edges() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = commit_freiburg(&mut session, &onto);

    session.set_attribute(city.city, "name", "Paris").unwrap();
    session
        .set_attribute(city.city, "coordinates", Value::Vector(vec![Value::Integer(2), Value::Integer(48)]))
        .unwrap();
    let mut graph = Graph::new();
    let street = graph.insert(Entity::build(&onto, qn("CITY.STREET"), [("name", "Rue de Rivoli")]).unwrap());
    session.add(city.city, Some(&qn("CITY.HAS_PART")), &graph, street).unwrap();
    session.commit().unwrap();

    let raw = db.raw();
    let (name, x, y): (String, i64, i64) = raw
        .query_row(
            "SELECT name, coordinates___0, coordinates___1 FROM CUDS_CITY___CITY",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((name.as_str(), x, y), ("Paris", 2, 48));
    assert_eq!(count(&raw, "CUDS_MASTER"), 4);
    assert_eq!(count(&raw, "CUDS_RELATIONSHIPS"), 7);

    let street_first_level: bool = raw
        .query_row(
            "SELECT first_level FROM CUDS_MASTER WHERE uid = ?1",
            [street.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert!(!street_first_level);
}

#[test]
fn test_update_first_level() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = commit_freiburg(&mut session, &onto);
    let peter = city.citizens[0];

    session.relate(Uid::ROOT, &qn("CITY.HAS_PART"), peter).unwrap();
    session.commit().unwrap();

    let raw = db.raw();
    let first_level: bool = raw
        .query_row(
            "SELECT first_level FROM CUDS_MASTER WHERE uid = ?1",
            [peter.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert!(first_level);

    session.unrelate(Uid::ROOT, None, peter).unwrap();
    session.commit().unwrap();
    let first_level: bool = raw
        .query_row(
            "SELECT first_level FROM CUDS_MASTER WHERE uid = ?1",
            [peter.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert!(!first_level);
}

#[test]
fn test_delete_removes_rows_and_edges() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = commit_freiburg(&mut session, &onto);
    let [peter, anne] = city.citizens;

    assert!(session.delete(peter).unwrap());
    session.commit().unwrap();

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_MASTER"), 2);
    assert_eq!(count(&raw, "CUDS_CITY___CITIZEN"), 1);
    assert_eq!(count(&raw, "CUDS_RELATIONSHIPS"), 3);
    let touching: i64 = raw
        .query_row(
            "SELECT COUNT(*) FROM CUDS_RELATIONSHIPS WHERE origin = ?1 OR target = ?1",
            [peter.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(touching, 0);

    assert_eq!(session.neighbors(city.city, Some(&qn("CITY.HAS_INHABITANT"))).unwrap(), vec![anne]);
    assert!(session.get(peter).unwrap().is_none());
    assert!(!session.delete(peter).unwrap());
}

#[test]
fn test_open_loads_first_level_and_neighbors_on_demand() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let city = {
        let mut session = db.session(&onto);
        let city = commit_freiburg(&mut session, &onto);
        session.close().unwrap();
        city
    };

    let mut session = db.session(&onto);
    assert!(session.registry().contains(city.city));
    assert!(!session.registry().contains(city.citizens[0]));
    assert_eq!(
        session.neighbors(Uid::ROOT, None).unwrap(),
        vec![city.city]
    );

    let mut citizens = session.neighbors(city.city, Some(&qn("CITY.HAS_INHABITANT"))).unwrap();
    citizens.sort();
    let mut expected = city.citizens.to_vec();
    expected.sort();
    assert_eq!(citizens, expected);

    let peter = session.get(city.citizens[0]).unwrap().unwrap();
    assert_eq!(peter.attribute("name").and_then(Value::as_str), Some("Peter"));
    assert_eq!(peter.attribute("age").and_then(Value::as_i64), Some(25));
    assert!(peter.is_linked_to(city.city));
}

#[test]
fn test_load_by_type() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let city = {
        let mut session = db.session(&onto);
        commit_freiburg(&mut session, &onto)
    };

    let mut session = db.session(&onto);
    let uids = |session: &mut relgraph::WrapperSession, class: &str| -> Vec<Uid> {
        let mut uids: Vec<Uid> = session
            .load_by_type(&qn(class))
            .unwrap()
            .map(|e| e.unwrap().uid)
            .collect();
        uids.sort();
        uids
    };
    let mut citizens = city.citizens.to_vec();
    citizens.sort();

    assert_eq!(uids(&mut session, "CITY.CITY"), vec![city.city]);
    assert_eq!(uids(&mut session, "CITY.CITIZEN"), citizens);
    assert_eq!(uids(&mut session, "CITY.PERSON"), citizens);
    assert!(uids(&mut session, "CITY.STREET").is_empty());
    assert!(session.registry().contains(city.citizens[1]));
}

#[test]
fn test_add_entity_already_in_database() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let city = {
        let mut session = db.session(&onto);
        commit_freiburg(&mut session, &onto)
    };

    let mut session = db.session(&onto);
    let mut graph = Graph::new();
    let peter = graph.insert(
        Entity::build_with_uid(&onto, city.citizens[0], qn("CITY.CITIZEN"), [("name", "Peter Pan")]).unwrap(),
    );
    session.add(Uid::ROOT, None, &graph, peter).unwrap();
    session.commit().unwrap();

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_MASTER"), 3);
    let (name, first_level): (String, bool) = raw
        .query_row(
            "SELECT d.name, m.first_level FROM CUDS_CITY___CITIZEN d, CUDS_MASTER m
             WHERE d.uid = m.uid AND d.uid = ?1",
            [peter.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(name, "Peter Pan");
    assert!(first_level);
}

#[test]
fn test_add_twice_is_idempotent() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = freiburg(&onto);
    session.add(Uid::ROOT, None, &city.graph, city.city).unwrap();
    session.add(Uid::ROOT, None, &city.graph, city.city).unwrap();
    session.commit().unwrap();

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_MASTER"), 3);
    assert_eq!(count(&raw, "CUDS_RELATIONSHIPS"), 5);
}

#[test]
fn test_tables_are_created_on_demand() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let raw = db.raw();
    assert_eq!(table_names(&raw), vec!["CUDS_MASTER", "CUDS_RELATIONSHIPS"]);

    let city = commit_freiburg(&mut session, &onto);
    assert_eq!(
        table_names(&raw),
        vec!["CUDS_CITY___CITIZEN", "CUDS_CITY___CITY", "CUDS_MASTER", "CUDS_RELATIONSHIPS"]
    );

    let mut graph = Graph::new();
    let street = graph.insert(Entity::build(&onto, qn("CITY.STREET"), [("name", "Main Street")]).unwrap());
    session.add(city.city, Some(&qn("CITY.HAS_PART")), &graph, street).unwrap();
    session.commit().unwrap();
    assert_eq!(table_names(&raw).len(), 5);
    assert!(table_names(&raw).contains(&"CUDS_CITY___STREET".to_string()));
}

#[test]
fn test_expiry_across_sessions() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut first = db.session(&onto);
    let city = commit_freiburg(&mut first, &onto);

    let name = |session: &mut relgraph::WrapperSession| {
        session
            .get(city.city)
            .unwrap()
            .and_then(|e| e.attribute("name").and_then(Value::as_str).map(str::to_string))
    };
    assert_eq!(name(&mut first).as_deref(), Some("Freiburg"));

    let mut second = db.session(&onto);
    second.set_attribute(city.city, "name", "Freiburg im Breisgau").unwrap();
    second.commit().unwrap();
    assert_eq!(name(&mut first).as_deref(), Some("Freiburg"));

    first.expire(&[city.city]);
    assert!(first.is_expired(city.city));
    assert_eq!(name(&mut first).as_deref(), Some("Freiburg im Breisgau"));

    assert!(second.delete(city.citizens[0]).unwrap());
    second.commit().unwrap();
    let found = first.refresh(&city.citizens).unwrap();
    assert_eq!(found, vec![city.citizens[1]]);
    assert!(!first.registry().contains(city.citizens[0]));
}

#[test]
fn test_commit_expires_loaded_entities() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut first = db.session(&onto);
    let city = commit_freiburg(&mut first, &onto);
    assert!(first.is_expired(city.city));
    assert!(!first.is_expired(Uid::ROOT));
    first.get(city.city).unwrap();
    assert!(!first.is_expired(city.city));

    let mut second = db.session(&onto);
    second.set_attribute(city.city, "name", "Freiburg im Breisgau").unwrap();
    second.commit().unwrap();

    first.set_attribute(city.citizens[0], "age", 40).unwrap();
    first.commit().unwrap();
    assert!(first.is_expired(city.city));
    let name = first
        .get(city.city)
        .unwrap()
        .and_then(|e| e.attribute("name").and_then(Value::as_str).map(str::to_string));
    assert_eq!(name.as_deref(), Some("Freiburg im Breisgau"));
}

#[test]
fn test_refresh_expires_neighbors_whose_edges_moved() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut first = db.session(&onto);
    let city = commit_freiburg(&mut first, &onto);
    let peter = city.citizens[0];
    first.get(city.city).unwrap();
    first.get(peter).unwrap();
    assert!(!first.is_expired(peter));

    let mut second = db.session(&onto);
    assert!(second.unrelate(city.city, None, peter).unwrap());
    second.commit().unwrap();

    first.refresh(&[city.city]).unwrap();
    assert!(first.is_expired(peter));
    assert!(!first.get(peter).unwrap().unwrap().is_linked_to(city.city));

    first.set_attribute(peter, "age", 30).unwrap();
    first.commit().unwrap();

    let raw = db.raw();
    let between: i64 = raw
        .query_row(
            "SELECT COUNT(*) FROM CUDS_RELATIONSHIPS
             WHERE (origin = ?1 AND target = ?2) OR (origin = ?2 AND target = ?1)",
            [city.city.to_string(), peter.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(between, 0);
    let age: i64 = raw
        .query_row("SELECT age FROM CUDS_CITY___CITIZEN WHERE uid = ?1", [peter.to_string()], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(age, 30);
}

#[test]
fn test_failed_commit_keeps_pending_changes() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    db.raw()
        .execute_batch("CREATE TABLE CUDS_CITY___CITY (uid VARCHAR(36) PRIMARY KEY)")
        .unwrap();

    let mut session = db.session(&onto);
    let city = freiburg(&onto);
    session.add(Uid::ROOT, None, &city.graph, city.city).unwrap();
    let pending = session.buffer().len();

    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));
    assert_eq!(session.buffer().len(), pending);
    assert_eq!(session.state(), SessionState::Connected);

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_MASTER"), 0);
    assert_eq!(count(&raw, "CUDS_RELATIONSHIPS"), 0);
    assert_eq!(count(&raw, "CUDS_CITY___CITY"), 0);
}

#[test]
fn test_prune_keeps_entities_reachable_another_way() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let (city, street, building) = {
        let mut session = db.session(&onto);
        let city = commit_freiburg(&mut session, &onto);
        let mut graph = Graph::new();
        let street = graph.insert(Entity::build(&onto, qn("CITY.STREET"), [("name", "Main Street")]).unwrap());
        let building = graph.insert(Entity::build(&onto, qn("CITY.BUILDING"), [("name", "Town Hall")]).unwrap());
        graph.relate(&onto, street, &qn("CITY.HAS_PART"), building).unwrap();
        session.add(city.city, Some(&qn("CITY.HAS_PART")), &graph, street).unwrap();
        session.relate(city.city, &qn("CITY.HAS_PART"), building).unwrap();
        session.commit().unwrap();
        (city, street, building)
    };

    let mut session = db.session(&onto);
    assert!(session.remove(city.city, building).unwrap());
    assert!(session.prune(&[]).unwrap().is_empty());
    session.commit().unwrap();
    assert_eq!(count(&db.raw(), "CUDS_CITY___BUILDING"), 1);

    assert!(session.remove(street, building).unwrap());
    assert_eq!(session.prune(&[]).unwrap(), vec![building]);
    session.commit().unwrap();

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_CITY___BUILDING"), 0);
    assert_eq!(count(&raw, "CUDS_MASTER"), 4);
}

#[test]
fn test_rollback_discards_pending_changes() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    let city = commit_freiburg(&mut session, &onto);

    session.begin_transaction().unwrap();
    assert_eq!(session.state(), SessionState::TransactionOpen);
    session.set_attribute(city.city, "name", "Basel").unwrap();
    let mut graph = Graph::new();
    let street = graph.insert(Entity::build(&onto, qn("CITY.STREET"), [("name", "Main Street")]).unwrap());
    session.add(city.city, Some(&qn("CITY.HAS_PART")), &graph, street).unwrap();

    session.rollback_transaction().unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.buffer().is_empty());
    assert!(session.get(street).unwrap().is_none());
    let name = session
        .get(city.city)
        .unwrap()
        .and_then(|e| e.attribute("name").and_then(Value::as_str).map(str::to_string));
    assert_eq!(name.as_deref(), Some("Freiburg"));
    assert!(!table_names(&db.raw()).contains(&"CUDS_CITY___STREET".to_string()));
}

#[test]
fn test_prune_after_detaching_from_root() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let city = {
        let mut session = db.session(&onto);
        commit_freiburg(&mut session, &onto)
    };

    let mut session = db.session(&onto);
    assert!(session.remove(Uid::ROOT, city.city).unwrap());
    let pruned = session.prune(&[]).unwrap();
    assert_eq!(pruned.len(), 3);
    session.commit().unwrap();

    let raw = db.raw();
    assert_eq!(count(&raw, "CUDS_MASTER"), 0);
    assert_eq!(count(&raw, "CUDS_RELATIONSHIPS"), 0);
    assert_eq!(count(&raw, "CUDS_CITY___CITIZEN"), 0);
}

#[test]
fn test_clear_database_keeps_tables() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    commit_freiburg(&mut session, &onto);

    session.clear_database().unwrap();
    let raw = db.raw();
    let tables = table_names(&raw);
    assert_eq!(tables.len(), 4);
    for table in &tables {
        assert_eq!(count(&raw, table), 0);
    }

    commit_freiburg(&mut session, &onto);
    assert_eq!(count(&raw, "CUDS_MASTER"), 3);
}

#[test]
fn test_closed_session_rejects_operations() {
    let db = TestDb::new();
    let onto = common::city_ontology();
    let mut session = db.session(&onto);
    session.close().unwrap();
    session.close().unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.commit(), Err(Error::SessionClosed)));
    assert!(matches!(session.get(Uid::ROOT), Err(Error::SessionClosed)));
}
