use std::sync::Arc;

use penumbra::query::ast::{Expr, Statement, Target, UpdateReturn};
use penumbra::query::gateway::{Gateway, Record};
use penumbra::query::metadata::{IndexBy, IndexKind};
use penumbra::query::Params;
use penumbra::storage::MemoryStore;
use penumbra::{Executor, PenumbraError, QueryBuilder, RecordId, Result, ResultRow, Value};

struct Fixture {
    store: Arc<MemoryStore>,
    executor: Executor,
    rome: RecordId,
    oslo: RecordId,
    ada: RecordId,
}

fn setup() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.create_class("Person", &[]).unwrap();
    store.create_class("Archive", &[]).unwrap();
    store
        .create_index("Person.name", "Person", &["name"], IndexKind::Unique, IndexBy::Value)
        .unwrap();
    for (name, age, city) in [
        ("alice", 31, "Rome"),
        ("bob", 25, "Oslo"),
        ("carol", 42, "Rome"),
        ("dave", 22, "Paris"),
        ("erin", 38, "Oslo"),
    ] {
        store
            .insert(
                Record::new("Person")
                    .with_property("name", name)
                    .with_property("age", age)
                    .with_property("city", city),
            )
            .unwrap();
    }

    store.create_vertex_class("Town").unwrap();
    store.create_vertex_class("Citizen").unwrap();
    store.create_edge_class("LivesIn").unwrap();
    let rome = store
        .insert(Record::new("Town").with_property("name", "Rome"))
        .unwrap();
    let oslo = store
        .insert(Record::new("Town").with_property("name", "Oslo"))
        .unwrap();
    let ada = store
        .insert(Record::new("Citizen").with_property("name", "ada"))
        .unwrap();
    store.create_edge("LivesIn", ada, rome).unwrap();

    let executor = Executor::new(store.clone() as Arc<dyn Gateway>);
    Fixture {
        store,
        executor,
        rome,
        oslo,
        ada,
    }
}

fn run(executor: &Executor, statement: impl Into<Statement>) -> Result<Vec<ResultRow>> {
    executor
        .execute(&statement.into(), Params::new())?
        .collect_rows()
}

fn count_of(rows: &[ResultRow]) -> Value {
    assert_eq!(rows.len(), 1, "expected a single count row");
    rows[0].attribute("count")
}

fn class_size(fixture: &Fixture, class: &str) -> usize {
    run(&fixture.executor, QueryBuilder::select_from(class).build().unwrap())
        .unwrap()
        .len()
}

fn person(fixture: &Fixture, name: &str) -> Option<ResultRow> {
    run(
        &fixture.executor,
        QueryBuilder::select_from("Person")
            .filter(Expr::field("name").eq(name))
            .build()
            .unwrap(),
    )
    .unwrap()
    .into_iter()
    .next()
}

#[test]
fn mutations_need_a_transaction() {
    let fixture = setup();
    let err = run(
        &fixture.executor,
        QueryBuilder::insert_into("Person").set("name", "zed").build().unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::CommandExecution(_)), "{err}");
    assert_eq!(class_size(&fixture, "Person"), 5);
}

#[test]
fn insert_set_and_values() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let created = run(
        &fixture.executor,
        QueryBuilder::insert_into("Person")
            .set("name", "zed")
            .set("age", 50)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(created.len(), 1);
    assert!(created[0].is_element());
    assert_eq!(created[0].attribute("age"), Value::Int(50));

    let created = run(
        &fixture.executor,
        QueryBuilder::insert_into("Person")
            .values(["name", "age"], [Value::from("yan"), Value::from(19)])
            .values(["name", "age"], [Value::from("xia"), Value::from(61)])
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(created.len(), 2);
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 8);
}

#[test]
fn insert_from_query_copies_properties() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let copied = run(
        &fixture.executor,
        QueryBuilder::insert_into("Archive")
            .from_query(
                QueryBuilder::select_from("Person")
                    .filter(Expr::field("age").gt(35))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|row| row.class_name() == Some("Archive")));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Archive"), 2);
}

#[test]
fn unique_index_rejects_a_duplicate_insert() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let err = run(
        &fixture.executor,
        QueryBuilder::insert_into("Person").set("name", "bob").build().unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::ConstraintViolation(_)), "{err}");
    fixture.store.rollback().unwrap();
}

#[test]
fn update_reports_a_count_by_default() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .set("city", "Milan")
            .filter(Expr::field("city").eq("Rome"))
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(2));
    fixture.store.commit().unwrap();
    let alice = person(&fixture, "alice").unwrap();
    assert_eq!(alice.attribute("city"), Value::from("Milan"));
    assert_eq!(alice.version(), 2);
}

#[test]
fn update_can_return_before_or_after() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let after = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .increment("age", 1)
            .filter(Expr::field("name").eq("bob"))
            .returning(UpdateReturn::After)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(after[0].attribute("age"), Value::Int(26));

    let before = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .remove("city")
            .filter(Expr::field("name").eq("bob"))
            .returning(UpdateReturn::Before)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(before[0].attribute("city"), Value::from("Oslo"));
    fixture.store.commit().unwrap();
    assert_eq!(person(&fixture, "bob").unwrap().attribute("city"), Value::Null);
}

#[test]
fn upsert_updates_a_match() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .set("age", 50)
            .filter(Expr::field("name").eq("bob"))
            .upsert()
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(1));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 5);
    assert_eq!(person(&fixture, "bob").unwrap().attribute("age"), Value::Int(50));
}

#[test]
fn upsert_creates_from_equality_terms() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .set("age", 20)
            .filter(Expr::field("name").eq("zoe"))
            .upsert()
            .returning(UpdateReturn::After)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("name"), Value::from("zoe"));
    assert_eq!(rows[0].attribute("age"), Value::Int(20));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 6);
}

#[test]
fn upsert_without_a_unique_index_fails() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let err = run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Archive"))
            .set("age", 1)
            .filter(Expr::field("name").eq("nobody"))
            .upsert()
            .build()
            .unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::CommandExecution(_)), "{err}");
    fixture.store.rollback().unwrap();
    assert_eq!(class_size(&fixture, "Archive"), 0);
}

#[test]
fn delete_counts_or_returns_the_removed_rows() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::delete_from(Target::class("Person"))
            .filter(Expr::field("age").lt(30))
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(2));

    let removed = run(
        &fixture.executor,
        QueryBuilder::delete_from(Target::class("Person"))
            .filter(Expr::field("city").eq("Rome"))
            .limit(1)
            .return_before()
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].is_element());
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 2);
}

#[test]
fn delete_limit_caps_the_count_and_shows_inside_the_transaction() {
    let fixture = setup();
    let delete_older = |limit: i64| {
        QueryBuilder::delete_from(Target::class("Person"))
            .filter(Expr::field("age").ge(30))
            .limit(limit)
            .build()
            .unwrap()
    };
    let older = || {
        QueryBuilder::select_from("Person")
            .filter(Expr::field("age").ge(30))
            .build()
            .unwrap()
    };
    fixture.store.begin().unwrap();
    let rows = run(&fixture.executor, delete_older(2)).unwrap();
    assert_eq!(count_of(&rows), Value::Int(2));
    // visible to reads in the same open transaction
    assert_eq!(run(&fixture.executor, older()).unwrap().len(), 1);
    assert_eq!(class_size(&fixture, "Person"), 3);

    let rows = run(&fixture.executor, delete_older(5)).unwrap();
    assert_eq!(count_of(&rows), Value::Int(1));
    let rows = run(&fixture.executor, delete_older(5)).unwrap();
    assert_eq!(count_of(&rows), Value::Int(0));
    assert!(run(&fixture.executor, older()).unwrap().is_empty());

    fixture.store.rollback().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 5);
    assert_eq!(run(&fixture.executor, older()).unwrap().len(), 3);
}

#[test]
fn plain_delete_refuses_graph_elements() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let err = run(
        &fixture.executor,
        QueryBuilder::delete_from(Target::class("Town")).build().unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::RecordTypeMismatch { .. }), "{err}");

    let err = run(
        &fixture.executor,
        QueryBuilder::delete_vertex(Target::class("Person")).build().unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::RecordTypeMismatch { .. }), "{err}");

    let rows = run(
        &fixture.executor,
        QueryBuilder::delete_from(Target::Rids(vec![fixture.oslo]))
            .unsafe_delete()
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(1));
    fixture.store.commit().unwrap();
}

#[test]
fn deleting_a_vertex_drops_its_edges() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::delete_vertex(Target::Rids(vec![fixture.rome]))
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(1));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "LivesIn"), 0);
    assert!(fixture.store.fetch(fixture.ada).unwrap().is_some());
}

#[test]
fn delete_edge_only_touches_edges() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::delete_edge(Target::class("LivesIn")).build().unwrap(),
    )
    .unwrap();
    assert_eq!(count_of(&rows), Value::Int(1));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "Town"), 2);
}

#[test]
fn create_edge_from_rids_and_queries() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let rows = run(
        &fixture.executor,
        QueryBuilder::create_edge("LivesIn")
            .from_rids([fixture.ada])
            .to_query(
                QueryBuilder::select_from("Town")
                    .filter(Expr::field("name").eq("Oslo"))
                    .build()
                    .unwrap(),
            )
            .set("since", 2021)
            .build()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("out"), Value::Link(fixture.ada));
    assert_eq!(rows[0].attribute("in"), Value::Link(fixture.oslo));
    assert_eq!(rows[0].attribute("since"), Value::Int(2021));
    fixture.store.commit().unwrap();
    assert_eq!(class_size(&fixture, "LivesIn"), 2);
}

#[test]
fn create_edge_upsert_reuses_the_existing_edge() {
    let fixture = setup();
    let upsert = |since: i64| {
        QueryBuilder::create_edge("LivesIn")
            .from_rids([fixture.ada])
            .to_rids([fixture.rome])
            .set("since", since)
            .upsert()
            .build()
            .unwrap()
    };
    fixture.store.begin().unwrap();
    let err = run(&fixture.executor, upsert(2019)).unwrap_err();
    assert!(matches!(err, PenumbraError::CommandExecution(_)), "{err}");
    fixture.store.rollback().unwrap();

    fixture
        .store
        .create_index("LivesIn.ends", "LivesIn", &["out", "in"], IndexKind::Unique, IndexBy::Value)
        .unwrap();
    fixture.store.begin().unwrap();
    run(&fixture.executor, upsert(2019)).unwrap();
    run(&fixture.executor, upsert(2020)).unwrap();
    fixture.store.commit().unwrap();
    let edges = run(
        &fixture.executor,
        QueryBuilder::select_from("LivesIn").build().unwrap(),
    )
    .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].attribute("since"), Value::Int(2020));
}

#[test]
fn edges_need_existing_vertex_endpoints() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    let missing = RecordId::new(fixture.rome.cluster, 999);
    let err = run(
        &fixture.executor,
        QueryBuilder::create_edge("LivesIn")
            .from_rids([fixture.ada])
            .to_rids([missing])
            .build()
            .unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::NotFound(_)), "{err}");

    let err = run(
        &fixture.executor,
        QueryBuilder::create_edge("Town")
            .from_rids([fixture.ada])
            .to_rids([fixture.rome])
            .build()
            .unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, PenumbraError::CommandExecution(_)), "{err}");
    fixture.store.rollback().unwrap();
}

#[test]
fn rollback_discards_command_effects() {
    let fixture = setup();
    fixture.store.begin().unwrap();
    run(
        &fixture.executor,
        QueryBuilder::delete_from(Target::class("Person")).build().unwrap(),
    )
    .unwrap();
    assert_eq!(class_size(&fixture, "Person"), 0);
    fixture.store.rollback().unwrap();
    assert_eq!(class_size(&fixture, "Person"), 5);
}

#[test]
fn stale_writes_are_detected() {
    let fixture = setup();
    let stale = person(&fixture, "carol").unwrap().to_record().unwrap();
    fixture.store.begin().unwrap();
    run(
        &fixture.executor,
        QueryBuilder::update(Target::class("Person"))
            .set("age", 43)
            .filter(Expr::field("name").eq("carol"))
            .build()
            .unwrap(),
    )
    .unwrap();
    let err = fixture.store.save(stale).unwrap_err();
    assert!(
        matches!(
            err,
            PenumbraError::ConcurrentModification {
                expected: 1,
                actual: 2,
                ..
            }
        ),
        "{err}"
    );
    fixture.store.commit().unwrap();
}
