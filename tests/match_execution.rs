use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use penumbra::query::ast::{Expr, OrderItem, Statement};
use penumbra::query::builder::MatchBuilder;
use penumbra::query::errors::PlanningError;
use penumbra::query::gateway::{
    BoxIdStream, Direction, Gateway, IndexPredicate, Neighbor, Record, ScanOrder,
};
use penumbra::query::metadata::{ClassDef, IndexDef, MetadataProvider};
use penumbra::query::{ExecutionConfig, Node, Params};
use penumbra::storage::MemoryStore;
use penumbra::types::ClusterId;
use penumbra::{Executor, PenumbraError, QueryBuilder, RecordId, Result, ResultRow, Value};

struct Social {
    store: Arc<MemoryStore>,
    executor: Executor,
    alice: RecordId,
}

/// alice -> bob, alice -> carol, bob -> carol, carol -> dave; everybody but
/// bob lives in Rome.
fn setup_social() -> Social {
    let store = Arc::new(MemoryStore::new());
    store.create_vertex_class("Person").unwrap();
    store.create_vertex_class("City").unwrap();
    store.create_edge_class("Knows").unwrap();
    store.create_edge_class("LivesIn").unwrap();
    let person = |name: &str, age: i64| {
        store
            .insert(
                Record::new("Person")
                    .with_property("name", name)
                    .with_property("age", age),
            )
            .unwrap()
    };
    let alice = person("alice", 31);
    let bob = person("bob", 25);
    let carol = person("carol", 42);
    let dave = person("dave", 22);
    let rome = store
        .insert(Record::new("City").with_property("name", "Rome"))
        .unwrap();
    let oslo = store
        .insert(Record::new("City").with_property("name", "Oslo"))
        .unwrap();
    for (from, to) in [(alice, bob), (alice, carol), (bob, carol), (carol, dave)] {
        store.create_edge("Knows", from, to).unwrap();
    }
    for (who, city) in [(alice, rome), (bob, oslo), (carol, rome), (dave, rome)] {
        store.create_edge("LivesIn", who, city).unwrap();
    }
    let executor = Executor::new(store.clone() as Arc<dyn Gateway>);
    Social {
        store,
        executor,
        alice,
    }
}

impl Social {
    fn run(&self, builder: MatchBuilder) -> Vec<ResultRow> {
        builder
            .execute(&self.executor, Params::new())
            .unwrap()
            .collect_rows()
            .unwrap()
    }

    fn name_of(&self, value: Option<&Value>) -> String {
        let Some(rid) = value.and_then(Value::as_link) else {
            return "-".to_owned();
        };
        let record = self.store.fetch(rid).unwrap().unwrap();
        record.get("name").and_then(Value::as_str).unwrap_or("?").to_owned()
    }

    fn pairs(&self, rows: &[ResultRow], left: &str, right: &str) -> BTreeSet<(String, String)> {
        rows.iter()
            .map(|row| {
                (
                    self.name_of(row.property(left)),
                    self.name_of(row.property(right)),
                )
            })
            .collect()
    }
}

fn pair(left: &str, right: &str) -> (String, String) {
    (left.to_owned(), right.to_owned())
}

fn named(name: &str) -> Expr {
    Expr::field("name").eq(name)
}

#[test]
fn matches_bind_every_alias() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", "f"),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(
        social.pairs(&rows, "a", "f"),
        BTreeSet::from([pair("alice", "bob"), pair("alice", "carol")])
    );
}

#[test]
fn return_items_read_through_links() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", "f")
            .returning([(Expr::field("f").member("name"), "friend")])
            .order_by(OrderItem::desc(Expr::field("friend"))),
    );
    let friends: Vec<_> = rows.iter().map(|row| row.attribute("friend")).collect();
    assert_eq!(friends, vec![Value::from("carol"), Value::from("bob")]);
}

#[test]
fn start_from_a_known_rid() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::new().named("a").rid(social.alice))
            .out("Knows", "f")
            .out("Knows", "g"),
    );
    assert_eq!(
        social.pairs(&rows, "f", "g"),
        BTreeSet::from([pair("bob", "carol"), pair("carol", "dave")])
    );
}

#[test]
fn patterns_join_on_shared_aliases() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", "f")
            .pattern("f")
            .out("LivesIn", Node::class("City").named("c").filter(named("Rome"))),
    );
    assert_eq!(
        social.pairs(&rows, "a", "f"),
        BTreeSet::from([
            pair("alice", "carol"),
            pair("bob", "carol"),
            pair("carol", "dave"),
        ])
    );
}

#[test]
fn filters_see_earlier_bindings() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a")).out(
            "Knows",
            Node::alias("f").filter(
                Expr::field("age").gt(Expr::matched("a").member("age")),
            ),
        ),
    );
    assert_eq!(
        social.pairs(&rows, "a", "f"),
        BTreeSet::from([pair("alice", "carol"), pair("bob", "carol")])
    );
}

#[test]
fn backward_hops_follow_incoming_edges() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("p").filter(named("carol")))
            .in_("Knows", "who"),
    );
    assert_eq!(
        social.pairs(&rows, "p", "who"),
        BTreeSet::from([pair("carol", "alice"), pair("carol", "bob")])
    );
}

#[test]
fn not_patterns_exclude_matches() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", "f")
            .not_pattern("a")
            .out("LivesIn", Node::new().filter(named("Rome"))),
    );
    assert_eq!(social.pairs(&rows, "a", "f"), BTreeSet::from([pair("bob", "carol")]));

    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", "f")
            .out("Knows", "g")
            .not_pattern("a")
            .out("Knows", "g"),
    );
    assert_eq!(
        social.pairs(&rows, "a", "g"),
        BTreeSet::from([pair("alice", "dave"), pair("bob", "dave")])
    );
}

#[test]
fn optional_aliases_bind_null() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(
            Node::class("Person")
                .named("a")
                .filter(Expr::field("name").in_(Expr::list(["carol", "dave"]))),
        )
        .out("Knows", Node::alias("f").optional()),
    );
    assert_eq!(
        social.pairs(&rows, "a", "f"),
        BTreeSet::from([pair("carol", "dave"), pair("dave", "-")])
    );
    let dave = rows
        .iter()
        .find(|row| social.name_of(row.property("a")) == "dave")
        .unwrap();
    assert_eq!(dave.property("f"), Some(&Value::Null));
}

#[test]
fn patterns_view_deduplicates_per_pattern() {
    let social = setup_social();
    let builder = || {
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", "f")
            .pattern(Node::class("City").named("c").filter(named("Rome")))
    };
    assert_eq!(social.run(builder().return_matches()).len(), 2);
    let rows = social.run(builder().return_patterns());
    assert_eq!(rows.len(), 3);
    let cities: Vec<_> = rows.iter().filter(|row| row.property("c").is_some()).collect();
    assert_eq!(cities.len(), 1);
    assert!(cities[0].property("a").is_none());
}

#[test]
fn paths_view_grows_alias_by_alias() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", "f")
            .return_paths(),
    );
    assert_eq!(rows.len(), 4);
    let (full, partial): (Vec<_>, Vec<_>) =
        rows.iter().partition(|row| row.property_names().count() == 2);
    assert_eq!(full.len(), 2);
    assert_eq!(partial.len(), 2);
    assert!(full
        .iter()
        .all(|row| row.property("a").is_some() && row.property("f").is_some()));
}

#[test]
fn elements_views_flatten_bound_records() {
    let social = setup_social();
    let builder = || {
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", Node::new())
            .out("Knows", "g")
    };
    let matches = social.run(builder());
    assert_eq!(matches.len(), 2);
    assert!(matches
        .iter()
        .all(|row| row.property_names().collect::<Vec<_>>() == vec!["a", "g"]));

    let elements = social.run(builder().return_elements());
    assert_eq!(elements.len(), 4);
    assert!(elements.iter().all(ResultRow::is_element));

    let with_hidden = social.run(builder().return_path_elements());
    assert_eq!(with_hidden.len(), 6);

    let distinct = social.run(builder().return_path_elements().distinct());
    let names: BTreeSet<_> = distinct
        .iter()
        .map(|row| row.attribute("name").as_str().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(
        names,
        BTreeSet::from(["alice", "bob", "carol", "dave"].map(str::to_owned))
    );
}

#[test]
fn empty_entry_class_short_circuits() {
    let social = setup_social();
    social.store.create_vertex_class("Ghost").unwrap();
    let statement: Statement = QueryBuilder::r#match(Node::class("Ghost").named("g"))
        .out("Knows", "f")
        .build()
        .unwrap()
        .into();
    let plan = social.executor.explain(&statement).unwrap();
    assert!(plan.contains_step("Empty"));
    let rows = social
        .executor
        .execute(&statement, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn distinct_order_and_limit_apply_after_return() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", "f")
            .returning([(Expr::field("f").member("name"), "friend")])
            .distinct()
            .order_by(OrderItem::asc(Expr::field("friend")))
            .skip(1)
            .limit(1),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("friend"), Value::from("carol"));
}

/// Gateway wrapper counting data reads, to show planning never touches records.
struct CountingGateway {
    inner: Arc<MemoryStore>,
    reads: AtomicUsize,
    /// Index metadata requests, one per planned class source.
    plans: AtomicUsize,
}

impl CountingGateway {
    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl MetadataProvider for CountingGateway {
    fn class(&self, name: &str) -> Result<Option<ClassDef>> {
        self.inner.class(name)
    }

    fn class_indexes(&self, class: &str) -> Result<Vec<IndexDef>> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        self.inner.class_indexes(class)
    }

    fn index(&self, name: &str) -> Result<Option<IndexDef>> {
        self.inner.index(name)
    }

    fn class_of_cluster(&self, cluster: ClusterId) -> Result<Option<String>> {
        self.inner.class_of_cluster(cluster)
    }

    fn count_class(&self, name: &str, polymorphic: bool) -> Result<u64> {
        self.inner.count_class(name, polymorphic)
    }

    fn is_subclass_of(&self, class: &str, ancestor: &str) -> Result<bool> {
        self.inner.is_subclass_of(class, ancestor)
    }
}

impl Gateway for CountingGateway {
    fn scan_class(&self, class: &str, polymorphic: bool) -> Result<BoxIdStream> {
        self.read();
        self.inner.scan_class(class, polymorphic)
    }

    fn scan_cluster(&self, cluster: ClusterId) -> Result<BoxIdStream> {
        self.read();
        self.inner.scan_cluster(cluster)
    }

    fn lookup_index(
        &self,
        index: &str,
        predicate: &IndexPredicate,
        order: ScanOrder,
    ) -> Result<BoxIdStream> {
        self.read();
        self.inner.lookup_index(index, predicate, order)
    }

    fn fetch(&self, id: RecordId) -> Result<Option<Record>> {
        self.read();
        self.inner.fetch(id)
    }

    fn save(&self, record: Record) -> Result<RecordId> {
        self.inner.save(record)
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.inner.delete(id)
    }

    fn edges(
        &self,
        vertex: RecordId,
        direction: Direction,
        labels: &[String],
    ) -> Result<Vec<Neighbor>> {
        self.read();
        self.inner.edges(vertex, direction, labels)
    }

    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

fn planning_error(builder: MatchBuilder) -> (PlanningError, usize) {
    let social = setup_social();
    let gateway = Arc::new(CountingGateway {
        inner: social.store.clone(),
        reads: AtomicUsize::new(0),
        plans: AtomicUsize::new(0),
    });
    let executor = Executor::new(gateway.clone() as Arc<dyn Gateway>);
    let err = builder
        .execute(&executor, Params::new())
        .err()
        .expect("statement should be rejected");
    match err {
        PenumbraError::Planning(planning) => (planning, gateway.reads.load(Ordering::SeqCst)),
        other => panic!("expected a planning error, got {other}"),
    }
}

#[test]
fn undefined_alias_is_rejected_before_any_read() {
    let (err, reads) = planning_error(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out(
                "Knows",
                Node::alias("f").filter(Expr::field("age").gt(Expr::matched("zed").member("age"))),
            ),
    );
    assert!(matches!(err, PlanningError::UndefinedAlias { ref alias, .. } if alias == "zed"));
    assert_eq!(reads, 0);
}

#[test]
fn circular_alias_dependencies_are_rejected_before_any_read() {
    let (err, reads) = planning_error(
        QueryBuilder::r#match(
            Node::class("Person")
                .named("a")
                .filter(Expr::field("age").lt(Expr::matched("b").member("age"))),
        )
        .out(
            "Knows",
            Node::alias("b").filter(Expr::field("age").lt(Expr::matched("a").member("age"))),
        ),
    );
    let cycle = match err {
        PlanningError::CircularDependency { cycle } => cycle,
        other => panic!("expected a cycle, got {other}"),
    };
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.contains(&"a".to_owned()) && cycle.contains(&"b".to_owned()));
    assert_eq!(reads, 0);
}

#[test]
fn not_pattern_must_reference_bound_aliases() {
    let (err, reads) = planning_error(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", "f")
            .not_pattern("nobody")
            .out("Knows", "f"),
    );
    assert_eq!(err.code(), "UndefinedAlias");
    assert_eq!(reads, 0);
}

#[test]
fn unknown_pattern_class_is_rejected() {
    let (err, reads) = planning_error(QueryBuilder::r#match(Node::class("Dragon").named("d")));
    assert_eq!(err.code(), "UnknownClass");
    assert_eq!(reads, 0);
}

#[test]
fn friend_of_friend_through_both_directions() {
    let store = Arc::new(MemoryStore::new());
    store.create_vertex_class("Person").unwrap();
    store.create_edge_class("Friend").unwrap();
    let people: Vec<_> = (1..=6)
        .map(|i| {
            store
                .insert(Record::new("Person").with_property("name", format!("n{i}")))
                .unwrap()
        })
        .collect();
    for (from, to) in [(1, 2), (1, 3), (2, 4), (4, 5), (4, 6)] {
        store
            .create_edge("Friend", people[from - 1], people[to - 1])
            .unwrap();
    }
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let rows = QueryBuilder::r#match(Node::class("Person").filter(named("n1")))
        .both("Friend", "friend")
        .both("Friend", Node::new().filter(named("n4")))
        .returning([(Expr::field("friend").member("name"), "name")])
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("name"), Value::from("n2"));
}

#[test]
fn optional_miss_projects_null_members() {
    let social = setup_social();
    let rows = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("NonExistingEdge", Node::alias("b").optional())
            .returning([
                (Expr::field("a").member("name"), "who"),
                (Expr::field("b").member("name"), "other"),
            ]),
    );
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row.attribute("other") == Value::Null));
}

#[test]
fn pattern_declaration_order_does_not_change_results() {
    let social = setup_social();
    let older = || {
        Node::alias("f").filter(Expr::field("age").gt(Expr::matched("a").member("age")))
    };
    let forward = social.run(
        QueryBuilder::r#match(Node::class("Person").named("a"))
            .out("Knows", older())
            .pattern("f")
            .out("LivesIn", Node::class("City").named("c")),
    );
    let backward = social.run(
        QueryBuilder::r#match(Node::alias("f"))
            .out("LivesIn", Node::class("City").named("c"))
            .pattern(Node::class("Person").named("a"))
            .out("Knows", older()),
    );
    assert_eq!(forward.len(), backward.len());
    assert_eq!(social.pairs(&forward, "a", "f"), social.pairs(&backward, "a", "f"));
    assert_eq!(social.pairs(&forward, "f", "c"), social.pairs(&backward, "f", "c"));
}

#[test]
fn dependent_roots_are_planned_once_per_execution() {
    let social = setup_social();
    let gateway = Arc::new(CountingGateway {
        inner: social.store.clone(),
        reads: AtomicUsize::new(0),
        plans: AtomicUsize::new(0),
    });
    let executor = Executor::new(gateway.clone() as Arc<dyn Gateway>);
    let rows = QueryBuilder::r#match(Node::class("Person").named("a"))
        .pattern(
            Node::class("Person")
                .named("b")
                .filter(Expr::field("age").gt(Expr::matched("a").member("age"))),
        )
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(
        social.pairs(&rows, "a", "b"),
        BTreeSet::from([
            pair("alice", "carol"),
            pair("bob", "alice"),
            pair("bob", "carol"),
            pair("dave", "alice"),
            pair("dave", "bob"),
            pair("dave", "carol"),
        ])
    );
    // `b` is reopened for each of the four people bound to `a`
    assert_eq!(gateway.plans.load(Ordering::SeqCst), 2);
}

#[test]
fn patterns_view_dedup_counts_against_the_heap_limit() {
    let social = setup_social();
    let capped = |limit: usize| {
        Executor::new(social.store.clone() as Arc<dyn Gateway>)
            .with_config(ExecutionConfig::default().with_max_heap_elements(Some(limit)))
    };
    let builder = || {
        QueryBuilder::r#match(Node::class("Person").named("a").filter(named("alice")))
            .out("Knows", "f")
            .return_patterns()
    };
    let err = builder()
        .execute(&capped(1), Params::new())
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert!(
        matches!(
            err,
            PenumbraError::ResourceLimitExceeded {
                operator: "MatchPatterns",
                limit: 1
            }
        ),
        "{err}"
    );
    let rows = builder()
        .execute(&capped(2), Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);
}
