use std::sync::Arc;

use penumbra::query::ast::{Expr, OrderItem, ProjectionItem, Target};
use penumbra::query::gateway::{Gateway, Record};
use penumbra::query::{ExecutionConfig, Params};
use penumbra::storage::MemoryStore;
use penumbra::{Executor, PenumbraError, QueryBuilder, ResultRow, Value};

fn setup_people() -> (Arc<MemoryStore>, Executor) {
    let store = Arc::new(MemoryStore::new());
    store.create_class("Person", &[]).unwrap();
    store.create_class("Employee", &["Person"]).unwrap();
    for (name, age, city) in [
        ("alice", 31, "Rome"),
        ("bob", 25, "Oslo"),
        ("carol", 42, "Rome"),
        ("dave", 25, "Paris"),
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
    store
        .insert(
            Record::new("Employee")
                .with_property("name", "erin")
                .with_property("age", 38)
                .with_property("city", "Oslo"),
        )
        .unwrap();
    let executor = Executor::new(store.clone() as Arc<dyn Gateway>);
    (store, executor)
}

fn strings(rows: &[ResultRow], field: &str) -> Vec<String> {
    rows.iter()
        .map(|row| {
            row.property(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        })
        .collect()
}

fn run(executor: &Executor, builder: penumbra::query::builder::SelectBuilder) -> Vec<ResultRow> {
    builder
        .execute(executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap()
}

#[test]
fn class_target_is_polymorphic_unless_told_otherwise() {
    let (_store, executor) = setup_people();
    let all = run(&executor, QueryBuilder::select_from("Person"));
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(ResultRow::is_element));

    let own = run(
        &executor,
        QueryBuilder::select(Target::Class {
            name: "Person".into(),
            polymorphic: false,
        }),
    );
    assert_eq!(own.len(), 4);
    assert!(own.iter().all(|row| row.class_name() == Some("Person")));
}

#[test]
fn filter_projection_and_alias() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .where_with(|p| {
                p.eq("city", "Rome");
            })
            .project([("name", "who")])
            .order_by(OrderItem::asc(Expr::field("who"))),
    );
    assert_eq!(strings(&rows, "who"), vec!["alice", "carol"]);
    assert!(rows.iter().all(|row| row.property("name").is_none()));
    assert!(rows.iter().all(|row| !row.is_element()));
}

#[test]
fn order_skip_and_limit() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .order_by(OrderItem::desc(Expr::field("age")))
            .skip(1)
            .limit(2),
    );
    assert_eq!(strings(&rows, "name"), vec!["erin", "alice"]);
}

#[test]
fn huge_limit_after_skip_keeps_the_remaining_rows() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .order_by(OrderItem::desc(Expr::field("age")))
            .skip(1)
            .limit(i64::MAX),
    );
    assert_eq!(strings(&rows, "name"), vec!["erin", "alice", "bob", "dave"]);

    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .order_by(OrderItem::asc(Expr::field("name")))
            .skip(i64::MAX)
            .limit(i64::MAX),
    );
    assert!(rows.is_empty());
}

#[test]
fn distinct_projection() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .project(["city"])
            .distinct()
            .order_by(OrderItem::asc(Expr::field("city"))),
    );
    assert_eq!(strings(&rows, "city"), vec!["Oslo", "Paris", "Rome"]);
}

#[test]
fn group_by_with_aggregates() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .project([
                ProjectionItem::new(Expr::field("city")),
                ProjectionItem::aliased(Expr::count_star(), "n"),
                ProjectionItem::aliased(Expr::func("sum", vec![Expr::field("age")]), "total"),
            ])
            .group_by(Expr::field("city"))
            .order_by(OrderItem::asc(Expr::field("city"))),
    );
    assert_eq!(strings(&rows, "city"), vec!["Oslo", "Paris", "Rome"]);
    let counts: Vec<_> = rows.iter().map(|row| row.attribute("n")).collect();
    assert_eq!(counts, vec![Value::Int(2), Value::Int(1), Value::Int(2)]);
    let totals: Vec<_> = rows.iter().map(|row| row.attribute("total")).collect();
    assert_eq!(totals, vec![Value::Int(63), Value::Int(25), Value::Int(73)]);
}

#[test]
fn aggregate_without_rows_still_counts() {
    let (store, executor) = setup_people();
    store.create_class("Empty", &[]).unwrap();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Empty").project([(Expr::count_star(), "n")]),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("n"), Value::Int(0));
}

#[test]
fn select_without_target() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select(Target::None).project([(Expr::lit(1).add(1), "two")]),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("two"), Value::Int(2));
}

#[test]
fn named_parameters() {
    let (_store, executor) = setup_people();
    let mut params = Params::new();
    params.insert("who".into(), Value::from("bob"));
    let rows = QueryBuilder::select_from("Person")
        .filter(Expr::field("name").eq(Expr::param("who")))
        .execute(&executor, params)
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(strings(&rows, "name"), vec!["bob"]);
}

#[test]
fn let_bindings_per_row_and_global() {
    let (_store, executor) = setup_people();
    let rows = run(
        &executor,
        QueryBuilder::select_from("Person")
            .let_expr("twice", Expr::field("age").mul(2))
            .let_query(
                "romans",
                QueryBuilder::select_from("Person")
                    .where_with(|p| {
                        p.eq("city", "Rome");
                    })
                    .build()
                    .unwrap(),
            )
            .filter(Expr::field("name").eq("bob"))
            .project([
                (Expr::var("twice"), "twice"),
                (Expr::func("size", vec![Expr::var("romans")]), "romans"),
            ]),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attribute("twice"), Value::Int(50));
    assert_eq!(rows[0].attribute("romans"), Value::Int(2));
}

#[test]
fn subquery_target() {
    let (_store, executor) = setup_people();
    let inner = QueryBuilder::select_from("Person")
        .filter(Expr::field("age").lt(30))
        .build()
        .unwrap();
    let rows = run(
        &executor,
        QueryBuilder::select(Target::SubQuery(Box::new(inner.into())))
            .project(["name"])
            .order_by(OrderItem::asc(Expr::field("name"))),
    );
    assert_eq!(strings(&rows, "name"), vec!["bob", "dave"]);
}

#[test]
fn comparisons_with_null_are_false() {
    let (store, executor) = setup_people();
    store
        .insert(Record::new("Person").with_property("name", "ghost"))
        .unwrap();
    let young = run(
        &executor,
        QueryBuilder::select_from("Person").filter(Expr::field("age").lt(100)),
    );
    assert_eq!(young.len(), 5);
    let unaged = run(
        &executor,
        QueryBuilder::select_from("Person").where_with(|p| {
            p.is_null("age");
        }),
    );
    assert_eq!(strings(&unaged, "name"), vec!["ghost"]);
}

#[test]
fn ordering_across_types_is_a_type_mismatch() {
    let (store, executor) = setup_people();
    store
        .insert(
            Record::new("Person")
                .with_property("name", "odd")
                .with_property("age", "old"),
        )
        .unwrap();
    let err = QueryBuilder::select_from("Person")
        .filter(Expr::field("age").gt(30))
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert!(matches!(err, PenumbraError::TypeMismatch(_)), "{err}");

    let equal = run(
        &executor,
        QueryBuilder::select_from("Person").filter(Expr::field("age").eq(30)),
    );
    assert!(equal.is_empty());
}

#[test]
fn unknown_class_fails_at_planning() {
    let (_store, executor) = setup_people();
    let err = QueryBuilder::select_from("Nobody")
        .execute(&executor, Params::new())
        .err()
        .unwrap();
    assert!(err.is_planning());
    assert_eq!(err.code(), "UnknownClass");
}

#[test]
fn unbounded_sort_respects_the_heap_limit() {
    let (store, _) = setup_people();
    let executor = Executor::new(store as Arc<dyn Gateway>)
        .with_config(ExecutionConfig::default().with_max_heap_elements(Some(4)));
    let err = QueryBuilder::select_from("Person")
        .order_by(OrderItem::asc(Expr::field("name")))
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert!(matches!(err, PenumbraError::ResourceLimitExceeded { .. }), "{err}");

    let top = QueryBuilder::select_from("Person")
        .order_by(OrderItem::asc(Expr::field("name")))
        .limit(2)
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(strings(&top, "name"), vec!["alice", "bob"]);
}
