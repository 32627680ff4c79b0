use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use penumbra::query::ast::{Expr, OrderItem, Statement, Target};
use penumbra::query::gateway::{Gateway, Record};
use penumbra::query::metadata::{IndexBy, IndexKind};
use penumbra::query::Params;
use penumbra::storage::MemoryStore;
use penumbra::{Executor, QueryBuilder, ResultRow, Value};

fn store_with(values: &[i64], indexed: bool) -> Executor {
    let store = Arc::new(MemoryStore::new());
    store.create_class("Item", &[]).unwrap();
    for (seq, value) in values.iter().enumerate() {
        store
            .insert(
                Record::new("Item")
                    .with_property("seq", seq as i64)
                    .with_property("value", *value),
            )
            .unwrap();
    }
    if indexed {
        store
            .create_index("Item.value", "Item", &["value"], IndexKind::NotUnique, IndexBy::Value)
            .unwrap();
    }
    Executor::new(store as Arc<dyn Gateway>)
}

/// A field value that is either a scalar or a short list of small ints.
fn arb_field() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..4).prop_map(Value::Int),
        prop::collection::vec(0i64..4, 0..3)
            .prop_map(|items| Value::List(items.into_iter().map(Value::Int).collect())),
    ]
}

fn store_of(fields: &[Value], indexed: bool) -> Executor {
    let store = Arc::new(MemoryStore::new());
    store.create_class("Item", &[]).unwrap();
    for (seq, value) in fields.iter().enumerate() {
        store
            .insert(
                Record::new("Item")
                    .with_property("seq", seq as i64)
                    .with_property("value", value.clone()),
            )
            .unwrap();
    }
    if indexed {
        store
            .create_index("Item.value", "Item", &["value"], IndexKind::NotUnique, IndexBy::Value)
            .unwrap();
    }
    Executor::new(store as Arc<dyn Gateway>)
}

fn collect(executor: &Executor, statement: Statement) -> Vec<ResultRow> {
    executor
        .execute(&statement, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap()
}

fn ints(rows: &[ResultRow], field: &str) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| row.property(field).and_then(Value::as_i64))
        .collect()
}

fn arb_values() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-20i64..20, 0..40)
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Bound {
    fn expr(self, pivot: i64) -> Expr {
        let field = Expr::field("value");
        match self {
            Bound::Lt => field.lt(pivot),
            Bound::Le => field.le(pivot),
            Bound::Gt => field.gt(pivot),
            Bound::Ge => field.ge(pivot),
            Bound::Eq => field.eq(pivot),
        }
    }

    fn holds(self, value: i64, pivot: i64) -> bool {
        match self {
            Bound::Lt => value < pivot,
            Bound::Le => value <= pivot,
            Bound::Gt => value > pivot,
            Bound::Ge => value >= pivot,
            Bound::Eq => value == pivot,
        }
    }
}

fn arb_bound() -> impl Strategy<Value = Bound> {
    prop_oneof![
        Just(Bound::Lt),
        Just(Bound::Le),
        Just(Bound::Gt),
        Just(Bound::Ge),
        Just(Bound::Eq),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn index_lookup_agrees_with_a_scan(
        values in arb_values(),
        bound in arb_bound(),
        pivot in -25i64..25,
    ) {
        let statement = || -> Statement {
            QueryBuilder::select_from("Item")
                .filter(bound.expr(pivot))
                .build()
                .unwrap()
                .into()
        };
        let indexed = store_with(&values, true);
        prop_assert!(indexed.explain(&statement()).unwrap().contains_step("FetchFromIndex"));
        let mut via_index = ints(&collect(&indexed, statement()), "seq");
        via_index.sort_unstable();

        let scanned = store_with(&values, false);
        let mut via_scan = ints(&collect(&scanned, statement()), "seq");
        via_scan.sort_unstable();

        let expected: Vec<i64> = values
            .iter()
            .enumerate()
            .filter(|(_, value)| bound.holds(**value, pivot))
            .map(|(seq, _)| seq as i64)
            .collect();
        prop_assert_eq!(&via_index, &expected);
        prop_assert_eq!(&via_scan, &expected);
    }

    #[test]
    fn list_valued_fields_agree_with_a_scan(
        fields in prop::collection::vec(arb_field(), 0..20),
        op in 0usize..4,
        pivot in 0i64..4,
    ) {
        let predicate = match op {
            0 => Expr::field("value").eq(pivot),
            1 => Expr::field("value").in_(Expr::list([pivot, pivot + 1])),
            2 => Expr::field("value").contains(pivot),
            _ => Expr::field("value").contains_any(Expr::list([pivot, pivot + 1])),
        };
        let statement = || -> Statement {
            QueryBuilder::select_from("Item")
                .filter(predicate.clone())
                .build()
                .unwrap()
                .into()
        };
        let indexed = store_of(&fields, true);
        prop_assert!(indexed.explain(&statement()).unwrap().contains_step("FetchFromIndex"));
        let mut via_index = ints(&collect(&indexed, statement()), "seq");
        via_index.sort_unstable();
        let mut via_scan = ints(&collect(&store_of(&fields, false), statement()), "seq");
        via_scan.sort_unstable();
        prop_assert_eq!(via_index, via_scan);
    }

    #[test]
    fn inserted_rows_read_back_unchanged(values in arb_values()) {
        let store = Arc::new(MemoryStore::new());
        store.create_class("Item", &[]).unwrap();
        let executor = Executor::new(store.clone() as Arc<dyn Gateway>);
        store.begin().unwrap();
        if !values.is_empty() {
            let insert: Statement = values
                .iter()
                .enumerate()
                .fold(QueryBuilder::insert_into("Item"), |insert, (seq, value)| {
                    insert.values(["seq", "value"], [seq as i64, *value])
                })
                .build()
                .unwrap()
                .into();
            let inserted = collect(&executor, insert);
            prop_assert_eq!(inserted.len(), values.len());
        }
        store.commit().unwrap();

        let mut read: Vec<(i64, i64)> = collect(
            &executor,
            QueryBuilder::select_from("Item").build().unwrap().into(),
        )
        .iter()
        .map(|row| {
            (
                row.property("seq").and_then(Value::as_i64).unwrap(),
                row.property("value").and_then(Value::as_i64).unwrap(),
            )
        })
        .collect();
        read.sort_unstable();
        let expected: Vec<(i64, i64)> = values
            .iter()
            .enumerate()
            .map(|(seq, value)| (seq as i64, *value))
            .collect();
        prop_assert_eq!(read, expected);
    }

    #[test]
    fn top_k_matches_sort_then_truncate(
        values in arb_values(),
        descending in any::<bool>(),
        skip in 0usize..5,
        limit in 0usize..10,
    ) {
        let executor = store_with(&values, false);
        let key = Expr::field("value");
        let order = if descending { OrderItem::desc(key) } else { OrderItem::asc(key) };
        let statement: Statement = QueryBuilder::select(Target::class("Item"))
            .order_by(order)
            .skip(skip as i64)
            .limit(limit as i64)
            .build()
            .unwrap()
            .into();
        let got = ints(&collect(&executor, statement), "value");

        let mut expected = values.clone();
        expected.sort_unstable();
        if descending {
            expected.reverse();
        }
        let expected: Vec<i64> = expected.into_iter().skip(skip).take(limit).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn distinct_projection_counts_unique_values(values in arb_values()) {
        let executor = store_with(&values, true);
        let statement: Statement = QueryBuilder::select_from("Item")
            .project(["value"])
            .distinct()
            .build()
            .unwrap()
            .into();
        let got: BTreeSet<i64> = ints(&collect(&executor, statement.clone()), "value")
            .into_iter()
            .collect();
        let rows = collect(&executor, statement);
        let expected: BTreeSet<i64> = values.iter().copied().collect();
        prop_assert_eq!(rows.len(), expected.len());
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn count_star_matches_the_filtered_size(
        values in arb_values(),
        pivot in -25i64..25,
    ) {
        let executor = store_with(&values, true);
        let statement: Statement = QueryBuilder::select_from("Item")
            .filter(Expr::field("value").ge(pivot))
            .project([(Expr::count_star(), "n")])
            .build()
            .unwrap()
            .into();
        let rows = collect(&executor, statement);
        let expected = values.iter().filter(|value| **value >= pivot).count() as i64;
        prop_assert_eq!(rows.len(), 1);
        prop_assert_eq!(rows[0].attribute("n"), Value::Int(expected));
    }
}
