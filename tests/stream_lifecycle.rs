use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use penumbra::query::ast::{Expr, OrderItem, Statement};
use penumbra::query::gateway::{Gateway, Record};
use penumbra::query::{ExecutionConfig, Params};
use penumbra::storage::MemoryStore;
use penumbra::{Executor, PenumbraError, QueryBuilder};

fn setup_numbers(count: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_class("Number", &[]).unwrap();
    for value in 0..count {
        store
            .insert(Record::new("Number").with_property("value", value))
            .unwrap();
    }
    store
}

fn numbers() -> Statement {
    QueryBuilder::select_from("Number")
        .order_by(OrderItem::asc(Expr::field("value")))
        .build()
        .unwrap()
        .into()
}

#[test]
fn has_next_then_next_until_exhausted() {
    let store = setup_numbers(3);
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let mut stream = executor.execute(&numbers(), Params::new()).unwrap();
    let mut seen = Vec::new();
    while stream.has_next().unwrap() {
        // has_next peeks without consuming
        assert!(stream.has_next().unwrap());
        seen.push(stream.next().unwrap().attribute("value"));
    }
    assert_eq!(seen.len(), 3);
    assert!(!stream.has_next().unwrap());
    assert!(matches!(stream.next(), Err(PenumbraError::NoSuchElement)));
}

#[test]
fn close_is_idempotent_and_ends_the_stream() {
    let store = setup_numbers(3);
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let mut stream = executor.execute(&numbers(), Params::new()).unwrap();
    assert!(stream.has_next().unwrap());
    stream.close();
    stream.close();
    assert!(stream.is_closed());
    assert!(!stream.has_next().unwrap());
    assert!(matches!(stream.next(), Err(PenumbraError::NoSuchElement)));
}

#[test]
fn rows_iterator_yields_every_row() {
    let store = setup_numbers(4);
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let mut stream = executor.execute(&numbers(), Params::new()).unwrap();
    let values: Vec<_> = stream
        .rows()
        .map(|row| row.map(|row| row.attribute("value")))
        .collect::<penumbra::Result<_>>()
        .unwrap();
    assert_eq!(values.len(), 4);
    assert_eq!(values[3], penumbra::Value::Int(3));
}

#[test]
fn elapsed_timeout_stops_the_command() {
    let store = setup_numbers(3);
    let executor = Executor::new(store.clone() as Arc<dyn Gateway>);
    let err = QueryBuilder::select_from("Number")
        .timeout(Duration::ZERO)
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert!(matches!(err, PenumbraError::Timeout { .. }), "{err}");
    assert_eq!(err.code(), "Timeout");

    let executor = Executor::new(store as Arc<dyn Gateway>)
        .with_config(ExecutionConfig::default().with_timeout(Some(Duration::from_secs(60))));
    let rows = executor
        .execute(&numbers(), Params::new())
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn cancellation_surfaces_at_the_next_pull() {
    let store = setup_numbers(5);
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let cancel = Arc::new(AtomicBool::new(false));
    let statement: Statement = QueryBuilder::select_from("Number").build().unwrap().into();
    let mut stream = executor
        .execute_with_cancel(&statement, Params::new(), cancel.clone())
        .unwrap();
    let first = stream.next().unwrap();
    assert!(first.is_element());
    cancel.store(true, Ordering::SeqCst);
    let err = stream.has_next().unwrap_err();
    assert!(matches!(err, PenumbraError::Cancelled), "{err}");
    stream.close();
    assert!(stream.is_closed());
}

#[test]
fn heap_limit_applies_to_distinct() {
    let store = setup_numbers(6);
    let executor = Executor::new(store as Arc<dyn Gateway>)
        .with_config(ExecutionConfig::default().with_max_heap_elements(Some(3)));
    let err = QueryBuilder::select_from("Number")
        .project(["value"])
        .distinct()
        .execute(&executor, Params::new())
        .unwrap()
        .collect_rows()
        .unwrap_err();
    assert!(
        matches!(err, PenumbraError::ResourceLimitExceeded { limit: 3, .. }),
        "{err}"
    );
}

#[test]
fn explain_and_profile_describe_the_running_plan() {
    let store = setup_numbers(5);
    let executor = Executor::new(store as Arc<dyn Gateway>)
        .with_config(ExecutionConfig::default().with_profiling(true));
    let statement: Statement = QueryBuilder::select_from("Number")
        .filter(Expr::field("value").ge(2))
        .build()
        .unwrap()
        .into();
    let planned = executor.explain(&statement).unwrap();
    let mut stream = executor.execute(&statement, Params::new()).unwrap();
    assert_eq!(stream.explain().step_names(), planned.step_names());
    assert_eq!(
        planned.find("FetchFromClass").unwrap().prop("class"),
        Some("Number")
    );
    assert!(!planned.render().is_empty());

    let count = stream.rows().count();
    assert_eq!(count, 3);
    let profile = stream.profile();
    let fetch = profile.step("FetchFromClass").unwrap();
    assert_eq!(fetch.rows, 5);
    let filter = profile.step("Filter").unwrap();
    assert_eq!(filter.rows, 3);
    assert!(filter.calls >= filter.rows);
}

#[test]
fn profiling_is_off_by_default() {
    let store = setup_numbers(2);
    let executor = Executor::new(store as Arc<dyn Gateway>);
    let mut stream = executor.execute(&numbers(), Params::new()).unwrap();
    assert_eq!(stream.rows().count(), 2);
    assert!(stream.profile().steps.is_empty());
}
