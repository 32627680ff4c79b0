//! Ordered in-memory secondary indexes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rustc_hash::FxHashSet;

use crate::query::gateway::{IndexPredicate, Record, ScanOrder};
use crate::query::metadata::{IndexBy, IndexDef};
use crate::query::value::Value;
use crate::types::RecordId;

/// Composite key: one value per indexed field.
pub(crate) type IndexKey = Vec<Value>;

#[derive(Clone, Debug)]
pub(crate) struct MemoryIndex {
    pub def: IndexDef,
    entries: BTreeMap<IndexKey, BTreeSet<RecordId>>,
}

impl MemoryIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    /// Keys a record contributes. A list or map contributes one key per
    /// element plus one for the whole value (an empty list is also indexed
    /// as null); map indexes contribute one key per map key or map value.
    ///
    /// Element keys make a value index a superset for equality and range
    /// terms: the planner always re-checks those terms on the fetched rows.
    pub fn keys_of(&self, record: &Record) -> Vec<IndexKey> {
        match self.def.by {
            IndexBy::Value => {
                let mut keys: Vec<IndexKey> = vec![Vec::with_capacity(self.def.fields.len())];
                for field in &self.def.fields {
                    let parts: Vec<Value> = match record.get(field) {
                        Some(value @ Value::List(items)) if items.is_empty() => {
                            vec![Value::Null, value.clone()]
                        }
                        Some(value @ (Value::List(_) | Value::Map(_) | Value::Embedded(_))) => {
                            let mut parts: Vec<Value> =
                                value.elements().into_iter().map(canonical).collect();
                            parts.push(value.clone());
                            parts
                        }
                        Some(value) => vec![canonical(value)],
                        None => vec![Value::Null],
                    };
                    keys = keys
                        .into_iter()
                        .flat_map(|key| {
                            parts.iter().map(move |part| {
                                let mut key = key.clone();
                                key.push(part.clone());
                                key
                            })
                        })
                        .collect();
                }
                keys.sort();
                keys.dedup();
                keys
            }
            IndexBy::Key | IndexBy::MapValue => {
                let Some(field) = self.def.fields.first() else {
                    return Vec::new();
                };
                let Some(Value::Map(map) | Value::Embedded(map)) = record.get(field) else {
                    return Vec::new();
                };
                let mut keys: Vec<IndexKey> = if self.def.by == IndexBy::Key {
                    map.keys().map(|key| vec![Value::String(key.clone())]).collect()
                } else {
                    map.values().map(|value| vec![canonical(value)]).collect()
                };
                keys.sort();
                keys.dedup();
                keys
            }
        }
    }

    /// Records other than `id` already holding one of `keys`. Keys with a
    /// null component never conflict.
    pub fn conflict<'a>(&self, keys: &'a [IndexKey], id: Option<RecordId>) -> Option<&'a IndexKey> {
        keys.iter()
            .filter(|key| !key.iter().any(Value::is_null))
            .find(|key| {
                self.entries
                    .get(*key)
                    .is_some_and(|ids| ids.iter().any(|existing| Some(*existing) != id))
            })
    }

    pub fn insert(&mut self, keys: Vec<IndexKey>, id: RecordId) {
        for key in keys {
            self.entries.entry(key).or_default().insert(id);
        }
    }

    pub fn remove(&mut self, keys: &[IndexKey], id: RecordId) {
        for key in keys {
            if let Some(ids) = self.entries.get_mut(key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }

    /// Ids matching `predicate`, in key order. A record reachable through
    /// several keys is reported once, at its first key.
    pub fn lookup(&self, predicate: &IndexPredicate, order: ScanOrder) -> Vec<RecordId> {
        let mut hits: Vec<&BTreeSet<RecordId>> = self
            .candidates(predicate)
            .into_iter()
            .filter(|(key, _)| key_matches(predicate, key))
            .map(|(_, ids)| ids)
            .collect();
        let ids: Vec<RecordId> = match order {
            ScanOrder::Ascending => hits.into_iter().flat_map(|ids| ids.iter().copied()).collect(),
            ScanOrder::Descending => {
                hits.reverse();
                hits.into_iter()
                    .flat_map(|ids| ids.iter().rev().copied())
                    .collect()
            }
        };
        let mut seen = FxHashSet::default();
        ids.into_iter().filter(|id| seen.insert(*id)).collect()
    }

    /// Entries visited for `predicate`, ascending. Every seek starts at the
    /// lowest key that can match and stops at the first key past the
    /// predicate's region.
    fn candidates(&self, predicate: &IndexPredicate) -> Vec<(&IndexKey, &BTreeSet<RecordId>)> {
        match predicate {
            IndexPredicate::Equals(want) | IndexPredicate::Prefix(want) => self.seek(want),
            IndexPredicate::Range {
                prefix,
                lower,
                upper,
            } => {
                let prefix: IndexKey = prefix.iter().map(canonical).collect();
                let mut start = prefix.clone();
                if let Bound::Included(limit) | Bound::Excluded(limit) = lower {
                    start.push(canonical(limit));
                }
                let lower = lower.as_ref().map(canonical);
                let upper = upper.as_ref().map(canonical);
                self.walk(start, |key| {
                    past_prefix(key, &prefix)
                        || key
                            .get(prefix.len())
                            .is_some_and(|part| past_range(part, &lower, &upper))
                })
            }
            IndexPredicate::ContainsAny(values) => {
                let mut wanted: Vec<Value> = values.iter().map(canonical).collect();
                wanted.sort();
                wanted.dedup();
                wanted
                    .iter()
                    .flat_map(|value| self.seek(std::slice::from_ref(value)))
                    .collect()
            }
            IndexPredicate::ContainsKey(want) | IndexPredicate::ContainsValue(want) => {
                self.seek(std::slice::from_ref(want))
            }
        }
    }

    /// Entries whose leading fields equal `prefix`.
    fn seek(&self, prefix: &[Value]) -> Vec<(&IndexKey, &BTreeSet<RecordId>)> {
        let prefix: IndexKey = prefix.iter().map(canonical).collect();
        self.walk(prefix.clone(), |key| past_prefix(key, &prefix))
    }

    fn walk(
        &self,
        start: IndexKey,
        done: impl Fn(&IndexKey) -> bool,
    ) -> Vec<(&IndexKey, &BTreeSet<RecordId>)> {
        self.entries
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| !done(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }
}

/// Integral floats are stored as integers so numerically equal keys share
/// one slot and key order agrees with predicate equality.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Float(f) if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(f) => {
            Value::Int(*f as i64)
        }
        other => other.clone(),
    }
}

fn past_prefix(key: &[Value], prefix: &[Value]) -> bool {
    let lead = &key[..prefix.len().min(key.len())];
    lead.cmp(prefix) == Ordering::Greater
}

/// True once `part` sorts after every value the bounds admit. Without an
/// upper bound the walk ends where values stop being comparable with the
/// lower one.
fn past_range(part: &Value, lower: &Bound<Value>, upper: &Bound<Value>) -> bool {
    match (lower, upper) {
        (_, Bound::Included(limit) | Bound::Excluded(limit)) => part.cmp(limit) == Ordering::Greater,
        (Bound::Included(limit) | Bound::Excluded(limit), Bound::Unbounded) => {
            part.cmp(limit) == Ordering::Greater && part.compare(limit).is_err()
        }
        (Bound::Unbounded, Bound::Unbounded) => false,
    }
}

fn starts_with(key: &[Value], prefix: &[Value]) -> bool {
    key.len() >= prefix.len() && key.iter().zip(prefix).all(|(part, want)| part.equals(want))
}

fn within(value: &Value, bound: &Bound<Value>, accept: fn(Ordering) -> bool) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(limit) => {
            matches!(value.compare(limit), Ok(Some(ord)) if ord == Ordering::Equal || accept(ord))
        }
        Bound::Excluded(limit) => matches!(value.compare(limit), Ok(Some(ord)) if accept(ord)),
    }
}

fn key_matches(predicate: &IndexPredicate, key: &[Value]) -> bool {
    match predicate {
        IndexPredicate::Equals(want) => key.len() == want.len() && starts_with(key, want),
        IndexPredicate::Prefix(prefix) => starts_with(key, prefix),
        IndexPredicate::Range {
            prefix,
            lower,
            upper,
        } => {
            if !starts_with(key, prefix) {
                return false;
            }
            let Some(part) = key.get(prefix.len()) else {
                return true;
            };
            if matches!((lower, upper), (Bound::Unbounded, Bound::Unbounded)) {
                return true;
            }
            within(part, lower, Ordering::is_gt) && within(part, upper, Ordering::is_lt)
        }
        IndexPredicate::ContainsAny(values) => key
            .first()
            .is_some_and(|part| values.iter().any(|value| part.equals(value))),
        IndexPredicate::ContainsKey(want) | IndexPredicate::ContainsValue(want) => {
            key.first().is_some_and(|part| part.equals(want))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::metadata::IndexKind;

    fn index(fields: &[&str], by: IndexBy) -> MemoryIndex {
        MemoryIndex::new(IndexDef {
            name: "idx".into(),
            class: "Person".into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            kind: IndexKind::NotUnique,
            by,
        })
    }

    fn rid(position: i64) -> RecordId {
        RecordId::new(10, position)
    }

    #[test]
    fn list_fields_are_indexed_per_element() {
        let idx = index(&["tags"], IndexBy::Value);
        let record = Record::new("Person").with_property(
            "tags",
            Value::List(vec!["a".into(), "b".into(), "a".into()]),
        );
        assert_eq!(
            idx.keys_of(&record),
            vec![
                vec![Value::from("a")],
                vec![Value::from("b")],
                vec![Value::List(vec!["a".into(), "b".into(), "a".into()])],
            ]
        );
        let empty = Record::new("Person").with_property("tags", Value::List(Vec::new()));
        assert_eq!(
            idx.keys_of(&empty),
            vec![vec![Value::Null], vec![Value::List(Vec::new())]]
        );
    }

    #[test]
    fn range_skips_nulls_and_other_types() {
        let mut idx = index(&["age"], IndexBy::Value);
        idx.insert(vec![vec![Value::Null]], rid(0));
        idx.insert(vec![vec![Value::Int(30)]], rid(1));
        idx.insert(vec![vec![Value::Float(41.5)]], rid(2));
        idx.insert(vec![vec![Value::from("x")]], rid(3));
        let predicate = IndexPredicate::Range {
            prefix: Vec::new(),
            lower: Bound::Excluded(Value::Int(20)),
            upper: Bound::Unbounded,
        };
        assert_eq!(idx.lookup(&predicate, ScanOrder::Ascending), vec![rid(1), rid(2)]);
        assert_eq!(idx.lookup(&predicate, ScanOrder::Descending), vec![rid(2), rid(1)]);
        assert_eq!(idx.lookup(&IndexPredicate::all(), ScanOrder::Ascending).len(), 4);
    }

    #[test]
    fn composite_prefix_and_dedup() {
        let mut idx = index(&["last", "tags"], IndexBy::Value);
        let record = Record::new("Person")
            .with_property("last", "Smith")
            .with_property("tags", Value::List(vec!["a".into(), "b".into()]));
        idx.insert(idx.keys_of(&record), rid(4));
        let prefix = IndexPredicate::Prefix(vec!["Smith".into()]);
        assert_eq!(idx.lookup(&prefix, ScanOrder::Ascending), vec![rid(4)]);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn null_keys_never_conflict() {
        let mut idx = index(&["email"], IndexBy::Value);
        idx.insert(vec![vec![Value::Null]], rid(0));
        assert!(idx.conflict(&[vec![Value::Null]], Some(rid(1))).is_none());
        idx.insert(vec![vec![Value::from("a@x")]], rid(0));
        assert!(idx.conflict(&[vec![Value::from("a@x")]], Some(rid(1))).is_some());
        assert!(idx.conflict(&[vec![Value::from("a@x")]], Some(rid(0))).is_none());
    }

    #[test]
    fn seeks_visit_only_the_matching_region() {
        let mut idx = index(&["city", "age"], IndexBy::Value);
        let cities = ["Athens", "Berlin", "Oslo", "Paris", "Rome"];
        for (n, city) in cities.iter().enumerate() {
            for age in 0..20i64 {
                let record = Record::new("Person")
                    .with_property("city", *city)
                    .with_property("age", age);
                idx.insert(idx.keys_of(&record), rid((n * 100 + age as usize) as i64));
            }
        }

        let prefix = IndexPredicate::Prefix(vec!["Oslo".into()]);
        assert_eq!(idx.candidates(&prefix).len(), 20);
        assert_eq!(idx.lookup(&prefix, ScanOrder::Ascending).len(), 20);

        let exact = IndexPredicate::Equals(vec!["Paris".into(), Value::Int(7)]);
        assert_eq!(idx.candidates(&exact).len(), 1);
        assert_eq!(idx.lookup(&exact, ScanOrder::Ascending), vec![rid(307)]);

        let range = IndexPredicate::Range {
            prefix: vec!["Berlin".into()],
            lower: Bound::Included(Value::Int(5)),
            upper: Bound::Excluded(Value::Int(9)),
        };
        assert!(idx.candidates(&range).len() <= 5);
        assert_eq!(
            idx.lookup(&range, ScanOrder::Descending),
            vec![rid(108), rid(107), rid(106), rid(105)]
        );

        let any = IndexPredicate::ContainsAny(vec!["Rome".into(), "Athens".into()]);
        assert_eq!(idx.candidates(&any).len(), 40);
    }

    #[test]
    fn integral_floats_share_the_integer_slot() {
        let mut idx = index(&["score"], IndexBy::Value);
        let float = Record::new("Person").with_property("score", Value::Float(3.0));
        idx.insert(idx.keys_of(&float), rid(0));
        idx.insert(vec![vec![Value::Int(3)]], rid(1));
        idx.insert(vec![vec![Value::Float(3.5)]], rid(2));
        assert_eq!(idx.keys_of(&float), vec![vec![Value::Int(3)]]);
        let equals = IndexPredicate::Equals(vec![Value::Float(3.0)]);
        assert_eq!(idx.lookup(&equals, ScanOrder::Ascending), vec![rid(0), rid(1)]);
        assert!(idx.conflict(&[vec![Value::Int(3)]], Some(rid(1))).is_some());
    }
}
