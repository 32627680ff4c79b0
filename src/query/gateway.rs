//! Record and index access contract consumed by the execution pipeline.
//!
//! Steps never touch storage structures; every read, write and transaction
//! boundary goes through a [`Gateway`]. Scans and index lookups hand back
//! ordered id streams that are pulled lazily, one id at a time.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::query::metadata::MetadataProvider;
use crate::query::value::Value;
use crate::types::{ClusterId, RecordId, Result};

/// A stored record as exchanged with the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Identity; `None` for a record that has not been saved yet.
    pub id: Option<RecordId>,
    pub class: String,
    /// Version observed when the record was read; checked on save.
    pub version: u32,
    pub props: BTreeMap<String, Value>,
}

impl Record {
    /// New unsaved record of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            id: None,
            class: class.into(),
            version: 0,
            props: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }
}

/// Lazily pulled stream of record ids.
pub trait IdStream {
    /// Returns the next id, or `None` once exhausted.
    fn next_id(&mut self) -> Result<Option<RecordId>>;
}

/// Boxed id stream handed out by the gateway.
pub type BoxIdStream = Box<dyn IdStream>;

/// Id stream over a pre-computed list.
pub struct VecIdStream {
    ids: std::vec::IntoIter<RecordId>,
}

impl VecIdStream {
    pub fn new(ids: Vec<RecordId>) -> Self {
        Self {
            ids: ids.into_iter(),
        }
    }

    pub fn boxed(ids: Vec<RecordId>) -> BoxIdStream {
        Box::new(Self::new(ids))
    }
}

impl IdStream for VecIdStream {
    fn next_id(&mut self) -> Result<Option<RecordId>> {
        Ok(self.ids.next())
    }
}

/// Predicate understood by index lookups. Keys are composite: one value per
/// indexed field, in index field order.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexPredicate {
    /// Full key equality.
    Equals(Vec<Value>),
    /// Leading fields equal to the given prefix.
    Prefix(Vec<Value>),
    /// Leading fields equal to `prefix`, next field within the bounds.
    Range {
        prefix: Vec<Value>,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    /// Single-field key equal to any of the values.
    ContainsAny(Vec<Value>),
    /// Map key index contains the key.
    ContainsKey(Value),
    /// Map value index contains the value.
    ContainsValue(Value),
}

impl IndexPredicate {
    /// Whole-index scan in key order.
    pub fn all() -> Self {
        IndexPredicate::Range {
            prefix: Vec::new(),
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Short operator label for explain output.
    pub fn label(&self) -> &'static str {
        match self {
            IndexPredicate::Equals(_) => "equals",
            IndexPredicate::Prefix(_) => "prefix",
            IndexPredicate::Range { .. } => "range",
            IndexPredicate::ContainsAny(_) => "containsAny",
            IndexPredicate::ContainsKey(_) => "containsKey",
            IndexPredicate::ContainsValue(_) => "containsValue",
        }
    }
}

/// Key order of an index lookup.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ScanOrder {
    #[default]
    Ascending,
    Descending,
}

/// Edge direction relative to a vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }
}

/// An incident edge and the vertex on its other end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Neighbor {
    pub edge: RecordId,
    pub vertex: RecordId,
}

/// Storage, index and transaction access used by every step.
pub trait Gateway: MetadataProvider {
    /// Scans a class, including subclasses when `polymorphic`.
    fn scan_class(&self, class: &str, polymorphic: bool) -> Result<BoxIdStream>;
    /// Scans one cluster in storage order.
    fn scan_cluster(&self, cluster: ClusterId) -> Result<BoxIdStream>;
    /// Looks up an index; ids come back in key order.
    fn lookup_index(
        &self,
        index: &str,
        predicate: &IndexPredicate,
        order: ScanOrder,
    ) -> Result<BoxIdStream>;
    /// Fetches a record; `None` when it does not exist.
    fn fetch(&self, id: RecordId) -> Result<Option<Record>>;
    /// Inserts a new record or updates an existing one, returning its id.
    fn save(&self, record: Record) -> Result<RecordId>;
    /// Deletes a record.
    fn delete(&self, id: RecordId) -> Result<()>;
    /// Edges incident to a vertex whose class matches one of `labels`
    /// (any edge class when empty).
    fn edges(&self, vertex: RecordId, direction: Direction, labels: &[String])
        -> Result<Vec<Neighbor>>;
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    /// True while a transaction opened by [`Gateway::begin`] is active.
    fn in_transaction(&self) -> bool;
}
