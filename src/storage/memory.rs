//! In-memory store implementing the gateway, schema and transaction
//! contracts. Every class owns one cluster; records live in position order
//! inside it. Edges are records of `E` subclasses whose `out`/`in` links are
//! mirrored into adjacency sets on every save and delete.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::query::errors::PlanningError;
use crate::query::gateway::{
    BoxIdStream, Direction, Gateway, IndexPredicate, Neighbor, Record, ScanOrder, VecIdStream,
};
use crate::query::metadata::{
    ClassDef, IndexBy, IndexDef, IndexKind, MetadataProvider, PropertyDef, EDGE_CLASS,
    VERTEX_CLASS,
};
use crate::query::value::Value;
use crate::storage::index::{IndexKey, MemoryIndex};
use crate::types::{ClusterId, PenumbraError, RecordId, Result};

const FIRST_CLUSTER: ClusterId = 1;

#[derive(Clone, Debug)]
struct Stored {
    class: String,
    version: u32,
    props: BTreeMap<String, Value>,
}

impl Stored {
    fn to_record(&self, id: RecordId) -> Record {
        Record {
            id: Some(id),
            class: self.class.clone(),
            version: self.version,
            props: self.props.clone(),
        }
    }

    fn link(&self, name: &str) -> Option<RecordId> {
        self.props.get(name).and_then(Value::as_link)
    }
}

#[derive(Clone, Debug)]
struct Cluster {
    class: String,
    next_position: i64,
    records: BTreeMap<i64, Stored>,
}

#[derive(Clone, Debug)]
struct StoreState {
    classes: FxHashMap<String, ClassDef>,
    clusters: BTreeMap<ClusterId, Cluster>,
    next_cluster: ClusterId,
    indexes: BTreeMap<String, MemoryIndex>,
    outgoing: FxHashMap<RecordId, BTreeSet<RecordId>>,
    incoming: FxHashMap<RecordId, BTreeSet<RecordId>>,
}

/// Index update computed before a save is applied.
struct IndexChange {
    index: String,
    old: Vec<IndexKey>,
    new: Vec<IndexKey>,
}

fn unknown_class(name: &str) -> PenumbraError {
    PlanningError::UnknownClass {
        class: name.to_owned(),
    }
    .into()
}

fn missing(id: RecordId) -> PenumbraError {
    PenumbraError::NotFound(format!("record {id}"))
}

impl StoreState {
    fn new() -> Self {
        let mut state = Self {
            classes: FxHashMap::default(),
            clusters: BTreeMap::new(),
            next_cluster: FIRST_CLUSTER,
            indexes: BTreeMap::new(),
            outgoing: FxHashMap::default(),
            incoming: FxHashMap::default(),
        };
        state.add_class(VERTEX_CLASS, Vec::new());
        state.add_class(EDGE_CLASS, Vec::new());
        state
    }

    fn add_class(&mut self, name: &str, superclasses: Vec<String>) -> ClusterId {
        let cluster = self.next_cluster;
        self.next_cluster += 1;
        self.clusters.insert(
            cluster,
            Cluster {
                class: name.to_owned(),
                next_position: 0,
                records: BTreeMap::new(),
            },
        );
        self.classes.insert(
            name.to_owned(),
            ClassDef {
                name: name.to_owned(),
                superclasses,
                clusters: vec![cluster],
                properties: Vec::new(),
            },
        );
        cluster
    }

    fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        inherits(&self.classes, class, ancestor)
    }

    fn record(&self, id: RecordId) -> Option<&Stored> {
        self.clusters.get(&id.cluster)?.records.get(&id.position)
    }

    /// Clusters scanned for a class, in cluster order.
    fn class_clusters(&self, class: &str, polymorphic: bool) -> Vec<ClusterId> {
        self.clusters
            .iter()
            .filter(|(_, cluster)| {
                cluster.class == class || (polymorphic && self.is_subclass(&cluster.class, class))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Property constraints of a class and all its ancestors.
    fn property_defs(&self, class: &str) -> Vec<&PropertyDef> {
        let mut defs = Vec::new();
        let mut pending = vec![class];
        let mut seen: Vec<&str> = Vec::new();
        while let Some(name) = pending.pop() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(def) = self.classes.get(name) {
                defs.extend(def.properties.iter());
                pending.extend(def.superclasses.iter().map(String::as_str));
            }
        }
        defs
    }

    fn check_properties(&self, record: &Record) -> Result<()> {
        for def in self.property_defs(&record.class) {
            match record.get(&def.name) {
                None if def.mandatory => {
                    return Err(PenumbraError::ConstraintViolation(format!(
                        "{}.{} is mandatory",
                        record.class, def.name
                    )));
                }
                Some(Value::Null) if def.not_null => {
                    return Err(PenumbraError::ConstraintViolation(format!(
                        "{}.{} cannot be null",
                        record.class, def.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates the `out`/`in` links of an edge record.
    fn endpoints(&self, record: &Record) -> Result<(RecordId, RecordId)> {
        let vertex = |name: &str| -> Result<RecordId> {
            let id = record.get(name).and_then(Value::as_link).ok_or_else(|| {
                PenumbraError::ConstraintViolation(format!(
                    "edge of class {} needs a link in '{name}'",
                    record.class
                ))
            })?;
            match self.record(id) {
                Some(stored) if self.is_subclass(&stored.class, VERTEX_CLASS) => Ok(id),
                Some(_) => Err(PenumbraError::RecordTypeMismatch {
                    rid: id,
                    expected: VERTEX_CLASS.to_owned(),
                }),
                None => Err(missing(id)),
            }
        };
        Ok((vertex("out")?, vertex("in")?))
    }

    fn index_changes(
        &self,
        record: &Record,
        previous: Option<&Record>,
    ) -> Result<Vec<IndexChange>> {
        let mut changes = Vec::new();
        for (name, index) in &self.indexes {
            let applies = |class: &str| self.is_subclass(class, &index.def.class);
            let new = if applies(&record.class) {
                index.keys_of(record)
            } else {
                Vec::new()
            };
            let old = match previous {
                Some(previous) if applies(&previous.class) => index.keys_of(previous),
                _ => Vec::new(),
            };
            if new.is_empty() && old.is_empty() {
                continue;
            }
            if index.def.is_unique() {
                if let Some(key) = index.conflict(&new, record.id) {
                    return Err(PenumbraError::ConstraintViolation(format!(
                        "duplicate key {} in unique index {name}",
                        Value::List(key.clone())
                    )));
                }
            }
            changes.push(IndexChange {
                index: name.clone(),
                old,
                new,
            });
        }
        Ok(changes)
    }

    fn save(&mut self, mut record: Record) -> Result<RecordId> {
        if !self.classes.contains_key(&record.class) {
            return Err(unknown_class(&record.class));
        }
        self.check_properties(&record)?;
        let endpoints = if self.is_subclass(&record.class, EDGE_CLASS) {
            Some(self.endpoints(&record)?)
        } else {
            None
        };
        let previous = match record.id {
            Some(id) => {
                let stored = self.record(id).ok_or_else(|| missing(id))?;
                if stored.version != record.version {
                    return Err(PenumbraError::ConcurrentModification {
                        rid: id,
                        expected: record.version,
                        actual: stored.version,
                    });
                }
                if stored.class != record.class {
                    return Err(PenumbraError::CommandExecution(format!(
                        "record {id} cannot change class from {} to {}",
                        stored.class, record.class
                    )));
                }
                Some(stored.to_record(id))
            }
            None => None,
        };
        let changes = self.index_changes(&record, previous.as_ref())?;

        let id = match record.id {
            Some(id) => id,
            None => self.allocate(&record.class)?,
        };
        record.id = Some(id);
        for change in changes {
            if let Some(index) = self.indexes.get_mut(&change.index) {
                index.remove(&change.old, id);
                index.insert(change.new, id);
            }
        }
        if let Some(previous) = &previous {
            self.detach_edge(id, previous.get("out"), previous.get("in"));
        }
        if let Some((from, to)) = endpoints {
            self.outgoing.entry(from).or_default().insert(id);
            self.incoming.entry(to).or_default().insert(id);
        }
        let version = previous.map_or(1, |previous| previous.version + 1);
        let cluster = self
            .clusters
            .get_mut(&id.cluster)
            .ok_or_else(|| PenumbraError::NotFound(format!("cluster {}", id.cluster)))?;
        cluster.records.insert(
            id.position,
            Stored {
                class: record.class,
                version,
                props: record.props,
            },
        );
        Ok(id)
    }

    fn allocate(&mut self, class: &str) -> Result<RecordId> {
        let cluster_id = self
            .classes
            .get(class)
            .and_then(|def| def.clusters.first().copied())
            .ok_or_else(|| unknown_class(class))?;
        let cluster = self
            .clusters
            .get_mut(&cluster_id)
            .ok_or_else(|| PenumbraError::NotFound(format!("cluster {cluster_id}")))?;
        let position = cluster.next_position;
        cluster.next_position += 1;
        Ok(RecordId::new(cluster_id, position))
    }

    fn detach_edge(&mut self, edge: RecordId, from: Option<&Value>, to: Option<&Value>) {
        if let Some(from) = from.and_then(Value::as_link) {
            if let Some(edges) = self.outgoing.get_mut(&from) {
                edges.remove(&edge);
            }
        }
        if let Some(to) = to.and_then(Value::as_link) {
            if let Some(edges) = self.incoming.get_mut(&to) {
                edges.remove(&edge);
            }
        }
    }

    fn delete(&mut self, id: RecordId) -> Result<()> {
        let stored = self.record(id).ok_or_else(|| missing(id))?;
        if self.is_subclass(&stored.class, VERTEX_CLASS) {
            let incident: BTreeSet<RecordId> = self
                .outgoing
                .get(&id)
                .into_iter()
                .chain(self.incoming.get(&id))
                .flatten()
                .copied()
                .collect();
            for edge in incident {
                self.remove(edge);
            }
        }
        self.remove(id);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) {
        let Some(stored) = self
            .clusters
            .get_mut(&id.cluster)
            .and_then(|cluster| cluster.records.remove(&id.position))
        else {
            return;
        };
        let record = stored.to_record(id);
        for index in self.indexes.values_mut() {
            if inherits(&self.classes, &stored.class, &index.def.class) {
                let keys = index.keys_of(&record);
                index.remove(&keys, id);
            }
        }
        self.detach_edge(id, stored.props.get("out"), stored.props.get("in"));
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
    }

    fn neighbors(&self, vertex: RecordId, direction: Direction, labels: &[String]) -> Vec<Neighbor> {
        let mut found = Vec::new();
        let mut collect = |edges: Option<&BTreeSet<RecordId>>, far_end: &str| {
            for edge in edges.into_iter().flatten() {
                let Some(stored) = self.record(*edge) else {
                    continue;
                };
                let labelled = labels.is_empty()
                    || labels.iter().any(|label| self.is_subclass(&stored.class, label));
                if let (true, Some(other)) = (labelled, stored.link(far_end)) {
                    found.push(Neighbor {
                        edge: *edge,
                        vertex: other,
                    });
                }
            }
        };
        if matches!(direction, Direction::Out | Direction::Both) {
            collect(self.outgoing.get(&vertex), "in");
        }
        if matches!(direction, Direction::In | Direction::Both) {
            collect(self.incoming.get(&vertex), "out");
        }
        found
    }
}

/// True when `class` is `ancestor` or inherits from it.
fn inherits(classes: &FxHashMap<String, ClassDef>, class: &str, ancestor: &str) -> bool {
    let mut pending = vec![class];
    let mut seen: Vec<&str> = Vec::new();
    while let Some(name) = pending.pop() {
        if name == ancestor {
            return true;
        }
        if seen.contains(&name) {
            continue;
        }
        seen.push(name);
        if let Some(def) = classes.get(name) {
            pending.extend(def.superclasses.iter().map(String::as_str));
        }
    }
    false
}

/// Thread-safe in-memory database used as the reference [`Gateway`].
///
/// Writes are accepted with or without a transaction; the mutating query
/// steps are the ones that insist on one. `begin` snapshots the whole store
/// and `rollback` restores the snapshot.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    snapshot: Mutex<Option<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store holding only the built-in `V` and `E` classes.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
            snapshot: Mutex::new(None),
        }
    }

    /// Creates a class; returns its cluster.
    pub fn create_class(&self, name: &str, superclasses: &[&str]) -> Result<ClusterId> {
        let mut state = self.state.write();
        if state.classes.contains_key(name) {
            return Err(PenumbraError::CommandExecution(format!(
                "class {name} already exists"
            )));
        }
        if let Some(absent) = superclasses
            .iter()
            .find(|parent| !state.classes.contains_key(**parent))
        {
            return Err(unknown_class(absent));
        }
        let cluster = state.add_class(name, superclasses.iter().map(|s| (*s).to_owned()).collect());
        tracing::debug!(class = name, cluster, "class created");
        Ok(cluster)
    }

    pub fn create_vertex_class(&self, name: &str) -> Result<ClusterId> {
        self.create_class(name, &[VERTEX_CLASS])
    }

    pub fn create_edge_class(&self, name: &str) -> Result<ClusterId> {
        self.create_class(name, &[EDGE_CLASS])
    }

    /// Declares (or redeclares) a property constraint on a class.
    pub fn create_property(&self, class: &str, property: PropertyDef) -> Result<()> {
        let mut state = self.state.write();
        let def = state
            .classes
            .get_mut(class)
            .ok_or_else(|| unknown_class(class))?;
        def.properties.retain(|existing| existing.name != property.name);
        def.properties.push(property);
        Ok(())
    }

    /// Creates an index and fills it from the records already stored,
    /// subclasses included.
    pub fn create_index(
        &self,
        name: &str,
        class: &str,
        fields: &[&str],
        kind: IndexKind,
        by: IndexBy,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(PenumbraError::Invalid("an index needs at least one field"));
        }
        if by != IndexBy::Value && fields.len() != 1 {
            return Err(PenumbraError::Invalid("map key/value indexes take one field"));
        }
        let mut state = self.state.write();
        if state.indexes.contains_key(name) {
            return Err(PenumbraError::CommandExecution(format!(
                "index {name} already exists"
            )));
        }
        if !state.classes.contains_key(class) {
            return Err(unknown_class(class));
        }
        let mut index = MemoryIndex::new(IndexDef {
            name: name.to_owned(),
            class: class.to_owned(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            kind,
            by,
        });
        for cluster_id in state.class_clusters(class, true) {
            let Some(cluster) = state.clusters.get(&cluster_id) else {
                continue;
            };
            for (position, stored) in &cluster.records {
                let id = RecordId::new(cluster_id, *position);
                let record = stored.to_record(id);
                let keys = index.keys_of(&record);
                if index.def.is_unique() && index.conflict(&keys, Some(id)).is_some() {
                    return Err(PenumbraError::ConstraintViolation(format!(
                        "records of {class} hold duplicate keys for unique index {name}"
                    )));
                }
                index.insert(keys, id);
            }
        }
        tracing::debug!(index = name, class, entries = index.len(), "index created");
        state.indexes.insert(name.to_owned(), index);
        Ok(())
    }

    /// Saves a new vertex or document built from `record`.
    pub fn insert(&self, record: Record) -> Result<RecordId> {
        self.save(record)
    }

    /// Saves a new edge of `class` from `from` to `to`.
    pub fn create_edge(&self, class: &str, from: RecordId, to: RecordId) -> Result<RecordId> {
        self.save(
            Record::new(class)
                .with_property("out", Value::Link(from))
                .with_property("in", Value::Link(to)),
        )
    }
}

impl MetadataProvider for MemoryStore {
    fn class(&self, name: &str) -> Result<Option<ClassDef>> {
        Ok(self.state.read().classes.get(name).cloned())
    }

    fn class_indexes(&self, class: &str) -> Result<Vec<IndexDef>> {
        Ok(self
            .state
            .read()
            .indexes
            .values()
            .filter(|index| index.def.class == class)
            .map(|index| index.def.clone())
            .collect())
    }

    fn index(&self, name: &str) -> Result<Option<IndexDef>> {
        Ok(self
            .state
            .read()
            .indexes
            .get(name)
            .map(|index| index.def.clone()))
    }

    fn class_of_cluster(&self, cluster: ClusterId) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .clusters
            .get(&cluster)
            .map(|cluster| cluster.class.clone()))
    }

    fn count_class(&self, name: &str, polymorphic: bool) -> Result<u64> {
        let state = self.state.read();
        if !state.classes.contains_key(name) {
            return Err(unknown_class(name));
        }
        Ok(state
            .class_clusters(name, polymorphic)
            .iter()
            .filter_map(|id| state.clusters.get(id))
            .map(|cluster| cluster.records.len() as u64)
            .sum())
    }

    fn is_subclass_of(&self, class: &str, ancestor: &str) -> Result<bool> {
        Ok(self.state.read().is_subclass(class, ancestor))
    }
}

impl Gateway for MemoryStore {
    fn scan_class(&self, class: &str, polymorphic: bool) -> Result<BoxIdStream> {
        let state = self.state.read();
        if !state.classes.contains_key(class) {
            return Err(unknown_class(class));
        }
        let ids = state
            .class_clusters(class, polymorphic)
            .into_iter()
            .filter_map(|cluster_id| state.clusters.get(&cluster_id).map(|c| (cluster_id, c)))
            .flat_map(|(cluster_id, cluster)| {
                cluster
                    .records
                    .keys()
                    .map(move |position| RecordId::new(cluster_id, *position))
            })
            .collect();
        Ok(VecIdStream::boxed(ids))
    }

    fn scan_cluster(&self, cluster: ClusterId) -> Result<BoxIdStream> {
        let state = self.state.read();
        let records = &state
            .clusters
            .get(&cluster)
            .ok_or_else(|| PenumbraError::NotFound(format!("cluster {cluster}")))?
            .records;
        Ok(VecIdStream::boxed(
            records
                .keys()
                .map(|position| RecordId::new(cluster, *position))
                .collect(),
        ))
    }

    fn lookup_index(
        &self,
        index: &str,
        predicate: &IndexPredicate,
        order: ScanOrder,
    ) -> Result<BoxIdStream> {
        let state = self.state.read();
        let index = state
            .indexes
            .get(index)
            .ok_or_else(|| PenumbraError::NotFound(format!("index {index}")))?;
        Ok(VecIdStream::boxed(index.lookup(predicate, order)))
    }

    fn fetch(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.state.read().record(id).map(|stored| stored.to_record(id)))
    }

    fn save(&self, record: Record) -> Result<RecordId> {
        self.state.write().save(record)
    }

    fn delete(&self, id: RecordId) -> Result<()> {
        self.state.write().delete(id)
    }

    fn edges(
        &self,
        vertex: RecordId,
        direction: Direction,
        labels: &[String],
    ) -> Result<Vec<Neighbor>> {
        Ok(self.state.read().neighbors(vertex, direction, labels))
    }

    fn begin(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock();
        if snapshot.is_some() {
            return Err(PenumbraError::CommandExecution(
                "a transaction is already active".into(),
            ));
        }
        *snapshot = Some(self.state.read().clone());
        tracing::trace!("transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if self.snapshot.lock().take().is_none() {
            return Err(PenumbraError::CommandExecution("no active transaction".into()));
        }
        tracing::trace!("transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock();
        let saved = snapshot
            .take()
            .ok_or_else(|| PenumbraError::CommandExecution("no active transaction".into()))?;
        *self.state.write() = saved;
        tracing::trace!("transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::gateway::IdStream;

    fn drain(mut ids: BoxIdStream) -> Vec<RecordId> {
        let mut out = Vec::new();
        while let Some(id) = ids.next_id().expect("next id") {
            out.push(id);
        }
        out
    }

    fn person(name: &str) -> Record {
        Record::new("Person").with_property("name", name)
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_vertex_class("Person").expect("class");
        store.create_class("Employee", &["Person"]).expect("class");
        store.create_edge_class("Knows").expect("class");
        store
    }

    #[test]
    fn polymorphic_scan_includes_subclasses() -> Result<()> {
        let store = store();
        let alice = store.insert(person("alice"))?;
        let bob = store.insert(Record::new("Employee").with_property("name", "bob"))?;
        assert_eq!(drain(store.scan_class("Person", true)?), vec![alice, bob]);
        assert_eq!(drain(store.scan_class("Person", false)?), vec![alice]);
        assert_eq!(store.count_class("V", true)?, 2);
        assert_eq!(store.class_of_cluster(bob.cluster)?.as_deref(), Some("Employee"));
        Ok(())
    }

    #[test]
    fn stale_version_is_rejected() -> Result<()> {
        let store = store();
        let id = store.insert(person("alice"))?;
        let first = store.fetch(id)?.ok_or_else(|| missing(id))?;
        assert_eq!(first.version, 1);
        store.save(first.clone().with_property("age", 30))?;
        let err = store.save(first.with_property("age", 31)).unwrap_err();
        assert_eq!(err.code(), "ConcurrentModification");
        Ok(())
    }

    #[test]
    fn unique_index_rejects_duplicates_and_tracks_updates() -> Result<()> {
        let store = store();
        store.create_index("Person.name", "Person", &["name"], IndexKind::Unique, IndexBy::Value)?;
        let alice = store.insert(person("alice"))?;
        let err = store
            .insert(Record::new("Employee").with_property("name", "alice"))
            .unwrap_err();
        assert_eq!(err.code(), "ConstraintViolation");

        let record = store.fetch(alice)?.ok_or_else(|| missing(alice))?;
        store.save(record.with_property("name", "alicia"))?;
        let lookup = |name: &str| {
            store.lookup_index(
                "Person.name",
                &IndexPredicate::Equals(vec![name.into()]),
                ScanOrder::Ascending,
            )
        };
        assert!(drain(lookup("alice")?).is_empty());
        assert_eq!(drain(lookup("alicia")?), vec![alice]);
        Ok(())
    }

    #[test]
    fn mandatory_and_not_null_properties() -> Result<()> {
        let store = store();
        store.create_property("Person", PropertyDef::new("name").mandatory().not_null())?;
        assert_eq!(
            store.insert(Record::new("Employee")).unwrap_err().code(),
            "ConstraintViolation"
        );
        assert_eq!(
            store.insert(person("x").with_property("name", Value::Null)).unwrap_err().code(),
            "ConstraintViolation"
        );
        Ok(())
    }

    #[test]
    fn deleting_a_vertex_removes_its_edges() -> Result<()> {
        let store = store();
        let a = store.insert(person("a"))?;
        let b = store.insert(person("b"))?;
        let c = store.insert(person("c"))?;
        let ab = store.create_edge("Knows", a, b)?;
        store.create_edge("Knows", b, c)?;
        assert_eq!(
            store.edges(a, Direction::Out, &[])?,
            vec![Neighbor { edge: ab, vertex: b }]
        );
        assert_eq!(store.edges(b, Direction::Both, &["Knows".into()])?.len(), 2);
        assert!(store.edges(b, Direction::Both, &["Other".into()])?.is_empty());

        store.delete(b)?;
        assert!(store.edges(a, Direction::Out, &[])?.is_empty());
        assert!(store.edges(c, Direction::In, &[])?.is_empty());
        assert_eq!(store.count_class("Knows", true)?, 0);
        Ok(())
    }

    #[test]
    fn edges_need_vertex_endpoints() -> Result<()> {
        let store = store();
        let a = store.insert(person("a"))?;
        let dangling = store
            .save(Record::new("Knows").with_property("out", Value::Link(a)))
            .unwrap_err();
        assert_eq!(dangling.code(), "ConstraintViolation");
        Ok(())
    }

    #[test]
    fn rollback_restores_the_snapshot() -> Result<()> {
        let store = store();
        let kept = store.insert(person("kept"))?;
        store.begin()?;
        assert_eq!(store.begin().unwrap_err().code(), "CommandExecution");
        store.insert(person("dropped"))?;
        store.delete(kept)?;
        store.rollback()?;
        assert!(!store.in_transaction());
        assert_eq!(drain(store.scan_class("Person", false)?), vec![kept]);
        assert_eq!(store.commit().unwrap_err().code(), "CommandExecution");
        Ok(())
    }

    #[test]
    fn map_key_index() -> Result<()> {
        let store = store();
        store.create_index("Person.attrs", "Person", &["attrs"], IndexKind::NotUnique, IndexBy::Key)?;
        let mut attrs = BTreeMap::new();
        attrs.insert("eyes".to_owned(), Value::from("blue"));
        let id = store.insert(person("a").with_property("attrs", Value::Map(attrs)))?;
        let ids = store.lookup_index(
            "Person.attrs",
            &IndexPredicate::ContainsKey("eyes".into()),
            ScanOrder::Ascending,
        )?;
        assert_eq!(drain(ids), vec![id]);
        Ok(())
    }
}
