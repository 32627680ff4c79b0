#![forbid(unsafe_code)]

//! Result rows produced by execution steps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::gateway::Record;
use crate::query::value::Value;
use crate::types::{PenumbraError, RecordId, Result};

/// One row flowing through an execution plan.
///
/// A row is either backed by a stored record (it carries the record's
/// identity, class and version) or is a pure projection. Only identity-backed
/// rows can be turned back into a [`Record`] for mutation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    identity: Option<RecordId>,
    class: Option<String>,
    version: u32,
    props: BTreeMap<String, Value>,
    #[serde(skip)]
    metadata: BTreeMap<String, Value>,
}

impl ResultRow {
    /// Empty projection row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity-backed row mirroring a stored record.
    pub fn from_record(record: Record) -> Self {
        Self {
            identity: record.id,
            class: Some(record.class),
            version: record.version,
            props: record.props,
            metadata: BTreeMap::new(),
        }
    }

    /// Projection row built from name/value pairs.
    pub fn from_props<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Option<RecordId> {
        self.identity
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// True when the row stands for a stored record.
    pub fn is_element(&self) -> bool {
        self.identity.is_some()
    }

    /// Looks up a property; absence is not an error.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Resolves a property or one of the `@rid`, `@class`, `@version` attributes.
    pub fn attribute(&self, name: &str) -> Value {
        match name {
            "@rid" => self.identity.map_or(Value::Null, Value::Link),
            "@class" => self.class.clone().map_or(Value::Null, Value::String),
            "@version" => Value::Int(i64::from(self.version)),
            _ => self.props.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        self.props.insert(name.into(), value);
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.props.remove(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.props
    }

    /// Per-row scratch values (LET results) that are not part of the output.
    pub fn metadata(&self, name: &str) -> Option<&Value> {
        self.metadata.get(name)
    }

    pub fn set_metadata(&mut self, name: impl Into<String>, value: Value) {
        self.metadata.insert(name.into(), value);
    }

    /// Converts the row back into a record for mutation.
    pub fn to_record(&self) -> Result<Record> {
        match (self.identity, &self.class) {
            (Some(id), Some(class)) => Ok(Record {
                id: Some(id),
                class: class.clone(),
                version: self.version,
                props: self.props.clone(),
            }),
            _ => Err(PenumbraError::CommandExecution(
                "projection row is not backed by a record".into(),
            )),
        }
    }

    /// Structural key used for DISTINCT: identity when present, properties otherwise.
    pub fn distinct_key(&self) -> Value {
        match self.identity {
            Some(rid) => Value::Link(rid),
            None => Value::Map(self.props.clone()),
        }
    }

    /// Plain JSON rendering, including `@rid`/`@class` for element rows.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if let Some(rid) = self.identity {
            object.insert("@rid".into(), serde_json::Value::String(rid.to_string()));
        }
        if let Some(class) = &self.class {
            object.insert("@class".into(), serde_json::Value::String(class.clone()));
        }
        for (name, value) in &self.props {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}
