//! Schema metadata consumed by the planner: classes, their hierarchy and the
//! indexes defined on them.
//!
//! The planner never inspects storage structures directly. Index selection,
//! polymorphic scans and pattern class resolution all go through
//! [`MetadataProvider`], which the storage gateway implements.

use crate::query::errors::PlanningError;
use crate::types::{ClusterId, Result};

/// Built-in base class of all vertex classes.
pub const VERTEX_CLASS: &str = "V";
/// Built-in base class of all edge classes.
pub const EDGE_CLASS: &str = "E";

/// Declared property of a class and its constraints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    /// Property must be present on every saved record.
    pub mandatory: bool,
    /// Property, when present, must not be null.
    pub not_null: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            not_null: false,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Schema class definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    pub superclasses: Vec<String>,
    pub clusters: Vec<ClusterId>,
    pub properties: Vec<PropertyDef>,
}

/// Uniqueness of an index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Unique,
    NotUnique,
}

/// What an index stores as its key for each record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexBy {
    /// The field value; list fields contribute one key per element.
    Value,
    /// The keys of a map field.
    Key,
    /// The values of a map field.
    MapValue,
}

/// Index definition over one or more fields of a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub class: String,
    pub fields: Vec<String>,
    pub kind: IndexKind,
    pub by: IndexBy,
}

impl IndexDef {
    pub fn is_unique(&self) -> bool {
        self.kind == IndexKind::Unique
    }

    /// True when the index key is exactly `fields`, in any order.
    pub fn covers_exactly(&self, fields: &[&str]) -> bool {
        self.fields.len() == fields.len()
            && self.fields.iter().all(|field| fields.contains(&field.as_str()))
    }
}

/// Provides schema lookups for planner consumers.
pub trait MetadataProvider {
    /// Looks up a class definition by name.
    fn class(&self, name: &str) -> Result<Option<ClassDef>>;
    /// Indexes defined directly on `class`.
    fn class_indexes(&self, class: &str) -> Result<Vec<IndexDef>>;
    /// Looks up an index definition by name.
    fn index(&self, name: &str) -> Result<Option<IndexDef>>;
    /// Resolves the class owning a cluster.
    fn class_of_cluster(&self, cluster: ClusterId) -> Result<Option<String>>;
    /// Number of records in a class, used for entry point estimation.
    fn count_class(&self, name: &str, polymorphic: bool) -> Result<u64>;

    /// Looks up a class, failing with [`PlanningError::UnknownClass`] when absent.
    fn require_class(&self, name: &str) -> Result<ClassDef> {
        self.class(name)?.ok_or_else(|| {
            PlanningError::UnknownClass {
                class: name.to_owned(),
            }
            .into()
        })
    }

    /// True when `class` equals `ancestor` or inherits from it transitively.
    fn is_subclass_of(&self, class: &str, ancestor: &str) -> Result<bool> {
        let mut pending = vec![class.to_owned()];
        let mut seen: Vec<String> = Vec::new();
        while let Some(name) = pending.pop() {
            if name == ancestor {
                return Ok(true);
            }
            if seen.contains(&name) {
                continue;
            }
            if let Some(def) = self.class(&name)? {
                pending.extend(def.superclasses.iter().cloned());
            }
            seen.push(name);
        }
        Ok(false)
    }
}

/// Resolves two class constraints on the same alias to the more specific one.
pub fn narrower_class<M: MetadataProvider + ?Sized>(
    metadata: &M,
    left: &str,
    right: &str,
) -> Result<String> {
    if metadata.is_subclass_of(left, right)? {
        Ok(left.to_owned())
    } else if metadata.is_subclass_of(right, left)? {
        Ok(right.to_owned())
    } else {
        Err(PlanningError::malformed(format!(
            "classes '{left}' and '{right}' are not in the same hierarchy"
        ))
        .into())
    }
}
