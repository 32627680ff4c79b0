#![forbid(unsafe_code)]

//! Identifiers and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::errors::PlanningError;

/// Physical cluster identifier; every class owns one or more clusters.
pub type ClusterId = i32;

/// Stable identity of a stored record: cluster plus position within it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RecordId {
    /// Owning cluster.
    pub cluster: ClusterId,
    /// Position inside the cluster.
    pub position: i64,
}

impl RecordId {
    /// Builds a record id from its two components.
    pub const fn new(cluster: ClusterId, position: i64) -> Self {
        Self { cluster, position }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PenumbraError {
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("record {rid} is not a {expected}")]
    RecordTypeMismatch { rid: RecordId, expected: String },
    #[error("{operator} exceeded the limit of {limit} buffered elements")]
    ResourceLimitExceeded { operator: &'static str, limit: usize },
    #[error("command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("command cancelled")]
    Cancelled,
    #[error("no more rows")]
    NoSuchElement,
    #[error("command execution failed: {0}")]
    CommandExecution(String),
    #[error("concurrent modification of {rid}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        rid: RecordId,
        expected: u32,
        actual: u32,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

pub type Result<T> = std::result::Result<T, PenumbraError>;

impl PenumbraError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PenumbraError::Planning(err) => err.code(),
            PenumbraError::TypeMismatch(_) => "TypeMismatch",
            PenumbraError::ConstraintViolation(_) => "ConstraintViolation",
            PenumbraError::RecordTypeMismatch { .. } => "RecordTypeMismatch",
            PenumbraError::ResourceLimitExceeded { .. } => "ResourceLimitExceeded",
            PenumbraError::Timeout { .. } => "Timeout",
            PenumbraError::Cancelled => "Cancelled",
            PenumbraError::NoSuchElement => "NoSuchElement",
            PenumbraError::CommandExecution(_) => "CommandExecution",
            PenumbraError::ConcurrentModification { .. } => "ConcurrentModification",
            PenumbraError::NotFound(_) => "NotFound",
            PenumbraError::Invalid(_) => "Invalid",
        }
    }

    /// Returns true for errors raised while compiling a command, before any I/O.
    pub fn is_planning(&self) -> bool {
        matches!(self, PenumbraError::Planning(_))
    }
}
