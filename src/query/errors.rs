#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Errors raised while compiling a command into an execution plan.
///
/// Every variant is produced before the first record is read, so callers can
/// reject a statement without having touched storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanningError {
    /// A predicate references `$matched.<alias>` but no pattern introduces it.
    #[error("undefined alias '{alias}' referenced in {context}")]
    UndefinedAlias { alias: String, context: String },
    /// Alias filters depend on each other in a loop.
    #[error("circular alias dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
    /// Pattern shape or modifiers cannot be evaluated.
    #[error("malformed pattern: {reason}")]
    MalformedPattern { reason: String },
    /// No evaluation order exists for the remaining aliases.
    #[error("cannot find an entry point for alias '{alias}'")]
    Unschedulable { alias: String },
    /// Target class is absent from the schema.
    #[error("unknown class '{class}'")]
    UnknownClass { class: String },
    /// Referenced index is absent from the schema.
    #[error("unknown index '{index}'")]
    UnknownIndex { index: String },
    /// Clause combination the planner does not accept.
    #[error("unsupported clause: {reason}")]
    Unsupported { reason: String },
}

impl PlanningError {
    /// Builds a [`PlanningError::UndefinedAlias`].
    pub fn undefined_alias(alias: impl Into<String>, context: impl Into<String>) -> Self {
        PlanningError::UndefinedAlias {
            alias: alias.into(),
            context: context.into(),
        }
    }

    /// Builds a [`PlanningError::MalformedPattern`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        PlanningError::MalformedPattern {
            reason: reason.into(),
        }
    }

    /// Builds a [`PlanningError::Unsupported`].
    pub fn unsupported(reason: impl Into<String>) -> Self {
        PlanningError::Unsupported {
            reason: reason.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::UndefinedAlias { .. } => "UndefinedAlias",
            PlanningError::CircularDependency { .. } => "CircularDependency",
            PlanningError::MalformedPattern { .. } => "MalformedPattern",
            PlanningError::Unschedulable { .. } => "Unschedulable",
            PlanningError::UnknownClass { .. } => "UnknownClass",
            PlanningError::UnknownIndex { .. } => "UnknownIndex",
            PlanningError::Unsupported { .. } => "Unsupported",
        }
    }
}

/// Convenience wrapper that formats planning errors with their codes.
pub struct PlanningErrorWithCode<'a>(pub &'a PlanningError);

impl fmt::Display for PlanningErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
