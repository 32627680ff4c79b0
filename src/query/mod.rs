#![forbid(unsafe_code)]

//! Query planning and execution engine.
//!
//! Commands arrive as a [`ast::Statement`] tree, are planned into a tree of
//! pull-based steps by the [`planner`], and are consumed through the
//! [`executor::ResultStream`] returned by [`executor::Executor`].

/// Command tree: expressions, targets and every statement kind.
pub mod ast;

/// Fluent builders assembling command trees in code.
pub mod builder;

/// Per-command execution state: parameters, variables, limits and deadlines.
pub mod context;

/// Errors raised while compiling a command.
pub mod errors;

/// Command entry point and the caller-facing result stream.
pub mod executor;

/// Expression evaluation.
pub mod expr;

/// Storage contract the steps read and write through.
pub mod gateway;

/// Schema metadata consumed by the planner.
pub mod metadata;

/// MATCH pattern compilation and evaluation.
pub(crate) mod pattern;

/// Executable plans and their explain output.
pub mod plan;

/// Converts command trees into step trees.
pub mod planner;

/// Per-step runtime counters.
pub mod profile;

/// Rows flowing between steps.
pub mod row;

/// Pull-based execution steps.
pub mod step;

/// Dynamically typed values.
pub mod value;

pub use builder::{MatchBuilder, Node, QueryBuilder};
pub use context::{ExecutionConfig, Params};
pub use executor::{Executor, ResultStream};
pub use plan::{ExplainNode, PlanExplain};
pub use planner::{Planner, PlannerConfig};
pub use row::ResultRow;
pub use value::Value;
