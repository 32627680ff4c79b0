//! Penumbra: the query execution core of an embedded multi-model database.
//!
//! The crate plans and runs SELECT, MATCH and mutation commands as trees of
//! pull-based steps over a storage [`query::gateway::Gateway`].
//! [`storage::MemoryStore`] is the in-memory reference gateway.

pub mod query;
pub mod storage;
pub mod types;

pub use query::{Executor, QueryBuilder, ResultRow, ResultStream, Value};
pub use types::{PenumbraError, RecordId, Result};
