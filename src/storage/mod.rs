//! Reference storage behind the query gateway.

mod index;
mod memory;

pub use memory::MemoryStore;
