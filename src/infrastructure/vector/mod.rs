//! Vector store adapters

mod in_memory;
mod postgres;

pub use in_memory::InMemoryVectorStore;
pub use postgres::{PgVectorStore, PgVectorStoreConfig};
