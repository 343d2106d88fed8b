//! KV store adapters

mod in_memory;
mod redis;
mod retry;

pub use in_memory::InMemoryKvStore;
pub use redis::{RedisKvStore, RedisKvStoreConfig};
pub use retry::RetryPolicy;
