//! Cache domain - generic key-value caching abstraction

mod entry;
mod key;
mod store;

pub use entry::{CacheEnvelope, SetOptions};
pub use key::{fingerprint, namespace_of, normalize_query};
pub use store::KvStore;

#[cfg(test)]
pub use store::mock::MockKvStore;
