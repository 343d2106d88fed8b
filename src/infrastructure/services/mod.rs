//! Cache services

pub mod facade;
pub mod invalidation;
pub mod lock;
pub mod semantic_cache;

pub use facade::{CacheFacade, CacheFacadeConfig};
pub use invalidation::{
    InvalidationReport, InvalidationRule, WriteInvalidationCoordinator, WriteScope,
};
pub use lock::{DistributedLock, DistributedLockConfig};
pub use semantic_cache::{AnswerOptions, SemanticQueryCache, SemanticQueryCacheConfig};
