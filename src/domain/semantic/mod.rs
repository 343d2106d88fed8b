//! Semantic cache domain - tenant-scoped cached AI answers

mod record;
mod repository;

pub use record::{OrganizationId, SemanticAnswer, SemanticCacheRecord};
pub use repository::VectorStore;
