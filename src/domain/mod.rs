//! Domain layer - traits and value types shared by all cache tiers

pub mod cache;
pub mod embedding;
pub mod lock;
pub mod semantic;

mod error;

pub use error::CacheError;
