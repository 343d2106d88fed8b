//! Embedding provider clients

mod openai;

pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
