use thiserror::Error;

/// Core cache errors
///
/// Infrastructure failures (`StoreUnavailable`, `Timeout`,
/// `EmbeddingProvider`) are recovered inside the service layer and degrade to
/// a miss or a no-op; callers only ever observe the absence of a cached
/// value.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Lock contended for resource '{resource}'")]
    LockContention { resource: String },

    #[error("Embedding provider error: {message}")]
    EmbeddingProvider { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl CacheError {
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn lock_contention(resource: impl Into<String>) -> Self {
        Self::LockContention {
            resource: resource.into(),
        }
    }

    pub fn embedding_provider(message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether this error is recovered by degrading to a miss/no-op
    /// rather than being surfaced to the caller.
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::Timeout { .. }
                | Self::EmbeddingProvider { .. }
                | Self::Serialization { .. }
        )
    }
}
