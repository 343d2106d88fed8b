//! Embedding provider trait and vector math

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::CacheError;

/// External embedding provider.
///
/// Treated as a potentially slow, potentially failing dependency: a single
/// attempt per call, no retry inside this component. Failures degrade the
/// semantic path to an uncached compute.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + Debug {
    /// Maps text to a fixed-length vector in semantic space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError>;

    /// Dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Provider name for logging.
    fn provider_name(&self) -> &'static str;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs so a degenerate
/// embedding is classified as a miss rather than an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub use mock::MockEmbeddingProvider;

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Deterministic embedding provider for tests.
    ///
    /// Specific texts can be pinned to known vectors so tests control the
    /// exact cosine similarity between queries; unpinned texts fall back to a
    /// hash-derived vector.
    #[derive(Debug)]
    pub struct MockEmbeddingProvider {
        dimensions: usize,
        pinned: Mutex<HashMap<String, Vec<f32>>>,
        error: Mutex<Option<String>>,
    }

    impl MockEmbeddingProvider {
        pub fn new(dimensions: usize) -> Self {
            Self {
                dimensions,
                pinned: Mutex::new(HashMap::new()),
                error: Mutex::new(None),
            }
        }

        /// Pins a (normalized) text to a fixed vector.
        pub fn pin(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
            self.pinned.lock().unwrap().insert(text.into(), vector);
            self
        }

        pub fn with_error(self, error: impl Into<String>) -> Self {
            *self.error.lock().unwrap() = Some(error.into());
            self
        }

        pub fn set_failing(&self, failing: bool) {
            *self.error.lock().unwrap() = failing.then(|| "provider down".to_string());
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CacheError> {
            if let Some(error) = self.error.lock().unwrap().clone() {
                return Err(CacheError::embedding_provider(error));
            }

            if let Some(vector) = self.pinned.lock().unwrap().get(text) {
                return Ok(vector.clone());
            }

            let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            Ok((0..self.dimensions)
                .map(|i| ((hash.wrapping_add(i as u64) % 1000) as f32 / 1000.0) - 0.5)
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_cosine_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_known_value() {
        // cos between [1,0] and [0.92, sqrt(1-0.92^2)] is 0.92
        let other = [0.92_f32, (1.0_f32 - 0.92 * 0.92).sqrt()];
        let sim = cosine_similarity(&[1.0, 0.0], &other);
        assert!((sim - 0.92).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_pinned_and_deterministic() {
        let provider = MockEmbeddingProvider::new(4).pin("hello", vec![1.0, 0.0, 0.0, 0.0]);

        assert_eq!(provider.embed("hello").await.unwrap(), vec![1.0, 0.0, 0.0, 0.0]);

        let a = provider.embed("other").await.unwrap();
        let b = provider.embed("other").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[tokio::test]
    async fn test_mock_error_injection() {
        let provider = MockEmbeddingProvider::new(4).with_error("quota exceeded");
        assert!(provider.embed("hello").await.is_err());

        provider.set_failing(false);
        assert!(provider.embed("hello").await.is_ok());
    }
}
