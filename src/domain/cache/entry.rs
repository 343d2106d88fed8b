//! Cache entry envelope and write options

use std::io::{Read, Write};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::domain::CacheError;

/// Options applied when writing an entry through the facade
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live; falls back to the facade's per-namespace default
    pub ttl: Option<Duration>,
    /// Tags for bulk invalidation (e.g. `org:123`, `table:emissions`)
    pub tags: Vec<String>,
    /// Disable transparent compression for this entry
    pub no_compress: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn without_compression(mut self) -> Self {
        self.no_compress = true;
        self
    }
}

/// Wire format for a stored cache entry.
///
/// Payloads above the compression threshold are gzipped and base64-encoded;
/// smaller payloads are stored as the raw JSON string. Decompression is
/// handled in [`CacheEnvelope::open`], so compression is never visible at the
/// `get` boundary. Tags travel with the entry so `delete` can unlink the key
/// from the tag reverse index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(rename = "c")]
    pub compressed: bool,
    #[serde(rename = "t", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "p")]
    pub payload: String,
}

impl CacheEnvelope {
    /// Wraps a serialized payload, compressing it when it exceeds
    /// `compression_threshold` bytes (unless disabled via options).
    pub fn seal(
        payload_json: &str,
        tags: Vec<String>,
        compression_threshold: usize,
        no_compress: bool,
    ) -> Result<Self, CacheError> {
        let should_compress = !no_compress && payload_json.len() > compression_threshold;

        if !should_compress {
            return Ok(Self {
                compressed: false,
                tags,
                payload: payload_json.to_string(),
            });
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(payload_json.as_bytes())
            .map_err(|e| CacheError::serialization(format!("Failed to compress payload: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CacheError::serialization(format!("Failed to compress payload: {}", e)))?;

        Ok(Self {
            compressed: true,
            tags,
            payload: BASE64.encode(compressed),
        })
    }

    /// Recovers the serialized payload, decompressing if needed.
    pub fn open(&self) -> Result<String, CacheError> {
        if !self.compressed {
            return Ok(self.payload.clone());
        }

        let bytes = BASE64.decode(&self.payload).map_err(|e| {
            CacheError::serialization(format!("Failed to decode compressed payload: {}", e))
        })?;

        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut payload = String::new();
        decoder.read_to_string(&mut payload).map_err(|e| {
            CacheError::serialization(format!("Failed to decompress payload: {}", e))
        })?;

        Ok(payload)
    }

    /// Serializes the envelope for storage.
    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self)
            .map_err(|e| CacheError::serialization(format!("Failed to encode envelope: {}", e)))
    }

    /// Parses a stored envelope.
    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw)
            .map_err(|e| CacheError::serialization(format!("Failed to decode envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_not_compressed() {
        let envelope = CacheEnvelope::seal("\"small\"", vec![], 1024, false).unwrap();
        assert!(!envelope.compressed);
        assert_eq!(envelope.open().unwrap(), "\"small\"");
    }

    #[test]
    fn test_large_payload_compressed_transparently() {
        let payload = format!("\"{}\"", "x".repeat(4096));
        let envelope = CacheEnvelope::seal(&payload, vec![], 1024, false).unwrap();

        assert!(envelope.compressed);
        // gzip of a repeated char is far smaller than the input
        assert!(envelope.payload.len() < payload.len());
        assert_eq!(envelope.open().unwrap(), payload);
    }

    #[test]
    fn test_compression_can_be_disabled() {
        let payload = format!("\"{}\"", "x".repeat(4096));
        let envelope = CacheEnvelope::seal(&payload, vec![], 1024, true).unwrap();
        assert!(!envelope.compressed);
    }

    #[test]
    fn test_tags_survive_roundtrip() {
        let envelope = CacheEnvelope::seal(
            "\"v\"",
            vec!["org:123".to_string(), "table:emissions".to_string()],
            1024,
            false,
        )
        .unwrap();

        let decoded = CacheEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.tags, vec!["org:123", "table:emissions"]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CacheEnvelope::decode("not json").is_err());
    }
}
