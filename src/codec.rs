//! Value encoding for the distributed tier.
//!
//! Values travel as JSON bytes behind a one-byte frame tag. Payloads larger
//! than the configured threshold are gzip-compressed and tagged so decoding
//! is transparent to callers.

use crate::error::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

/// Frame tag: plain JSON bytes.
const TAG_RAW: u8 = 0;
/// Frame tag: gzip-compressed JSON bytes.
const TAG_GZIP: u8 = 1;

/// Serializer/compressor for L2 payloads.
#[derive(Debug, Clone)]
pub struct Codec {
    threshold: usize,
}

impl Codec {
    /// Create a codec that compresses payloads above `threshold` bytes.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Encode a JSON string into a framed payload.
    pub fn encode_json(&self, json: &str) -> CacheResult<Vec<u8>> {
        let raw = json.as_bytes();

        if raw.len() > self.threshold {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(6));
            encoder
                .write_all(raw)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            let compressed = encoder
                .finish()
                .map_err(|e| CacheError::Serialization(e.to_string()))?;

            let mut framed = Vec::with_capacity(compressed.len() + 1);
            framed.push(TAG_GZIP);
            framed.extend_from_slice(&compressed);
            Ok(framed)
        } else {
            let mut framed = Vec::with_capacity(raw.len() + 1);
            framed.push(TAG_RAW);
            framed.extend_from_slice(raw);
            Ok(framed)
        }
    }

    /// Decode a framed payload back into a JSON string.
    ///
    /// Any failure (empty input, unknown tag, gzip error, invalid UTF-8)
    /// is reported as [`CacheError::Corrupted`]; callers treat it as a
    /// cache miss.
    pub fn decode_json(&self, bytes: &[u8]) -> CacheResult<String> {
        let (tag, payload) = match bytes.split_first() {
            Some(parts) => parts,
            None => return Err(CacheError::Corrupted("empty payload".to_string())),
        };

        match *tag {
            TAG_RAW => String::from_utf8(payload.to_vec())
                .map_err(|e| CacheError::Corrupted(e.to_string())),
            TAG_GZIP => {
                let mut decoder = flate2::read::GzDecoder::new(payload);
                let mut json = String::new();
                decoder
                    .read_to_string(&mut json)
                    .map_err(|e| CacheError::Corrupted(e.to_string()))?;
                Ok(json)
            }
            other => Err(CacheError::Corrupted(format!("unknown frame tag {}", other))),
        }
    }

    /// Serialize and encode a value.
    pub fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Vec<u8>> {
        let json = serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.encode_json(&json)
    }

    /// Decode and deserialize a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        let json = self.decode_json(bytes)?;
        serde_json::from_str(&json).map_err(|e| CacheError::Corrupted(e.to_string()))
    }
}
