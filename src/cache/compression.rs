//! Payload Compression
//!
//! Compresses slow-tier payloads above a size threshold. Compression is
//! opportunistic: a codec failure or a result that is not smaller than the
//! input leaves the payload stored raw.

use crate::cache::entry::CompressionAlgorithm;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Compression Configuration
// =============================================================================

/// Configuration for payload compression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm applied to payloads above the threshold
    pub algorithm: CompressionAlgorithm,
    /// Payloads smaller than this are stored raw
    pub min_size_bytes: usize,
    /// Algorithm-specific level (LZ4 high-compression and Zstd)
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

impl CompressionConfig {
    /// Configuration that never compresses
    pub fn disabled() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Applies the configured codec to payloads
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CompressionConfig,
}

impl Codec {
    /// Create a codec from configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress a payload, returning the stored bytes and the algorithm used
    pub fn encode(&self, data: &[u8]) -> (Bytes, CompressionAlgorithm) {
        let algorithm = self.config.algorithm;
        if algorithm == CompressionAlgorithm::None || data.len() < self.config.min_size_bytes {
            return (Bytes::copy_from_slice(data), CompressionAlgorithm::None);
        }

        match compress(algorithm, self.config.level, data) {
            Ok(packed) if packed.len() < data.len() => (Bytes::from(packed), algorithm),
            Ok(_) => (Bytes::copy_from_slice(data), CompressionAlgorithm::None),
            Err(e) => {
                warn!(algorithm = %algorithm, error = %e, "Compression failed, storing raw payload");
                (Bytes::copy_from_slice(data), CompressionAlgorithm::None)
            }
        }
    }

    /// Restore a payload written by [`Codec::encode`]
    pub fn decode(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        decompress(algorithm, data).map(Bytes::from)
    }
}

fn codec_error(algorithm: CompressionAlgorithm, e: impl std::fmt::Display) -> Error {
    Error::Compression {
        algorithm: algorithm.to_string(),
        reason: e.to_string(),
    }
}

fn compress(algorithm: CompressionAlgorithm, level: i32, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level)),
            true,
        )
        .map_err(|e| codec_error(algorithm, e)),
        CompressionAlgorithm::Zstd => {
            zstd::encode_all(data, level).map_err(|e| codec_error(algorithm, e))
        }
        CompressionAlgorithm::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| codec_error(algorithm, e)),
    }
}

fn decompress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => {
            lz4::block::decompress(data, None).map_err(|e| codec_error(algorithm, e))
        }
        CompressionAlgorithm::Zstd => zstd::decode_all(data).map_err(|e| codec_error(algorithm, e)),
        CompressionAlgorithm::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| codec_error(algorithm, e)),
    }
}
