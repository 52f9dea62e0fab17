//! Batch payload compression.
//!
//! The compressor is a capability chosen when the client is built:
//! [`GzipCompressor`] where compression is wanted, [`NoopCompressor`] where
//! it is not available. The negotiator only marks a payload as compressed
//! when the measured ratio beats the configured benefit threshold; below it
//! the plain payload goes out.

use crate::error::{ResilienceError, ResilienceResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Compression configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Minimum `original / compressed` ratio for a payload to be sent
    /// compressed.
    pub benefit_threshold: f64,
    /// Gzip level, 0–9.
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            benefit_threshold: 1.2,
            level: 6,
        }
    }
}

/// Algorithm a payload was (or was not) compressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Gzip,
}

/// Measurement for one compression attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub original_size: usize,
    pub compressed_size: usize,
    /// `original_size / compressed_size`; 1 for a no-op.
    pub ratio: f64,
    pub algorithm: CompressionAlgorithm,
    pub elapsed_ms: u64,
}

impl CompressionResult {
    fn noop(size: usize) -> Self {
        Self {
            original_size: size,
            compressed_size: size,
            ratio: 1.0,
            algorithm: CompressionAlgorithm::None,
            elapsed_ms: 0,
        }
    }
}

/// Compressed body handed to the transport alongside the operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedPayload {
    pub algorithm: CompressionAlgorithm,
    pub bytes: Vec<u8>,
    pub original_size: usize,
}

/// Result of negotiating one payload.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub result: CompressionResult,
    /// Present only when the payload should be sent compressed.
    pub payload: Option<CompressedPayload>,
}

/// A compression capability.
pub trait Compressor: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Whether this compressor can actually shrink anything.
    fn is_supported(&self) -> bool;

    fn compress(&self, data: &[u8]) -> ResilienceResult<Vec<u8>>;
}

/// Compressor for runtimes without compression support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn compress(&self, data: &[u8]) -> ResilienceResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Gzip via flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default().level)
    }
}

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn compress(&self, data: &[u8]) -> ResilienceResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| ResilienceError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| ResilienceError::Compression(e.to_string()))
    }
}

/// Decides per payload whether compression is worth sending.
pub struct CompressionNegotiator {
    config: CompressionConfig,
    compressor: Arc<dyn Compressor>,
}

impl CompressionNegotiator {
    pub fn new(config: CompressionConfig, compressor: Arc<dyn Compressor>) -> Self {
        Self { config, compressor }
    }

    /// Gzip at the configured level.
    pub fn gzip(config: CompressionConfig) -> Self {
        let compressor = Arc::new(GzipCompressor::new(config.level));
        Self::new(config, compressor)
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Whether compression is both configured and available.
    pub fn is_supported(&self) -> bool {
        self.config.enabled && self.compressor.is_supported()
    }

    /// Serializes `payload` as JSON and negotiates the result.
    pub fn compress<T: Serialize + ?Sized>(&self, payload: &T) -> ResilienceResult<CompressionOutcome> {
        let bytes = serde_json::to_vec(payload)?;
        self.compress_bytes(&bytes)
    }

    /// Negotiates an already-serialized payload.
    pub fn compress_bytes(&self, data: &[u8]) -> ResilienceResult<CompressionOutcome> {
        if !self.is_supported() {
            return Ok(CompressionOutcome {
                result: CompressionResult::noop(data.len()),
                payload: None,
            });
        }

        let started = Instant::now();
        let compressed = self.compressor.compress(data)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let ratio = if compressed.is_empty() {
            1.0
        } else {
            data.len() as f64 / compressed.len() as f64
        };
        let result = CompressionResult {
            original_size: data.len(),
            compressed_size: compressed.len(),
            ratio,
            algorithm: self.compressor.algorithm(),
            elapsed_ms,
        };

        let worth_it = ratio > self.config.benefit_threshold;
        debug!(
            original = result.original_size,
            compressed = result.compressed_size,
            ratio,
            worth_it,
            "negotiated payload compression"
        );

        let payload = worth_it.then(|| CompressedPayload {
            algorithm: result.algorithm,
            bytes: compressed,
            original_size: data.len(),
        });
        Ok(CompressionOutcome { result, payload })
    }
}
