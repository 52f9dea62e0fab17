//! Adaptive network-resilience layer for the Carelink clinical-record client.
//!
//! Sits between the application and a [`ClinicalTransport`] and keeps the
//! client usable on slow, flaky or absent links.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Timeouts**: per-endpoint deadlines learned from recent call durations
//! - **Cache**: bounded TTL cache for reads and searches
//! - **Offline queue**: bounded FIFO of writes made while disconnected
//! - **Compression**: gzip for batch payloads, used only when it pays off
//! - **Batcher**: accumulates operations and submits them as one call
//! - **Retry**: bounded exponential backoff around every network call
//! - **Sync**: per-type watermarks and "changed since" passes
//! - **Events**: observer registry for everything above
//!
//! ## Request flow
//!
//! 1. **Read**: cache hit returns immediately; a miss goes to the network
//!    under the endpoint's adaptive deadline and fills the cache
//! 2. **Write**: online writes execute immediately and invalidate cached
//!    reads of that type; offline writes join the offline queue
//! 3. **Reconnect**: the offline queue is replayed as one batch, and put
//!    back unchanged if the replay fails
//!
//! Every network call reports its duration and outcome back to the timeout
//! manager, so deadlines follow the link.
//!
//! # Example
//!
//! ```
//! use carelink_resilience::{AlwaysOnline, ResilienceConfig, ResilientClient};
//! use carelink_resilience::mock::MockTransport;
//! use std::sync::Arc;
//!
//! let client = ResilientClient::new(
//!     Arc::new(MockTransport::new()),
//!     Arc::new(AlwaysOnline),
//!     ResilienceConfig::default(),
//! );
//! assert!(client.is_online());
//! ```

pub mod batcher;
pub mod cache;
mod client;
pub mod compression;
mod config;
mod error;
pub mod events;
pub mod offline;
pub mod retry;
pub mod sync;
pub mod timeout;
pub mod transport;

pub use batcher::{BatchConfig, BatchResponse, RequestBatcher};
pub use cache::{CacheConfig, CacheEntry, CacheStats, ResponseCache};
pub use client::{BackgroundFlush, ResilienceStatistics, ResilientClient, WriteOutcome};
pub use compression::{
    CompressedPayload, CompressionAlgorithm, CompressionConfig, CompressionNegotiator,
    CompressionOutcome, CompressionResult, Compressor, GzipCompressor, NoopCompressor,
};
pub use config::ResilienceConfig;
pub use error::{ResilienceError, ResilienceResult};
pub use events::{EventBus, ResilienceEvent, ResilienceObserver};
pub use offline::{OfflineConfig, OfflineQueue};
pub use retry::{RetryConfig, RetryController, RetryFailure};
pub use sync::{DifferentialSyncEngine, ResourceChanges, SyncReport, SyncWatermark};
pub use timeout::{AdaptiveTimeoutManager, EndpointStats, TimeoutConfig, TimingProfile, TimingSample};
pub use transport::{
    AlwaysOnline, BatchSubmission, ClinicalTransport, ConnectivityProbe, StaticConnectivity, mock,
};
