//! The client facade.
//!
//! `ResilientClient` composes the stores and controllers for one client
//! instance. Nothing is global: two clients share no state.
//!
//! Reads go cache → network. Writes go to the network when the probe says
//! online, to the offline queue when it does not (and offline support is
//! on), and fail otherwise.

use crate::batcher::{BatchResponse, RequestBatcher};
use crate::cache::{self, CacheStats, ResponseCache};
use crate::compression::{CompressionNegotiator, Compressor, GzipCompressor};
use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{EventBus, ResilienceEvent, ResilienceObserver};
use crate::offline::OfflineQueue;
use crate::retry::RetryController;
use crate::sync::{DifferentialSyncEngine, SyncReport};
use crate::timeout::AdaptiveTimeoutManager;
use crate::transport::{ClinicalTransport, ConnectivityProbe};
use carelink_types::{
    BatchOperation, ConditionalHeaders, OperationOutcome, ResourceKey, SubscriptionId,
    resource_type_of, version_id_of,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What happened to a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The service accepted the write.
    Completed(OperationOutcome),
    /// The link was down; the write waits in the offline queue.
    QueuedOffline { queue_len: usize },
}

impl WriteOutcome {
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::QueuedOffline { .. })
    }

    pub fn outcome(&self) -> Option<&OperationOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::QueuedOffline { .. } => None,
        }
    }
}

/// Point-in-time view of the client's in-memory state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceStatistics {
    pub pending_operations: usize,
    pub offline_operations: usize,
    pub cache_entries: usize,
    pub cache: CacheStats,
    pub last_sync: BTreeMap<String, DateTime<Utc>>,
    pub sync_in_progress: bool,
    pub tracked_endpoints: usize,
    pub compression_supported: bool,
}

/// Resilient client over a clinical-record transport.
#[derive(Clone)]
pub struct ResilientClient {
    config: ResilienceConfig,
    connectivity: Arc<dyn ConnectivityProbe>,
    events: Arc<EventBus>,
    timeouts: Arc<AdaptiveTimeoutManager>,
    cache: Arc<ResponseCache>,
    offline: Arc<OfflineQueue>,
    compression: Arc<CompressionNegotiator>,
    batcher: Arc<RequestBatcher>,
    sync: Arc<DifferentialSyncEngine>,
}

impl ResilientClient {
    /// Creates a client that gzips batch payloads when worthwhile.
    pub fn new(
        transport: Arc<dyn ClinicalTransport>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: ResilienceConfig,
    ) -> Self {
        let compressor = Arc::new(GzipCompressor::new(config.compression.level));
        Self::with_compressor(transport, connectivity, config, compressor)
    }

    /// Creates a client with an explicit compression capability.
    pub fn with_compressor(
        transport: Arc<dyn ClinicalTransport>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: ResilienceConfig,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let timeouts = Arc::new(AdaptiveTimeoutManager::with_events(
            config.timeouts.clone(),
            events.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let offline = Arc::new(OfflineQueue::new(config.offline.max_operations));
        let compression = Arc::new(CompressionNegotiator::new(
            config.compression.clone(),
            compressor,
        ));
        let batcher = Arc::new(RequestBatcher::new(
            config.batch.clone(),
            transport,
            timeouts.clone(),
            compression.clone(),
            RetryController::new(config.retry.clone()),
            events.clone(),
        ));
        let sync = Arc::new(DifferentialSyncEngine::new(batcher.clone(), events.clone()));

        Self {
            config,
            connectivity,
            events,
            timeouts,
            cache,
            offline,
            compression,
            batcher,
            sync,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &Arc<AdaptiveTimeoutManager> {
        &self.timeouts
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.offline
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // ── Observers ────────────────────────────────────────────────

    pub async fn subscribe(&self, observer: Arc<dyn ResilienceObserver>) -> SubscriptionId {
        self.events.subscribe(observer).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id).await
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Creates a resource. The body must carry `resourceType`.
    pub async fn create_resource(&self, resource: Value) -> ResilienceResult<WriteOutcome> {
        let resource_type = resource_type_of(&resource)
            .ok_or_else(|| ResilienceError::Validation("resource has no resourceType".into()))?
            .to_string();
        self.write(BatchOperation::create(resource_type, resource)).await
    }

    /// Replaces a resource. The body must carry `resourceType` and `id`;
    /// a `meta.versionId` is sent as `If-Match`.
    pub async fn update_resource(&self, resource: Value) -> ResilienceResult<WriteOutcome> {
        let key = ResourceKey::from_resource(&resource)?;
        let conditional = version_id_of(&resource).map(ConditionalHeaders::if_match_version);
        let mut operation = BatchOperation::update(&key, resource);
        if let Some(headers) = conditional {
            operation = operation.with_conditional(headers);
        }
        self.write(operation).await
    }

    /// Deletes a resource.
    pub async fn delete_resource(&self, resource_type: &str, id: &str) -> ResilienceResult<WriteOutcome> {
        require_key("delete", resource_type, id)?;
        self.write(BatchOperation::delete(&ResourceKey::new(resource_type, id)))
            .await
    }

    async fn write(&self, operation: BatchOperation) -> ResilienceResult<WriteOutcome> {
        if !self.connectivity.is_online() {
            if !self.config.offline.enabled {
                return Err(ResilienceError::OfflineNotSupported);
            }
            let queue_len = self.offline.enqueue(operation).await;
            debug!(queue_len, "write queued offline");
            self.events
                .emit(&ResilienceEvent::OperationQueuedOffline { queue_len })
                .await;
            return Ok(WriteOutcome::QueuedOffline { queue_len });
        }

        let outcome = self.batcher.execute_operation(&operation).await?;
        self.invalidate_type(operation.resource_type()).await;
        Ok(WriteOutcome::Completed(outcome))
    }

    async fn invalidate_type(&self, resource_type: &str) {
        for prefix in cache::type_prefixes(resource_type) {
            self.cache.invalidate_prefix(&prefix).await;
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Reads one resource, from cache when fresh.
    pub async fn get_resource(&self, resource_type: &str, id: &str) -> ResilienceResult<Value> {
        require_key("read", resource_type, id)?;
        let key = cache::read_key(resource_type, id);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        self.ensure_online()?;

        let operation = BatchOperation::read(&ResourceKey::new(resource_type, id));
        let outcome = self.batcher.execute_operation(&operation).await?;
        let data = outcome.data.unwrap_or(Value::Null);
        self.cache.put(key, data.clone(), None).await;
        Ok(data)
    }

    /// Searches a resource type, from cache when fresh. Search results use
    /// the shorter search TTL.
    pub async fn search_resources(
        &self,
        resource_type: &str,
        params: &[(&str, &str)],
    ) -> ResilienceResult<Value> {
        if resource_type.is_empty() {
            return Err(ResilienceError::Validation(
                "search needs a resource type".into(),
            ));
        }
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let key = cache::search_key(resource_type, &params);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        self.ensure_online()?;

        let operation = BatchOperation::search(resource_type, params.as_slice());
        let outcome = self.batcher.execute_operation(&operation).await?;
        let data = outcome.data.unwrap_or(Value::Null);
        self.cache
            .put(key, data.clone(), Some(self.cache.search_ttl()))
            .await;
        Ok(data)
    }

    fn ensure_online(&self) -> ResilienceResult<()> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(ResilienceError::Network(
                "offline and no cached response".into(),
            ))
        }
    }

    // ── Batching ─────────────────────────────────────────────────

    /// Adds an operation to the pending batch; see
    /// [`RequestBatcher::add_to_batch`].
    pub async fn add_to_batch(&self, operation: BatchOperation) -> Option<JoinHandle<()>> {
        self.batcher.add_to_batch(operation).await
    }

    /// Submits whatever is pending now.
    pub async fn flush(&self) -> ResilienceResult<Vec<BatchResponse>> {
        self.batcher.execute_batch().await
    }

    /// Replays the offline queue as one batch. On failure the queued writes
    /// are put back in their original order, ahead of anything queued
    /// meanwhile. The same happens if this future is dropped before the
    /// batch is acknowledged. Returns how many writes were replayed.
    pub async fn sync_offline_queue(&self) -> ResilienceResult<usize> {
        let checkout = self.offline.checkout().await;
        if checkout.is_empty() {
            return Ok(0);
        }
        let count = checkout.len();

        let submitted = self.batcher.submit(checkout.operations()).await;
        if let Err(e) = submitted {
            drop(checkout);
            return Err(ResilienceError::OfflineSyncFailed {
                operation_count: count,
                source: Box::new(e),
            });
        }

        let replayed = checkout.commit();
        let types: BTreeSet<&str> = replayed.iter().map(|op| op.resource_type()).collect();
        for resource_type in types {
            self.invalidate_type(resource_type).await;
        }
        info!(operations = count, "offline queue replayed");
        self.events
            .emit(&ResilienceEvent::OfflineQueueDrained {
                operation_count: count,
            })
            .await;
        Ok(count)
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Runs a differential sync pass; see
    /// [`DifferentialSyncEngine::sync_resources`].
    pub async fn sync_resources(
        &self,
        resource_types: &[&str],
        subject_filter: Option<&str>,
    ) -> ResilienceResult<SyncReport> {
        self.sync.sync_resources(resource_types, subject_filter).await
    }

    pub fn sync_engine(&self) -> &Arc<DifferentialSyncEngine> {
        &self.sync
    }

    // ── State ────────────────────────────────────────────────────

    pub async fn get_statistics(&self) -> ResilienceStatistics {
        let cache = self.cache.stats().await;
        ResilienceStatistics {
            pending_operations: self.batcher.pending_len().await,
            offline_operations: self.offline.len().await,
            cache_entries: cache.entry_count,
            cache,
            last_sync: self
                .sync
                .watermarks()
                .await
                .into_iter()
                .map(|w| (w.resource_type, w.last_sync_at))
                .collect(),
            sync_in_progress: self.sync.is_syncing(),
            tracked_endpoints: self.timeouts.endpoint_count().await,
            compression_supported: self.compression.is_supported(),
        }
    }

    /// Clears every in-memory store: pending batch, offline queue, cache,
    /// watermarks and timing profiles.
    pub async fn reset(&self) {
        self.batcher.clear_pending().await;
        self.offline.clear().await;
        self.cache.clear().await;
        self.cache.reset_stats();
        self.sync.clear_watermarks().await;
        self.timeouts.clear_all_stats().await;
        info!("resilience state reset");
    }

    // ── Background flush ─────────────────────────────────────────

    /// Starts the interval task that flushes the pending batch and replays
    /// the offline queue while online.
    pub fn start_background_flush(&self) -> BackgroundFlush {
        let client = self.clone();
        let period = Duration::from_millis(self.config.batch.flush_interval_ms.max(1));
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => client.background_tick().await,
                }
            }
            debug!("background flush stopped");
        });
        BackgroundFlush { handle, shutdown }
    }

    async fn background_tick(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        if !self.offline.is_empty().await {
            if let Err(e) = self.sync_offline_queue().await {
                warn!("background offline replay failed: {}", e);
            }
        }
        if self.batcher.pending_len().await > 0 {
            if let Err(e) = self.batcher.execute_batch().await {
                warn!("background batch flush failed: {}", e);
            }
        }
    }
}

fn require_key(action: &str, resource_type: &str, id: &str) -> ResilienceResult<()> {
    if resource_type.is_empty() || id.is_empty() {
        return Err(ResilienceError::Validation(format!(
            "{action} needs a resource type and id"
        )));
    }
    Ok(())
}

/// Handle for the background flush task.
///
/// Stopping is cooperative: a tick already in progress finishes before the
/// task exits. Dropping the handle requests the same stop without waiting.
pub struct BackgroundFlush {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl BackgroundFlush {
    /// Signals the task and waits for the current tick, if any, to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = (&mut self.handle).await {
            warn!("background flush task ended abnormally: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for BackgroundFlush {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
