//! Lifecycle notifications.
//!
//! Each client owns an [`EventBus`]. Observers subscribe explicitly and get
//! a [`SubscriptionId`] back for unsubscribing. Events are delivered
//! synchronously, in subscription order, on the task that emitted them, so
//! an observer must not block.

use carelink_types::SubscriptionId;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Something that happened inside the resilience layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// A batch was submitted and the transport answered.
    BatchExecuted {
        operation_count: usize,
        duration_ms: u64,
        compressed: bool,
    },
    /// A batch failed after retries; its operations are pending again.
    BatchFailed {
        operation_count: usize,
        error: String,
    },
    /// A write was parked in the offline queue.
    OperationQueuedOffline { queue_len: usize },
    /// The offline queue was replayed successfully.
    OfflineQueueDrained { operation_count: usize },
    /// An endpoint's adaptive timeout changed.
    TimeoutAdjusted {
        endpoint_key: String,
        previous_ms: u64,
        current_ms: u64,
    },
    /// A batch payload was sent compressed.
    CompressionApplied {
        original_size: usize,
        compressed_size: usize,
        ratio: f64,
    },
    /// A resource type finished a differential sync pass.
    SyncCompleted {
        resource_type: String,
        added: usize,
        modified: usize,
        deleted: usize,
    },
    /// A differential sync pass failed.
    SyncFailed {
        resource_type: String,
        error: String,
    },
}

/// Receives lifecycle events.
pub trait ResilienceObserver: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent);
}

impl<F> ResilienceObserver for F
where
    F: Fn(&ResilienceEvent) + Send + Sync,
{
    fn on_event(&self, event: &ResilienceEvent) {
        self(event)
    }
}

/// Per-client observer registry.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ResilienceObserver>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub async fn subscribe(&self, observer: Arc<dyn ResilienceObserver>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.observers.write().await.push((id, observer));
        id
    }

    /// Removes an observer. Returns false if the id was unknown.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    pub async fn subscriber_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Delivers `event` to every current observer.
    pub async fn emit(&self, event: &ResilienceEvent) {
        // Observers run without the registry lock held.
        let observers: Vec<Arc<dyn ResilienceObserver>> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer.on_event(event);
        }
    }
}
