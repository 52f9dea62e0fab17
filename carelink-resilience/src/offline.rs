//! Offline write queue.
//!
//! Writes attempted while the link is down are parked here in FIFO order
//! and replayed once connectivity returns. The queue is bounded; overflow
//! drops the oldest write. Contents live only as long as the process.
//!
//! Replays check the queue out through [`OfflineQueue::checkout`]. The
//! returned [`Checkout`] puts the writes back at the front unless it is
//! committed, so a replay that fails or is cancelled mid-flight loses
//! nothing.

use carelink_types::BatchOperation;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Offline queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Queue writes while offline instead of failing them.
    pub enabled: bool,
    /// Maximum queued writes.
    pub max_operations: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_operations: 100,
        }
    }
}

/// Bounded FIFO of writes waiting for connectivity.
pub struct OfflineQueue {
    max_operations: usize,
    queue: Mutex<VecDeque<BatchOperation>>,
}

impl OfflineQueue {
    pub fn new(max_operations: usize) -> Self {
        Self {
            max_operations,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an operation, dropping the oldest if the bound is exceeded.
    /// Returns the queue length afterwards.
    pub async fn enqueue(&self, operation: BatchOperation) -> usize {
        let mut queue = self.lock();
        queue.push_back(operation);
        self.enforce_bound(&mut queue);
        queue.len()
    }

    /// Takes every queued operation, leaving the queue empty.
    pub async fn take_all(&self) -> Vec<BatchOperation> {
        self.lock().drain(..).collect()
    }

    /// Takes every queued operation under a guard that restores them to
    /// the front when dropped without [`Checkout::commit`].
    pub async fn checkout(&self) -> Checkout<'_> {
        let operations = self.take_all().await;
        Checkout {
            queue: self,
            operations: Some(operations),
        }
    }

    /// Puts a previously taken snapshot back ahead of anything queued since,
    /// preserving the original order.
    pub async fn restore_front(&self, snapshot: Vec<BatchOperation>) {
        self.restore_now(snapshot);
    }

    /// Copy of the queued operations, oldest first.
    pub async fn snapshot(&self) -> Vec<BatchOperation> {
        self.lock().iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub async fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BatchOperation>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restore_now(&self, snapshot: Vec<BatchOperation>) {
        let mut queue = self.lock();
        for op in snapshot.into_iter().rev() {
            queue.push_front(op);
        }
        self.enforce_bound(&mut queue);
    }

    fn enforce_bound(&self, queue: &mut VecDeque<BatchOperation>) {
        while queue.len() > self.max_operations {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    operation = %dropped.id(),
                    target = dropped.target(),
                    "offline queue full, dropped oldest write"
                );
            }
        }
    }
}

/// Writes checked out of an [`OfflineQueue`] for replay.
pub struct Checkout<'a> {
    queue: &'a OfflineQueue,
    operations: Option<Vec<BatchOperation>>,
}

impl Checkout<'_> {
    pub fn operations(&self) -> &[BatchOperation] {
        self.operations.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.operations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }

    /// Marks the writes as delivered; they are not restored.
    pub fn commit(mut self) -> Vec<BatchOperation> {
        self.operations.take().unwrap_or_default()
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(operations) = self.operations.take() {
            if !operations.is_empty() {
                debug!(operations = operations.len(), "restoring undelivered offline writes");
                self.queue.restore_now(operations);
            }
        }
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(OfflineConfig::default().max_operations)
    }
}
