//! Request batching.
//!
//! Operations accumulate in a pending queue and go out as one atomic
//! submission once the queue reaches `max_batch_size` (or when flushed
//! explicitly or by the background interval). Every submission:
//!
//! 1. swaps the pending queue for an empty one, so anything enqueued while
//!    the call is in flight lands in the next batch;
//! 2. offers the serialized batch to the compression negotiator;
//! 3. calls the transport under the endpoint's adaptive deadline and feeds
//!    the observed duration back into the timing profile;
//! 4. on failure puts the snapshot back at the *front* of the pending queue
//!    and lets the retry controller decide whether to go again.
//!
//! The snapshot is held by a guard that restores it on drop, so a
//! submission whose future is dropped mid-flight (an aborted task, a
//! caller that stops awaiting) leaves the operations pending.
//!
//! Single operations (reads, searches, immediate writes) share steps 3 and 4
//! through [`RequestBatcher::execute_operation`].

use crate::compression::CompressionNegotiator;
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{EventBus, ResilienceEvent};
use crate::retry::RetryController;
use crate::timeout::AdaptiveTimeoutManager;
use crate::transport::{BatchSubmission, ClinicalTransport};
use carelink_types::{BatchOperation, OperationId, OperationOutcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the request batcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Pending count that triggers an automatic flush.
    pub max_batch_size: usize,
    /// Background flush interval (ms).
    pub flush_interval_ms: u64,
    /// Timing-profile key for batch submissions.
    pub endpoint_key: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval_ms: 1_000,
            endpoint_key: "batch".to_string(),
        }
    }
}

/// Outcome of one operation inside a submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub operation_id: OperationId,
    pub target: String,
    pub outcome: OperationOutcome,
}

/// Accumulates operations and submits them through the transport.
pub struct RequestBatcher {
    config: BatchConfig,
    pending: Mutex<Vec<BatchOperation>>,
    flush_scheduled: AtomicBool,
    transport: Arc<dyn ClinicalTransport>,
    timeouts: Arc<AdaptiveTimeoutManager>,
    compression: Arc<CompressionNegotiator>,
    retry: RetryController,
    events: Arc<EventBus>,
}

impl RequestBatcher {
    pub fn new(
        config: BatchConfig,
        transport: Arc<dyn ClinicalTransport>,
        timeouts: Arc<AdaptiveTimeoutManager>,
        compression: Arc<CompressionNegotiator>,
        retry: RetryController,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            pending: Mutex::new(Vec::new()),
            flush_scheduled: AtomicBool::new(false),
            transport,
            timeouts,
            compression,
            retry,
            events,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    // ── Pending queue ────────────────────────────────────────────

    /// Appends `operation` to the pending batch.
    ///
    /// When the pending count reaches `max_batch_size`, a flush is spawned
    /// and its handle returned. The flush's errors never reach this caller;
    /// they are logged and emitted as [`ResilienceEvent::BatchFailed`].
    pub async fn add_to_batch(self: &Arc<Self>, operation: BatchOperation) -> Option<JoinHandle<()>> {
        let len = {
            let mut pending = self.lock_pending();
            pending.push(operation);
            pending.len()
        };

        if len < self.config.max_batch_size || self.flush_scheduled.swap(true, Ordering::SeqCst) {
            return None;
        }

        debug!(pending = len, "batch size reached, scheduling flush");
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            this.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = this.execute_batch().await {
                warn!("automatic batch flush failed: {}", e);
            }
        }))
    }

    pub async fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Copy of the pending operations, oldest first.
    pub async fn pending_snapshot(&self) -> Vec<BatchOperation> {
        self.lock_pending().clone()
    }

    pub async fn clear_pending(&self) {
        self.lock_pending().clear();
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<BatchOperation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self) -> PendingSnapshot<'_> {
        PendingSnapshot {
            batcher: self,
            operations: std::mem::take(&mut *self.lock_pending()),
        }
    }

    fn restore_front(&self, snapshot: Vec<BatchOperation>) {
        let mut pending = self.lock_pending();
        let newer = std::mem::replace(&mut *pending, snapshot);
        pending.extend(newer);
    }

    // ── Submission ───────────────────────────────────────────────

    /// Submits the pending queue as one batch, retrying recoverable
    /// failures. An empty queue is a no-op.
    ///
    /// After a terminal failure the operations remain pending and go out
    /// with the next flush.
    pub async fn execute_batch(&self) -> ResilienceResult<Vec<BatchResponse>> {
        let last_count = AtomicUsize::new(0);
        let result = self
            .retry
            .run(|_| {
                let last_count = &last_count;
                async move {
                    let mut snapshot = self.take_pending();
                    if snapshot.operations.is_empty() {
                        return Ok(Vec::new());
                    }
                    last_count.store(snapshot.operations.len(), Ordering::Relaxed);
                    // Dropping the snapshot on the error path restores it.
                    let responses = self.submit_once(&snapshot.operations).await?;
                    snapshot.operations.clear();
                    Ok(responses)
                }
            })
            .await;

        match result {
            Ok(responses) => Ok(responses),
            Err(failure) => {
                let operation_count = last_count.load(Ordering::Relaxed);
                let error = failure.into_error(operation_count);
                self.events
                    .emit(&ResilienceEvent::BatchFailed {
                        operation_count,
                        error: error.to_string(),
                    })
                    .await;
                Err(error)
            }
        }
    }

    /// Submits an explicit list of operations as one batch with the same
    /// deadline, compression and retry handling as [`Self::execute_batch`],
    /// without touching the pending queue.
    pub async fn submit(&self, operations: &[BatchOperation]) -> ResilienceResult<Vec<BatchResponse>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        self.retry
            .run(|_| self.submit_once(operations))
            .await
            .map_err(|f| f.into_error(operations.len()))
    }

    /// Executes one operation under its own endpoint's adaptive deadline,
    /// retrying recoverable failures. A non-success outcome becomes
    /// [`ResilienceError::Operation`].
    pub async fn execute_operation(&self, operation: &BatchOperation) -> ResilienceResult<OperationOutcome> {
        let endpoint_key = operation.endpoint_key();
        let endpoint = endpoint_key.as_str();
        self.retry
            .run(|_| async move {
                let deadline_ms = self.timeouts.get_adaptive_timeout(endpoint, None).await;
                self.timed(endpoint, deadline_ms, async {
                    let outcome = self
                        .transport
                        .execute(operation, Duration::from_millis(deadline_ms))
                        .await?;
                    outcome_into_result(outcome)
                })
                .await
            })
            .await
            .map_err(|f| f.into_error(1))
    }

    async fn submit_once(&self, operations: &[BatchOperation]) -> ResilienceResult<Vec<BatchResponse>> {
        let compressed = match self.compression.compress(operations) {
            Ok(outcome) => outcome.payload,
            Err(e) => {
                warn!("batch compression failed, sending uncompressed: {}", e);
                None
            }
        };
        if let Some(payload) = &compressed {
            self.events
                .emit(&ResilienceEvent::CompressionApplied {
                    original_size: payload.original_size,
                    compressed_size: payload.bytes.len(),
                    ratio: payload.original_size as f64 / payload.bytes.len().max(1) as f64,
                })
                .await;
        }

        let submission = BatchSubmission {
            operations: operations.to_vec(),
            compressed,
        };
        let endpoint = self.config.endpoint_key.as_str();
        let deadline_ms = self.timeouts.get_adaptive_timeout(endpoint, None).await;

        let started = Instant::now();
        let outcomes = self
            .timed(
                endpoint,
                deadline_ms,
                self.transport
                    .submit_batch(&submission, Duration::from_millis(deadline_ms)),
            )
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        if outcomes.len() != operations.len() {
            warn!(
                expected = operations.len(),
                received = outcomes.len(),
                "transport returned a mismatched number of outcomes"
            );
        }
        info!(
            operations = operations.len(),
            duration_ms,
            compressed = submission.is_compressed(),
            "batch submitted"
        );
        self.events
            .emit(&ResilienceEvent::BatchExecuted {
                operation_count: operations.len(),
                duration_ms,
                compressed: submission.is_compressed(),
            })
            .await;

        Ok(operations
            .iter()
            .zip(outcomes)
            .map(|(op, outcome)| BatchResponse {
                operation_id: op.id(),
                target: op.target().to_string(),
                outcome,
            })
            .collect())
    }

    /// Runs `call` under a `deadline_ms` deadline and records the observed
    /// duration and outcome for `endpoint`. An expired deadline aborts the
    /// call and counts as a failed sample.
    async fn timed<T, Fut>(&self, endpoint: &str, deadline_ms: u64, call: Fut) -> ResilienceResult<T>
    where
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(Duration::from_millis(deadline_ms), call).await {
            Ok(result) => result,
            Err(_) => Err(ResilienceError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: deadline_ms,
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.timeouts
            .record_outcome(endpoint, elapsed_ms, result.is_ok())
            .await;
        result
    }
}

/// Operations taken off the pending queue for one submission attempt.
/// Anything still held on drop goes back to the front of the queue.
struct PendingSnapshot<'a> {
    batcher: &'a RequestBatcher,
    operations: Vec<BatchOperation>,
}

impl Drop for PendingSnapshot<'_> {
    fn drop(&mut self) {
        if !self.operations.is_empty() {
            debug!(operations = self.operations.len(), "restoring undelivered batch");
            self.batcher
                .restore_front(std::mem::take(&mut self.operations));
        }
    }
}

fn outcome_into_result(outcome: OperationOutcome) -> ResilienceResult<OperationOutcome> {
    if outcome.success {
        return Ok(outcome);
    }
    let (code, message) = match &outcome.error {
        Some(e) => (e.code.clone(), e.message.clone()),
        None => ("unknown".to_string(), "operation failed".to_string()),
    };
    Err(ResilienceError::Operation {
        status: outcome.status,
        code,
        message,
    })
}
