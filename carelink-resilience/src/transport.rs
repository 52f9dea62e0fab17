//! Transport and connectivity abstractions.
//!
//! The resilience layer never speaks a wire format itself. It drives a
//! [`ClinicalTransport`] that can execute one operation or submit a batch,
//! and asks a [`ConnectivityProbe`] whether the link is up.

use crate::compression::CompressedPayload;
use crate::error::ResilienceResult;
use async_trait::async_trait;
use carelink_types::{BatchOperation, OperationOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One batch as handed to the transport.
///
/// `compressed` is the compression marker: when it is `Some`, the transport
/// sends those bytes as the body instead of serializing `operations`.
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub operations: Vec<BatchOperation>,
    pub compressed: Option<CompressedPayload>,
}

impl BatchSubmission {
    pub fn is_compressed(&self) -> bool {
        self.compressed.is_some()
    }
}

/// The clinical-record service as seen by this layer.
///
/// A batch is attempted as a unit but each sub-operation is reported
/// individually; nothing is rolled back. Implementations return `Err` only
/// when the call as a whole failed (unreachable, 5xx, ...).
#[async_trait]
pub trait ClinicalTransport: Send + Sync {
    /// Executes a single operation. `deadline` is advisory; the caller
    /// enforces it independently.
    async fn execute(
        &self,
        operation: &BatchOperation,
        deadline: Duration,
    ) -> ResilienceResult<OperationOutcome>;

    /// Submits a batch, returning one outcome per operation in order.
    async fn submit_batch(
        &self,
        submission: &BatchSubmission,
        deadline: Duration,
    ) -> ResilienceResult<Vec<OperationOutcome>>;
}

/// Reports whether the service is currently reachable.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

impl<F> ConnectivityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_online(&self) -> bool {
        self()
    }
}

/// A probe that always reports online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A probe whose state is set by the application (e.g. from OS network
/// notifications).
#[derive(Debug, Clone)]
pub struct StaticConnectivity {
    online: Arc<AtomicBool>,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A mock transport for testing.
pub mod mock {
    use super::*;
    use crate::error::ResilienceError;
    use carelink_types::Method;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A failure the mock returns instead of answering.
    #[derive(Debug, Clone)]
    pub enum ScriptedFailure {
        /// Fail with `ResilienceError::Network`.
        Network(String),
        /// Fail the whole call with the given status.
        Status(u16),
        /// Sleep this long before answering normally.
        Stall(Duration),
    }

    type Handler = dyn Fn(&BatchOperation) -> OperationOutcome + Send + Sync;

    /// In-memory transport that records everything it is asked to do.
    pub struct MockTransport {
        latency: Mutex<Duration>,
        failures: Mutex<VecDeque<ScriptedFailure>>,
        submissions: Mutex<Vec<BatchSubmission>>,
        executed: Mutex<Vec<BatchOperation>>,
        handler: Box<Handler>,
    }

    impl MockTransport {
        /// Creates a mock that answers every operation with
        /// [`default_outcome`].
        pub fn new() -> Self {
            Self::with_handler(default_outcome)
        }

        /// Creates a mock that answers with `handler`.
        pub fn with_handler<F>(handler: F) -> Self
        where
            F: Fn(&BatchOperation) -> OperationOutcome + Send + Sync + 'static,
        {
            Self {
                latency: Mutex::new(Duration::ZERO),
                failures: Mutex::new(VecDeque::new()),
                submissions: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            }
        }

        /// Delay applied to every call.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = latency;
        }

        /// Queues a failure for the next call (single or batch).
        pub fn fail_next(&self, failure: ScriptedFailure) {
            self.failures.lock().unwrap().push_back(failure);
        }

        /// Queues the same failure `times` times.
        pub fn fail_times(&self, failure: ScriptedFailure, times: usize) {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..times {
                failures.push_back(failure.clone());
            }
        }

        /// Every batch submitted so far, including failed attempts.
        pub fn submissions(&self) -> Vec<BatchSubmission> {
            self.submissions.lock().unwrap().clone()
        }

        pub fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        /// Every single operation executed so far, including failed attempts.
        pub fn executed(&self) -> Vec<BatchOperation> {
            self.executed.lock().unwrap().clone()
        }

        pub fn execute_count(&self) -> usize {
            self.executed.lock().unwrap().len()
        }

        async fn before_answer(&self) -> ResilienceResult<()> {
            let latency = *self.latency.lock().unwrap();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let next = self.failures.lock().unwrap().pop_front();
            match next {
                None => Ok(()),
                Some(ScriptedFailure::Network(msg)) => Err(ResilienceError::Network(msg)),
                Some(ScriptedFailure::Status(status)) => Err(ResilienceError::Operation {
                    status: Some(status),
                    code: format!("http-{status}"),
                    message: "scripted failure".into(),
                }),
                Some(ScriptedFailure::Stall(stall)) => {
                    tokio::time::sleep(stall).await;
                    Ok(())
                }
            }
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ClinicalTransport for MockTransport {
        async fn execute(
            &self,
            operation: &BatchOperation,
            _deadline: Duration,
        ) -> ResilienceResult<OperationOutcome> {
            self.executed.lock().unwrap().push(operation.clone());
            self.before_answer().await?;
            Ok((self.handler)(operation))
        }

        async fn submit_batch(
            &self,
            submission: &BatchSubmission,
            _deadline: Duration,
        ) -> ResilienceResult<Vec<OperationOutcome>> {
            self.submissions.lock().unwrap().push(submission.clone());
            self.before_answer().await?;
            Ok(submission.operations.iter().map(|op| (self.handler)(op)).collect())
        }
    }

    /// Answers like a well-behaved record server with no stored data.
    pub fn default_outcome(operation: &BatchOperation) -> OperationOutcome {
        match operation.method() {
            Method::Create => {
                let mut resource = operation.resource().cloned().unwrap_or_else(|| json!({}));
                if let Value::Object(map) = &mut resource {
                    map.entry("id")
                        .or_insert_with(|| Value::String(operation.id().to_string()));
                }
                OperationOutcome::ok(201, resource)
            }
            Method::Update => {
                OperationOutcome::ok(200, operation.resource().cloned().unwrap_or(Value::Null))
            }
            Method::Delete => OperationOutcome::no_content(204),
            Method::Read => {
                let (resource_type, id) = operation
                    .target()
                    .split_once('/')
                    .unwrap_or((operation.target(), ""));
                OperationOutcome::ok(200, json!({"resourceType": resource_type, "id": id}))
            }
            Method::Search => {
                OperationOutcome::ok(200, json!({"resourceType": "Bundle", "entry": []}))
            }
        }
    }
}
