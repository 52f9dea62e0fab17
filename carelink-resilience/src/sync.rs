//! Differential synchronization.
//!
//! Each resource type carries a watermark: the start time of its last
//! successful sync pass. A pass asks only for records changed since the
//! watermark (`_lastUpdated=gt...`); a type with no watermark gets a full
//! search whose records all count as added. The watermark moves only after
//! the whole pass for that type succeeded, so a failed pass is simply
//! repeated next time.
//!
//! At most one pass runs at a time. The in-progress flag is taken before
//! the first suspension point and released by a guard, whatever the outcome.

use crate::batcher::RequestBatcher;
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{EventBus, ResilienceEvent};
use carelink_types::BatchOperation;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Search parameter carrying the change watermark.
const CHANGED_SINCE_PARAM: &str = "_lastUpdated";
/// Search parameter carrying the subject filter.
const SUBJECT_PARAM: &str = "patient";

/// Per-type watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub resource_type: String,
    pub last_sync_at: DateTime<Utc>,
}

/// Changes found for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    /// Only populated when the transport reports tombstones.
    pub deleted: Vec<String>,
}

impl ResourceChanges {
    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Result of one `sync_resources` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub changes: BTreeMap<String, ResourceChanges>,
}

impl SyncReport {
    pub fn total_changes(&self) -> usize {
        self.changes.values().map(ResourceChanges::total).sum()
    }
}

/// Releases the single-flight flag on drop.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tracks watermarks and runs differential sync passes.
pub struct DifferentialSyncEngine {
    batcher: Arc<RequestBatcher>,
    events: Arc<EventBus>,
    watermarks: RwLock<HashMap<String, DateTime<Utc>>>,
    in_progress: AtomicBool,
}

impl DifferentialSyncEngine {
    pub fn new(batcher: Arc<RequestBatcher>, events: Arc<EventBus>) -> Self {
        Self {
            batcher,
            events,
            watermarks: RwLock::new(HashMap::new()),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Syncs each type in order, optionally restricted to one subject.
    ///
    /// Fails with [`ResilienceError::SyncInProgress`] if another pass is
    /// running. If a type fails, the call stops with that type's error;
    /// types that already finished keep their advanced watermarks.
    pub async fn sync_resources(
        &self,
        resource_types: &[&str],
        subject_filter: Option<&str>,
    ) -> ResilienceResult<SyncReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ResilienceError::SyncInProgress);
        }
        let _guard = InProgressGuard(&self.in_progress);

        let started_at = Utc::now();
        let mut changes = BTreeMap::new();

        for resource_type in resource_types {
            match self.sync_type(resource_type, subject_filter, started_at).await {
                Ok(found) => {
                    self.events
                        .emit(&ResilienceEvent::SyncCompleted {
                            resource_type: resource_type.to_string(),
                            added: found.added.len(),
                            modified: found.modified.len(),
                            deleted: found.deleted.len(),
                        })
                        .await;
                    changes.insert(resource_type.to_string(), found);
                }
                Err(e) => {
                    warn!("sync of {} failed: {}", resource_type, e);
                    self.events
                        .emit(&ResilienceEvent::SyncFailed {
                            resource_type: resource_type.to_string(),
                            error: e.to_string(),
                        })
                        .await;
                    return Err(e);
                }
            }
        }

        Ok(SyncReport {
            started_at,
            completed_at: Utc::now(),
            changes,
        })
    }

    async fn sync_type(
        &self,
        resource_type: &str,
        subject_filter: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> ResilienceResult<ResourceChanges> {
        let watermark = self.watermark(resource_type).await;
        let operation = changed_since_search(resource_type, watermark, subject_filter);

        let outcome = self.batcher.execute_operation(&operation).await?;
        let data = outcome.data.unwrap_or(Value::Null);

        let mut found = ResourceChanges::default();
        for record in extract_records(&data) {
            let Some(id) = record.id else { continue };
            if record.deleted {
                found.deleted.push(id);
            } else if watermark.is_some() {
                found.modified.push(id);
            } else {
                found.added.push(id);
            }
        }

        self.watermarks
            .write()
            .await
            .insert(resource_type.to_string(), started_at);
        info!(
            resource_type,
            added = found.added.len(),
            modified = found.modified.len(),
            deleted = found.deleted.len(),
            "sync pass complete"
        );
        Ok(found)
    }

    pub async fn watermark(&self, resource_type: &str) -> Option<DateTime<Utc>> {
        self.watermarks.read().await.get(resource_type).copied()
    }

    /// Every watermark, sorted by resource type.
    pub async fn watermarks(&self) -> Vec<SyncWatermark> {
        let mut all: Vec<SyncWatermark> = self
            .watermarks
            .read()
            .await
            .iter()
            .map(|(ty, at)| SyncWatermark {
                resource_type: ty.clone(),
                last_sync_at: *at,
            })
            .collect();
        all.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        all
    }

    /// Forgets every watermark; the next pass per type is a full sync.
    pub async fn clear_watermarks(&self) {
        self.watermarks.write().await.clear();
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

/// Builds the search for records of `resource_type` changed after
/// `watermark` (or all records when there is none).
pub fn changed_since_search(
    resource_type: &str,
    watermark: Option<DateTime<Utc>>,
    subject_filter: Option<&str>,
) -> BatchOperation {
    let mut params: Vec<(String, String)> = Vec::new();
    if let Some(since) = watermark {
        params.push((
            CHANGED_SINCE_PARAM.to_string(),
            format!("gt{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ));
    }
    if let Some(subject) = subject_filter {
        params.push((SUBJECT_PARAM.to_string(), subject.to_string()));
    }
    BatchOperation::search(resource_type, params.as_slice())
}

/// A record found in a search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub id: Option<String>,
    pub deleted: bool,
}

/// Reads records from a bundle (`{"entry": [{"resource": {...}}]}`) or a
/// bare JSON array. An entry marked `"deleted": true` is a tombstone.
pub fn extract_records(data: &Value) -> Vec<SyncRecord> {
    let entries: &[Value] = match data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("entry") {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    };

    entries
        .iter()
        .map(|entry| {
            let resource = entry.get("resource").unwrap_or(entry);
            let deleted = entry.get("deleted").and_then(Value::as_bool).unwrap_or(false);
            SyncRecord {
                id: resource.get("id").and_then(Value::as_str).map(str::to_string),
                deleted,
            }
        })
        .collect()
}
