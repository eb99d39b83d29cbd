//! Offline submission queue
//!
//! A report that can't be delivered at submit time is kept in a [`QueueStore`]
//! and replayed by [`OfflineQueue::sync`] once connectivity returns. Entries are
//! removed only after the backend accepts them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{should_queue_offline, ApiError};
use crate::attachment;
use crate::connectivity::Connectivity;
use crate::report::{IssueResponse, ReportDraft};
use crate::storage::{QueueStore, QueuedReport};

/// Sends a report to the backend.
pub trait ReportDelivery {
    fn deliver(
        &self,
        report: &ReportDraft,
    ) -> impl Future<Output = Result<IssueResponse, ApiError>> + Send;
}

/// What a sync pass does when an entry fails to deliver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Stop the pass; the failed entry and everything after it wait for the next pass.
    #[default]
    StopOnFirstFailure,
    /// Keep the failed entry and go on with the rest.
    SkipAndContinue,
}

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid report: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Offline storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Delivery(ApiError),
}

/// Result of [`OfflineQueue::submit`]
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Delivered(IssueResponse),
    /// Saved locally; will be sent when back online.
    Queued { id: String, reason: String },
}

/// Summary of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Entries still queued after the pass
    pub remaining: usize,
    /// Another pass was already running, nothing was done
    pub skipped: bool,
}

pub struct OfflineQueue<S, D> {
    store: S,
    delivery: D,
    connectivity: Connectivity,
    policy: SyncPolicy,
    syncing: AtomicBool,
}

/// Clears the in-progress flag when a pass ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S, D> OfflineQueue<S, D>
where
    S: QueueStore,
    D: ReportDelivery,
{
    pub fn new(store: S, delivery: D, connectivity: Connectivity) -> Self {
        Self {
            store,
            delivery,
            connectivity,
            policy: SyncPolicy::default(),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Deliver the report now, or queue it if we're offline or delivery fails.
    ///
    /// The draft is cleared only after a successful delivery.
    pub async fn submit(&self, draft: &mut ReportDraft) -> Result<SubmitOutcome, QueueError> {
        draft.validate().map_err(QueueError::Validation)?;

        if !self.connectivity.is_online() {
            let id = self.enqueue(draft).await?;
            return Ok(SubmitOutcome::Queued {
                id,
                reason: "offline".to_string(),
            });
        }

        match self.delivery.deliver(draft).await {
            Ok(response) => {
                tracing::info!(issue_id = ?response.effective_id(), "Report delivered");
                draft.clear();
                Ok(SubmitOutcome::Delivered(response))
            }
            Err(err) if should_queue_offline(&err) => {
                tracing::warn!(error = %err, "Submit failed, queueing offline");
                let id = self.enqueue(draft).await?;
                Ok(SubmitOutcome::Queued {
                    id,
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(QueueError::Delivery(err)),
        }
    }

    /// Save the report to the front of the queue and return its queue ID.
    pub async fn enqueue(&self, draft: &ReportDraft) -> Result<String, QueueError> {
        draft.validate().map_err(QueueError::Validation)?;
        let location = draft.location.ok_or_else(|| {
            QueueError::Validation(vec!["Location is required".to_string()])
        })?;

        let images = attachment::encode_all(&draft.images).await;
        let record = QueuedReport::new(draft, location, images);
        let id = record.id.clone();

        let mut queue = self.store.load().map_err(QueueError::Storage)?;
        queue.insert(0, record);
        self.store.save(&queue).map_err(QueueError::Storage)?;

        tracing::info!(id = %id, queued = queue.len(), "Report saved locally until back online");
        Ok(id)
    }

    /// Replay queued reports in stored order.
    ///
    /// Overlapping calls collapse into the pass already running.
    pub async fn sync(&self) -> Result<SyncReport, QueueError> {
        let Some(_guard) = SyncGuard::try_acquire(&self.syncing) else {
            tracing::debug!("Sync already in progress; skipping");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        };

        let pending = self.store.load().map_err(QueueError::Storage)?;
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }

        tracing::info!(pending = pending.len(), "Syncing offline reports");
        let mut report = SyncReport::default();

        for entry in pending {
            report.attempted += 1;
            let draft = entry.to_draft();

            match self.delivery.deliver(&draft).await {
                Ok(response) => {
                    self.remove(&entry.id)?;
                    report.delivered += 1;
                    tracing::info!(id = %entry.id, issue_id = ?response.effective_id(), "Queued report delivered");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::debug!(id = %entry.id, error = %err, "Queued report still undeliverable");
                    if self.policy == SyncPolicy::StopOnFirstFailure {
                        break;
                    }
                }
            }
        }

        report.remaining = self.store.load().map_err(QueueError::Storage)?.len();
        Ok(report)
    }

    /// Queued reports, newest first
    pub fn pending(&self) -> Result<Vec<QueuedReport>, QueueError> {
        self.store.load().map_err(QueueError::Storage)
    }

    fn remove(&self, id: &str) -> Result<(), QueueError> {
        // Re-read so entries queued during the pass survive.
        let mut queue = self.store.load().map_err(QueueError::Storage)?;
        queue.retain(|entry| entry.id != id);
        self.store.save(&queue).map_err(QueueError::Storage)
    }
}
