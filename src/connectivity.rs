//! Online/offline signal
//!
//! [`Connectivity`] is a shared flag with change notifications. The auto-sync
//! driver replays the offline queue on start and whenever the flag goes from
//! offline to online.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::api::ApiClient;
use crate::queue::{OfflineQueue, ReportDelivery};
use crate::storage::QueueStore;

#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Subscribers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Sync once if online, then again on every offline -> online transition.
///
/// Runs until the connectivity channel closes; callers usually race it against
/// a shutdown signal.
pub async fn run_auto_sync<S, D>(queue: Arc<OfflineQueue<S, D>>)
where
    S: QueueStore,
    D: ReportDelivery,
{
    let mut rx = queue.connectivity().subscribe();
    let mut was_online = *rx.borrow_and_update();

    if was_online {
        sync_quietly(&queue).await;
    }

    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online && !was_online {
            sync_quietly(&queue).await;
        }
        was_online = online;
    }
}

async fn sync_quietly<S, D>(queue: &OfflineQueue<S, D>)
where
    S: QueueStore,
    D: ReportDelivery,
{
    match queue.sync().await {
        Ok(report) if report.delivered > 0 => {
            tracing::info!(
                delivered = report.delivered,
                remaining = report.remaining,
                "Offline reports synced"
            );
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "Offline sync failed"),
    }
}

/// Keep `connectivity` in line with the backend health endpoint.
pub async fn probe_loop(api: &ApiClient, connectivity: &Connectivity, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let online = match api.health_check().await {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::debug!(error = %err, "Health probe failed");
                false
            }
        };
        connectivity.set_online(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::report::{IssueResponse, Location, ReportDraft, ReportForm};
    use crate::storage::{MemoryQueueStore, QueuedReport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDelivery {
        calls: AtomicUsize,
    }

    impl ReportDelivery for CountingDelivery {
        async fn deliver(&self, _report: &ReportDraft) -> Result<IssueResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(IssueResponse::default())
        }
    }

    fn queued(category: &str) -> QueuedReport {
        let draft = ReportDraft::new(
            ReportForm {
                category: category.to_string(),
                description: "Drain blocked".to_string(),
                reporter_name: "Kiran".to_string(),
                reporter_phone: "9988776655".to_string(),
                gram_panchayat: "Tiptur".to_string(),
                address: None,
            },
            Some(Location::new(13.26, 76.47)),
        );
        QueuedReport::new(&draft, Location::new(13.26, 76.47), Vec::new())
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_set_online_only_notifies_on_change() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_auto_sync_runs_when_back_online() {
        let connectivity = Connectivity::new(false);
        let queue = Arc::new(OfflineQueue::new(
            MemoryQueueStore::with_reports(vec![queued("Roads"), queued("Water")]),
            CountingDelivery::default(),
            connectivity.clone(),
        ));

        let task = tokio::spawn(run_auto_sync(queue.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.delivery().calls.load(Ordering::SeqCst), 0);

        connectivity.set_online(true);
        wait_for(|| queue.store().snapshot().is_empty()).await;
        assert_eq!(queue.delivery().calls.load(Ordering::SeqCst), 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_auto_sync_runs_on_start_when_online() {
        let queue = Arc::new(OfflineQueue::new(
            MemoryQueueStore::with_reports(vec![queued("School")]),
            CountingDelivery::default(),
            Connectivity::new(true),
        ));

        let task = tokio::spawn(run_auto_sync(queue.clone()));
        wait_for(|| queue.store().snapshot().is_empty()).await;
        assert_eq!(queue.delivery().calls.load(Ordering::SeqCst), 1);

        task.abort();
    }
}
