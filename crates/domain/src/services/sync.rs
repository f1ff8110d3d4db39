//! Live synchronisation of one project's pins into a local cache.
//!
//! A single task owns the subscription and the [`VillageCache`]; everyone
//! else sees immutable [`SyncSnapshot`]s through a `watch` channel. Local
//! edits go to the store and reach the cache only through the subscription.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::reconciliation::{ReconcileReport, VillageCache};
use super::store::{PinStore, StoreError, StoreEvent, SubscriptionHandle};
use crate::models::{Village, VillageDocument, VillageValidationError};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Connecting,
    Live,
    Reconnecting { attempt: u32, last_error: StoreError },
    Failed(StoreError),
    Stopped,
}

impl SyncStatus {
    /// The task has ended and will not change the cache again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Failed(_) | SyncStatus::Stopped)
    }
}

/// Read-only view of the sync state.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub project_id: String,
    pub status: SyncStatus,
    pub villages: Arc<BTreeMap<String, Village>>,
    pub last_report: Option<ReconcileReport>,
    pub batches_applied: u64,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid village: {0}")]
    Validation(#[from] VillageValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the reconciliation task for one project.
///
/// Dropping it cancels the task and its subscription.
pub struct ProjectSync {
    project_id: String,
    store: Arc<dyn PinStore>,
    snapshots: watch::Receiver<SyncSnapshot>,
    token: CancellationToken,
    current: Arc<Mutex<Option<SubscriptionHandle>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProjectSync {
    pub fn start(store: Arc<dyn PinStore>, project_id: impl Into<String>, backoff: Backoff) -> Self {
        let project_id = project_id.into();
        let (tx, rx) = watch::channel(SyncSnapshot {
            project_id: project_id.clone(),
            status: SyncStatus::Connecting,
            villages: Arc::new(BTreeMap::new()),
            last_report: None,
            batches_applied: 0,
        });
        let token = CancellationToken::new();
        let current = Arc::new(Mutex::new(None));

        let worker = SyncWorker {
            store: store.clone(),
            project_id: project_id.clone(),
            backoff,
            token: token.clone(),
            current: current.clone(),
            tx,
            cache: VillageCache::new(),
            batches_applied: 0,
            last_report: None,
        };
        let task = tokio::spawn(worker.run());

        info!(project_id = %project_id, "Project sync started");
        Self {
            project_id,
            store,
            snapshots: rx,
            token,
            current,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    pub fn current(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn village(&self, pin_id: &str) -> Option<Village> {
        self.snapshots.borrow().villages.get(pin_id).cloned()
    }

    /// Validates and writes a village. The cache is not touched here.
    pub async fn save(&self, pin_id: &str, document: VillageDocument) -> Result<Village, SyncError> {
        let village = Village::from_document(pin_id, document)?;
        self.store.write(&self.project_id, &village).await?;
        debug!(project_id = %self.project_id, pin_id = %pin_id, "Village written");
        Ok(village)
    }

    pub async fn remove(&self, pin_id: &str) -> Result<(), SyncError> {
        self.store.delete(&self.project_id, pin_id).await?;
        debug!(project_id = %self.project_id, pin_id = %pin_id, "Village deleted");
        Ok(())
    }

    /// Stops the task and unsubscribes before returning.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(handle) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.unsubscribe();
        }
    }

    /// Cancels and waits for the task to finish.
    pub async fn stop(&self) {
        self.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(project_id = %self.project_id, error = %e, "Sync task ended abnormally");
            }
        }
    }

    /// Waits until a snapshot satisfies `predicate`. `None` if the task ended
    /// first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<SyncSnapshot>
    where
        F: FnMut(&SyncSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        rx.wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }
}

impl Drop for ProjectSync {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ProjectSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSync")
            .field("project_id", &self.project_id)
            .field("status", &self.snapshots.borrow().status)
            .finish()
    }
}

struct SyncWorker {
    store: Arc<dyn PinStore>,
    project_id: String,
    backoff: Backoff,
    token: CancellationToken,
    current: Arc<Mutex<Option<SubscriptionHandle>>>,
    tx: watch::Sender<SyncSnapshot>,
    cache: VillageCache,
    batches_applied: u64,
    last_report: Option<ReconcileReport>,
}

impl SyncWorker {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            let error = match self.session(&mut attempt).await {
                Some(error) => error,
                None => break,
            };

            if !error.is_retryable() {
                warn!(project_id = %self.project_id, error = %error, "Project sync failed");
                self.publish(SyncStatus::Failed(error));
                return;
            }

            attempt += 1;
            let Some(delay) = self.backoff.delay_for(attempt) else {
                warn!(
                    project_id = %self.project_id,
                    attempts = attempt - 1,
                    error = %error,
                    "Project sync giving up"
                );
                self.publish(SyncStatus::Failed(error));
                return;
            };

            warn!(
                project_id = %self.project_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Re-subscribing after store error"
            );
            self.publish(SyncStatus::Reconnecting {
                attempt,
                last_error: error,
            });

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(SyncStatus::Stopped);
        info!(project_id = %self.project_id, "Project sync stopped");
    }

    /// One subscription's lifetime. `None` means cancelled.
    async fn session(&mut self, attempt: &mut u32) -> Option<StoreError> {
        let subscribed = tokio::select! {
            _ = self.token.cancelled() => return None,
            result = self.store.subscribe(&self.project_id) => result,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => return Some(e),
        };

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription.handle());
        if self.token.is_cancelled() {
            subscription.handle().unsubscribe();
            return None;
        }

        let outcome = loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break None,
                event = subscription.next_event() => event,
            };
            match event {
                Some(StoreEvent::Snapshot(batch)) => {
                    *attempt = 0;
                    let report = self.cache.apply_batch(&batch);
                    self.batches_applied += 1;
                    self.last_report = Some(report);
                    self.publish(SyncStatus::Live);
                }
                Some(StoreEvent::Error(e)) => break Some(e),
                None if self.token.is_cancelled() => break None,
                None => {
                    break Some(StoreError::Connection(
                        "subscription ended unexpectedly".to_string(),
                    ))
                }
            }
        };

        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        subscription.handle().unsubscribe();
        outcome
    }

    fn publish(&self, status: SyncStatus) {
        self.tx.send_replace(SyncSnapshot {
            project_id: self.project_id.clone(),
            status,
            villages: Arc::new(self.cache.villages().clone()),
            last_report: self.last_report.clone(),
            batches_applied: self.batches_applied,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PinChange, VillageStatus};
    use crate::services::memory_store::MemoryPinStore;
    use serde_json::json;
    use std::time::Duration;

    fn document(name: &str, status: &str) -> VillageDocument {
        VillageDocument::from_json(json!({
            "name": name,
            "status": status,
            "location": {"lat": 26.9, "lng": 75.8}
        }))
        .unwrap()
    }

    fn fast_backoff(max_attempts: u32) -> Backoff {
        Backoff::new(Duration::from_millis(5), Duration::from_millis(20), max_attempts)
    }

    async fn wait(sync: &ProjectSync, predicate: impl FnMut(&SyncSnapshot) -> bool) -> SyncSnapshot {
        tokio::time::timeout(Duration::from_secs(5), sync.wait_for(predicate))
            .await
            .expect("timed out waiting for sync")
            .expect("sync task ended")
    }

    #[tokio::test]
    async fn test_writes_reach_cache_through_subscription() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        wait(&sync, |s| s.status == SyncStatus::Live).await;

        sync.save("v1", document("Alpha", "planned")).await.unwrap();
        let snapshot = wait(&sync, |s| s.villages.contains_key("v1")).await;
        assert_eq!(snapshot.villages["v1"].name, "Alpha");

        sync.save("v1", document("Alpha", "visited")).await.unwrap();
        wait(&sync, |s| {
            s.villages
                .get("v1")
                .map(|v| v.status == VillageStatus::Visited)
                .unwrap_or(false)
        })
        .await;

        sync.remove("v1").await.unwrap();
        let snapshot = wait(&sync, |s| s.villages.is_empty()).await;
        assert!(snapshot.batches_applied >= 4);
    }

    #[tokio::test]
    async fn test_invalid_document_never_reaches_store() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));

        let missing_location =
            VillageDocument::from_json(json!({"name": "Alpha", "status": "planned"})).unwrap();
        let err = sync.save("v1", missing_location).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Validation(VillageValidationError::MissingField("location"))
        ));
        assert!(store.pins("p1").is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        wait(&sync, |s| s.status == SyncStatus::Live).await;

        store.fail_next_write(StoreError::PermissionDenied("read-only".into()));
        let err = sync.save("v1", document("Alpha", "planned")).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(StoreError::PermissionDenied(_))));
        assert!(sync.current().villages.is_empty());
        assert!(sync.village("v1").is_none());
    }

    #[tokio::test]
    async fn test_resubscribes_after_connection_failure() {
        let store = MemoryPinStore::new();
        store
            .write(
                "p1",
                &Village::from_document("v1", document("Alpha", "planned")).unwrap(),
            )
            .await
            .unwrap();
        store.fail_next_subscribe(StoreError::Connection("offline".into()));

        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        let snapshot = wait(&sync, |s| s.status == SyncStatus::Live).await;
        assert!(snapshot.villages.contains_key("v1"));
    }

    #[tokio::test]
    async fn test_gives_up_after_backoff_exhausted() {
        let store = MemoryPinStore::new();
        store.fail_next_subscribe(StoreError::Connection("offline".into()));

        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", Backoff::none());
        let snapshot = wait(&sync, |s| s.status.is_terminal()).await;
        assert_eq!(
            snapshot.status,
            SyncStatus::Failed(StoreError::Connection("offline".into()))
        );
    }

    #[tokio::test]
    async fn test_closed_project_fails_without_retry() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(5));
        wait(&sync, |s| s.status == SyncStatus::Live).await;

        store.close_project("p1");
        let snapshot = wait(&sync, |s| s.status.is_terminal()).await;
        assert_eq!(
            snapshot.status,
            SyncStatus::Failed(StoreError::ProjectClosed("p1".into()))
        );
        assert_eq!(store.active_subscriptions("p1"), 0);
    }

    #[tokio::test]
    async fn test_bad_record_does_not_stop_sync() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        wait(&sync, |s| s.status == SyncStatus::Live).await;

        let version = store.next_version();
        store.publish_raw("p1", PinChange::patch("broken", json!({"status": "lost"}), version));
        let snapshot = wait(&sync, |s| {
            s.last_report
                .as_ref()
                .map(|r| !r.rejected.is_empty())
                .unwrap_or(false)
        })
        .await;
        assert_eq!(snapshot.status, SyncStatus::Live);

        sync.save("v2", document("Beta", "planned")).await.unwrap();
        wait(&sync, |s| s.villages.contains_key("v2")).await;
    }

    #[tokio::test]
    async fn test_cancel_unsubscribes_immediately() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        wait(&sync, |s| s.status == SyncStatus::Live).await;
        assert_eq!(store.active_subscriptions("p1"), 1);

        sync.cancel();
        assert_eq!(store.active_subscriptions("p1"), 0);

        sync.stop().await;
        assert_eq!(sync.current().status, SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let store = MemoryPinStore::new();
        let sync = ProjectSync::start(Arc::new(store.clone()), "p1", fast_backoff(3));
        wait(&sync, |s| s.status == SyncStatus::Live).await;

        drop(sync);
        assert_eq!(store.active_subscriptions("p1"), 0);
    }
}
