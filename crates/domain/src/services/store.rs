//! Remote pin store contract.
//!
//! A store holds one pin collection per project (`projects/{id}/pins`).
//! Subscribers receive an initial snapshot followed by deltas; writes and
//! deletes are acknowledged once the store has applied them, and the change
//! then comes back through every open subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::change_feed::{ChangeFeed, FeedListener};
use crate::models::{PinChange, SnapshotBatch, Village};

/// Deltas that are already queued when one arrives are sent as one batch,
/// up to this many.
const MAX_DELTA_BATCH: usize = 64;

/// Failures reported by a pin store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Project {0} was closed")]
    ProjectClosed(String),
}

impl StoreError {
    /// Whether re-subscribing or retrying can succeed without outside action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

/// Item delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Snapshot(SnapshotBatch),
    Error(StoreError),
}

/// Cancellation handle for one subscription.
///
/// Clones share the same underlying token; `unsubscribe` is idempotent.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    project_id: String,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            debug!(subscription_id = %self.id, project_id = %self.project_id, "Unsubscribing");
            self.token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Completes once the subscription has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// An open subscription to a project's pins.
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    events: mpsc::Receiver<StoreEvent>,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, events: mpsc::Receiver<StoreEvent>) -> Self {
        Self { handle, events }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn project_id(&self) -> &str {
        self.handle.project_id()
    }

    /// Next event, or `None` once the subscription is cancelled or the store
    /// has ended it.
    pub async fn next_event(&mut self) -> Option<StoreEvent> {
        tokio::select! {
            biased;
            _ = self.handle.token.cancelled() => None,
            event = self.events.recv() => event,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Real-time document store for project pins.
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Opens a subscription; the first event is the initial snapshot.
    async fn subscribe(&self, project_id: &str) -> Result<Subscription, StoreError>;

    /// Creates or replaces a pin.
    async fn write(&self, project_id: &str, village: &Village) -> Result<(), StoreError>;

    /// Deletes a pin; `NotFound` if it does not exist.
    async fn delete(&self, project_id: &str, pin_id: &str) -> Result<(), StoreError>;
}

/// Source of full snapshots for [`spawn_forwarder`].
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Every pin in the project as an `added` change, and every deleted pin
    /// as a `removed` change at its deletion version, in a stable order.
    async fn snapshot(&self, project_id: &str) -> Result<Vec<PinChange>, StoreError>;
}

/// Opens a subscription that bridges the change feed into a bounded channel.
///
/// The feed is joined before the snapshot is read, so no change committed in
/// between is lost; a change seen in both is filtered by its version on the
/// consuming side. A subscriber that falls behind the feed gets a fresh
/// initial snapshot.
pub fn spawn_forwarder<S: SnapshotSource>(
    source: Arc<S>,
    feed: &ChangeFeed,
    project_id: &str,
    buffer: usize,
) -> Subscription {
    let handle = SubscriptionHandle::new(project_id);
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let feed_rx = feed.listen(project_id);

    tokio::spawn(forward(
        source,
        project_id.to_string(),
        feed_rx,
        tx,
        handle.token.clone(),
    ));

    Subscription::new(handle, rx)
}

async fn forward<S: SnapshotSource>(
    source: Arc<S>,
    project_id: String,
    mut feed_rx: FeedListener,
    tx: mpsc::Sender<StoreEvent>,
    token: CancellationToken,
) {
    if !send_initial(source.as_ref(), &project_id, &tx, &token).await {
        return;
    }

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = feed_rx.recv() => received,
        };

        match received {
            Ok(change) => {
                let mut changes = vec![change];
                let mut lagged = false;
                while changes.len() < MAX_DELTA_BATCH {
                    match feed_rx.try_recv() {
                        Ok(next) => changes.push(next),
                        Err(broadcast::error::TryRecvError::Lagged(_)) => {
                            lagged = true;
                            break;
                        }
                        Err(_) => break,
                    }
                }
                let event = StoreEvent::Snapshot(SnapshotBatch::delta(changes));
                if !deliver(&tx, &token, event).await {
                    break;
                }
                if lagged && !resync(source.as_ref(), &project_id, &tx, &token).await {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(project_id = %project_id, skipped, "Subscriber lagged behind change feed");
                if !resync(source.as_ref(), &project_id, &tx, &token).await {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                let closed = StoreError::ProjectClosed(project_id.clone());
                deliver(&tx, &token, StoreEvent::Error(closed)).await;
                break;
            }
        }
    }

    debug!(project_id = %project_id, "Subscription forwarder stopped");
}

async fn resync<S: SnapshotSource>(
    source: &S,
    project_id: &str,
    tx: &mpsc::Sender<StoreEvent>,
    token: &CancellationToken,
) -> bool {
    debug!(project_id = %project_id, "Resynchronising subscriber with a full snapshot");
    send_initial(source, project_id, tx, token).await
}

async fn send_initial<S: SnapshotSource>(
    source: &S,
    project_id: &str,
    tx: &mpsc::Sender<StoreEvent>,
    token: &CancellationToken,
) -> bool {
    match source.snapshot(project_id).await {
        Ok(changes) => {
            let event = StoreEvent::Snapshot(SnapshotBatch::initial(changes));
            deliver(tx, token, event).await
        }
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "Snapshot failed");
            deliver(tx, token, StoreEvent::Error(e)).await;
            false
        }
    }
}

/// Sends unless cancelled first; `false` means the subscription is over.
async fn deliver(
    tx: &mpsc::Sender<StoreEvent>,
    token: &CancellationToken,
    event: StoreEvent,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Decorator that bounds every store operation by a timeout.
pub struct TimedPinStore {
    inner: Arc<dyn PinStore>,
    timeout: Duration,
}

impl TimedPinStore {
    pub fn new(inner: Arc<dyn PinStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl PinStore for TimedPinStore {
    async fn subscribe(&self, project_id: &str) -> Result<Subscription, StoreError> {
        tokio::time::timeout(self.timeout, self.inner.subscribe(project_id))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    async fn write(&self, project_id: &str, village: &Village) -> Result<(), StoreError> {
        tokio::time::timeout(self.timeout, self.inner.write(project_id, village))
            .await
            .map_err(|_| {
                warn!(project_id = %project_id, pin_id = %village.id, "Pin write timed out");
                StoreError::Timeout(self.timeout)
            })?
    }

    async fn delete(&self, project_id: &str, pin_id: &str) -> Result<(), StoreError> {
        tokio::time::timeout(self.timeout, self.inner.delete(project_id, pin_id))
            .await
            .map_err(|_| {
                warn!(project_id = %project_id, pin_id = %pin_id, "Pin delete timed out");
                StoreError::Timeout(self.timeout)
            })?
    }
}
