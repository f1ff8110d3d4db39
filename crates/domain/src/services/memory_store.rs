//! In-process pin store.
//!
//! Used for tests and local development. Behaves like the Postgres store:
//! global monotonic versions, an initial snapshot per subscription, and
//! write acknowledgement after the change is visible to subscribers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::change_feed::ChangeFeed;
use super::store::{
    spawn_forwarder, PinStore, SnapshotSource, StoreError, Subscription, SubscriptionHandle,
};
use crate::models::{PinChange, Village};

const DEFAULT_BUFFER: usize = 64;

/// A stored pin, or the tombstone left by its deletion.
#[derive(Debug, Clone)]
struct Entry {
    village: Option<Village>,
    version: i64,
}

#[derive(Debug)]
struct MemoryInner {
    projects: Mutex<HashMap<String, BTreeMap<String, Entry>>>,
    feed: ChangeFeed,
    version: AtomicI64,
    buffer: usize,
    fail_next_subscribe: Mutex<Option<StoreError>>,
    fail_next_write: Mutex<Option<StoreError>>,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

/// Cloneable handle to a shared in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryPinStore {
    inner: Arc<MemoryInner>,
}

impl MemoryPinStore {
    pub fn new() -> Self {
        Self::with_capacity(256, DEFAULT_BUFFER)
    }

    /// `feed_capacity` bounds the per-project broadcast; `buffer` bounds each
    /// subscriber's queue.
    pub fn with_capacity(feed_capacity: usize, buffer: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                projects: Mutex::new(HashMap::new()),
                feed: ChangeFeed::new(feed_capacity),
                version: AtomicI64::new(0),
                buffer,
                fail_next_subscribe: Mutex::new(None),
                fail_next_write: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The next `subscribe` call fails with `error`.
    pub fn fail_next_subscribe(&self, error: StoreError) {
        *self
            .inner
            .fail_next_subscribe
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// The next `write` or `delete` call fails with `error`.
    pub fn fail_next_write(&self, error: StoreError) {
        *self
            .inner
            .fail_next_write
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Subscriptions on `project_id` that have not been cancelled.
    pub fn active_subscriptions(&self, project_id: &str) -> usize {
        let mut handles = self.inner.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(SubscriptionHandle::is_active);
        handles
            .iter()
            .filter(|h| h.project_id() == project_id)
            .count()
    }

    pub fn pins(&self, project_id: &str) -> Vec<Village> {
        let projects = self.inner.projects.lock().unwrap_or_else(PoisonError::into_inner);
        projects
            .get(project_id)
            .map(|pins| pins.values().filter_map(|e| e.village.clone()).collect())
            .unwrap_or_default()
    }

    /// Broadcasts a change without storing it, as if another writer had
    /// produced it.
    pub fn publish_raw(&self, project_id: &str, change: PinChange) -> usize {
        self.inner.feed.publish(project_id, change)
    }

    pub fn next_version(&self) -> i64 {
        self.inner.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Deletes the project; open subscriptions receive `ProjectClosed`.
    pub fn close_project(&self, project_id: &str) {
        let mut projects = self.inner.projects.lock().unwrap_or_else(PoisonError::into_inner);
        projects.remove(project_id);
        self.inner.feed.close(project_id);
    }

    fn take_failure(slot: &Mutex<Option<StoreError>>) -> Result<(), StoreError> {
        match slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for MemoryPinStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSource for MemoryInner {
    async fn snapshot(&self, project_id: &str) -> Result<Vec<PinChange>, StoreError> {
        let projects = self.projects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(projects
            .get(project_id)
            .map(|pins| {
                pins.iter()
                    .map(|(pin_id, entry)| match &entry.village {
                        Some(village) => PinChange::added(village, entry.version),
                        None => PinChange::removed(pin_id.clone(), entry.version),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl PinStore for MemoryPinStore {
    async fn subscribe(&self, project_id: &str) -> Result<Subscription, StoreError> {
        Self::take_failure(&self.inner.fail_next_subscribe)?;

        let subscription = spawn_forwarder(
            self.inner.clone(),
            &self.inner.feed,
            project_id,
            self.inner.buffer,
        );
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription.handle());

        debug!(project_id = %project_id, "Memory store subscription opened");
        Ok(subscription)
    }

    async fn write(&self, project_id: &str, village: &Village) -> Result<(), StoreError> {
        Self::take_failure(&self.inner.fail_next_write)?;

        let mut projects = self.inner.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let pins = projects.entry(project_id.to_string()).or_default();
        let version = self.next_version();
        let live = pins
            .get(&village.id)
            .is_some_and(|entry| entry.village.is_some());
        let change = if live {
            PinChange::modified(village, version)
        } else {
            PinChange::added(village, version)
        };
        pins.insert(
            village.id.clone(),
            Entry {
                village: Some(village.clone()),
                version,
            },
        );
        self.inner.feed.publish(project_id, change);
        Ok(())
    }

    async fn delete(&self, project_id: &str, pin_id: &str) -> Result<(), StoreError> {
        Self::take_failure(&self.inner.fail_next_write)?;

        let mut projects = self.inner.projects.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = projects
            .get_mut(project_id)
            .and_then(|pins| pins.get_mut(pin_id))
            .filter(|entry| entry.village.is_some())
            .ok_or_else(|| StoreError::NotFound(format!("pin {}", pin_id)))?;
        let version = self.next_version();
        *entry = Entry {
            village: None,
            version,
        };
        self.inner
            .feed
            .publish(project_id, PinChange::removed(pin_id, version));
        Ok(())
    }
}
