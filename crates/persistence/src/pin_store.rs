//! PostgreSQL-backed pin store.
//!
//! Pins live in the `pins` table; every committed write is published on a
//! shared [`ChangeFeed`] so that open subscriptions see it. A subscription's
//! initial snapshot is read from the table after it has joined the feed and
//! includes tombstones of deleted pins.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};

use domain::models::{ChangeKind, PinChange, Village};
use domain::services::{
    spawn_forwarder, ChangeFeed, PinStore, SnapshotSource, StoreError, Subscription,
};

use crate::metrics::{record_pin_change, record_subscription_opened};
use crate::repositories::PinRepository;

#[async_trait]
impl SnapshotSource for PinRepository {
    async fn snapshot(&self, project_id: &str) -> Result<Vec<PinChange>, StoreError> {
        let rows = self
            .snapshot_rows(project_id)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(|row| row.into_change()).collect())
    }
}

#[derive(Clone)]
pub struct PgPinStore {
    pins: Arc<PinRepository>,
    feed: Arc<ChangeFeed>,
    buffer: usize,
}

impl PgPinStore {
    /// `buffer` bounds each subscriber's event queue.
    pub fn new(pool: PgPool, feed: Arc<ChangeFeed>, buffer: usize) -> Self {
        Self {
            pins: Arc::new(PinRepository::new(pool)),
            feed,
            buffer,
        }
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Ends every subscription on a deleted project.
    pub fn close_project(&self, project_id: &str) {
        self.feed.close(project_id);
    }

    fn publish(&self, project_id: &str, change: PinChange) {
        record_pin_change(change.kind);
        let delivered = self.feed.publish(project_id, change);
        debug!(project_id = %project_id, listeners = delivered, "Published pin change");
    }
}

#[async_trait]
impl PinStore for PgPinStore {
    async fn subscribe(&self, project_id: &str) -> Result<Subscription, StoreError> {
        record_subscription_opened();
        Ok(spawn_forwarder(
            self.pins.clone(),
            &self.feed,
            project_id,
            self.buffer,
        ))
    }

    async fn write(&self, project_id: &str, village: &Village) -> Result<(), StoreError> {
        let written = self
            .pins
            .upsert(project_id, village)
            .await
            .map_err(store_error)?;

        let change = match written.change_kind() {
            ChangeKind::Added => PinChange::added(village, written.version),
            _ => PinChange::modified(village, written.version),
        };
        self.publish(project_id, change);
        Ok(())
    }

    async fn delete(&self, project_id: &str, pin_id: &str) -> Result<(), StoreError> {
        let version = self
            .pins
            .delete(project_id, pin_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| StoreError::NotFound(format!("pin {}", pin_id)))?;

        self.publish(project_id, PinChange::removed(pin_id, version));
        Ok(())
    }
}

/// Maps database failures onto the store's error kinds.
pub fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::NotFound("project not found".to_string())
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Connection("timed out waiting for a database connection".to_string())
        }
        other => {
            error!(error = %other, "Pin store database error");
            StoreError::Connection(other.to_string())
        }
    }
}
