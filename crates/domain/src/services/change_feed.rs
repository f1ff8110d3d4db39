//! Per-project broadcast of committed pin changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::PinChange;

type Channels = Mutex<HashMap<String, Channel>>;

#[derive(Debug)]
struct Channel {
    generation: u64,
    sender: broadcast::Sender<PinChange>,
}

/// Fan-out of committed changes, one broadcast channel per project.
///
/// Publishers are the store's write path; listeners are subscription
/// forwarders. A channel is created on first listen and removed when its
/// last [`FeedListener`] is dropped.
#[derive(Debug)]
pub struct ChangeFeed {
    capacity: usize,
    next_generation: AtomicU64,
    channels: Arc<Channels>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_generation: AtomicU64::new(0),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn listen(&self, project_id: &str) -> FeedListener {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels
            .entry(project_id.to_string())
            .or_insert_with(|| Channel {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                sender: broadcast::channel(self.capacity).0,
            });

        FeedListener {
            project_id: project_id.to_string(),
            generation: channel.generation,
            receiver: channel.sender.subscribe(),
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Returns the number of listeners that received the change.
    pub fn publish(&self, project_id: &str, change: PinChange) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        match channels.get(project_id) {
            Some(channel) => channel.sender.send(change).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops the project's channel; open listeners observe `Closed`.
    pub fn close(&self, project_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels.remove(project_id).is_some() {
            debug!(project_id = %project_id, "Change feed closed");
        }
    }

    pub fn listener_count(&self, project_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(project_id)
            .map(|channel| channel.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of projects with an open channel.
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving end of one project's channel.
///
/// The last listener of a channel removes it from the feed on drop.
#[derive(Debug)]
pub struct FeedListener {
    project_id: String,
    generation: u64,
    receiver: broadcast::Receiver<PinChange>,
    channels: Weak<Channels>,
}

impl FeedListener {
    pub async fn recv(&mut self) -> Result<PinChange, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<PinChange, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock().unwrap_or_else(PoisonError::into_inner);
        // Our own receiver is still alive here, hence the count of one.
        let last = channels.get(&self.project_id).is_some_and(|channel| {
            channel.generation == self.generation && channel.sender.receiver_count() <= 1
        });
        if last {
            channels.remove(&self.project_id);
            debug!(project_id = %self.project_id, "Change feed released");
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_project_listeners_only() {
        let feed = ChangeFeed::new(8);
        let mut p1 = feed.listen("p1");
        let mut p2 = feed.listen("p2");

        assert_eq!(feed.publish("p1", PinChange::removed("v1", 1)), 1);

        assert_eq!(p1.recv().await.unwrap().pin_id, "v1");
        assert!(p2.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_listeners() {
        let feed = ChangeFeed::new(8);
        assert_eq!(feed.publish("p1", PinChange::removed("v1", 1)), 0);
    }

    #[tokio::test]
    async fn test_close_ends_listeners() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.listen("p1");
        feed.close("p1");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(feed.listener_count("p1"), 0);
    }

    #[test]
    fn test_last_listener_releases_channel() {
        let feed = ChangeFeed::new(8);
        let first = feed.listen("p1");
        let second = feed.listen("p1");
        drop(feed.listen("p2"));
        assert_eq!(feed.channel_count(), 1);

        drop(first);
        assert_eq!(feed.listener_count("p1"), 1);
        drop(second);
        assert_eq!(feed.channel_count(), 0);
    }

    #[test]
    fn test_many_short_lived_listeners_leave_no_channels() {
        let feed = ChangeFeed::new(8);
        for n in 0..1000 {
            drop(feed.listen(&format!("project-{}", n)));
        }
        assert_eq!(feed.channel_count(), 0);
    }

    #[test]
    fn test_stale_listener_keeps_reopened_channel() {
        let feed = ChangeFeed::new(8);
        let old = feed.listen("p1");
        feed.close("p1");
        let current = feed.listen("p1");

        drop(old);
        assert_eq!(feed.listener_count("p1"), 1);
        drop(current);
        assert_eq!(feed.channel_count(), 0);
    }
}
