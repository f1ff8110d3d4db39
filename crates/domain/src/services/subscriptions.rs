//! Tracking of open subscriptions per owner.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::store::SubscriptionHandle;

/// Keeps every live [`SubscriptionHandle`] grouped by owner so that an
/// owner's subscriptions can be cancelled together, e.g. on logout.
#[derive(Debug)]
pub struct SubscriptionRegistry<K> {
    handles: Mutex<HashMap<K, Vec<SubscriptionHandle>>>,
}

impl<K: Eq + Hash + Clone> SubscriptionRegistry<K> {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, owner: K, handle: SubscriptionHandle) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = handles.entry(owner).or_default();
        entry.retain(SubscriptionHandle::is_active);
        entry.push(handle);
    }

    /// Forgets one subscription once its consumer has gone away.
    /// Returns whether it was registered.
    pub fn release(&self, owner: &K, subscription_id: Uuid) -> bool {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handles.get_mut(owner) else {
            return false;
        };
        let before = list.len();
        list.retain(|handle| handle.id() != subscription_id);
        let released = list.len() < before;
        if list.is_empty() {
            handles.remove(owner);
        }
        released
    }

    /// Number of owners with at least one registered subscription.
    pub fn owner_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancels and forgets every subscription of `owner`.
    /// Returns how many were still active.
    pub fn cancel_owner(&self, owner: &K) -> usize {
        let removed = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.remove(owner).unwrap_or_default()
        };
        cancel(removed)
    }

    pub fn cancel_all(&self) -> usize {
        let removed: Vec<_> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain().flat_map(|(_, list)| list).collect()
        };
        cancel(removed)
    }

    pub fn active_count(&self, owner: &K) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .get(owner)
            .map(|list| list.iter().filter(|h| h.is_active()).count())
            .unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .values()
            .flat_map(|list| list.iter())
            .filter(|h| h.is_active())
            .count()
    }
}

impl<K: Eq + Hash + Clone> Default for SubscriptionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel(handles: Vec<SubscriptionHandle>) -> usize {
    handles
        .into_iter()
        .filter(|handle| {
            let was_active = handle.is_active();
            handle.unsubscribe();
            was_active
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_owner_only_touches_that_owner() {
        let registry = SubscriptionRegistry::new();
        let a1 = SubscriptionHandle::new("p1");
        let a2 = SubscriptionHandle::new("p2");
        let b1 = SubscriptionHandle::new("p1");
        registry.register("alice", a1.clone());
        registry.register("alice", a2.clone());
        registry.register("bob", b1.clone());

        assert_eq!(registry.active_count(&"alice"), 2);
        assert_eq!(registry.cancel_owner(&"alice"), 2);

        assert!(!a1.is_active());
        assert!(!a2.is_active());
        assert!(b1.is_active());
        assert_eq!(registry.total_active(), 1);
    }

    #[test]
    fn test_already_cancelled_handles_are_not_counted() {
        let registry = SubscriptionRegistry::new();
        let handle = SubscriptionHandle::new("p1");
        registry.register(1u32, handle.clone());
        handle.unsubscribe();

        assert_eq!(registry.active_count(&1), 0);
        assert_eq!(registry.cancel_owner(&1), 0);
    }

    #[test]
    fn test_register_prunes_inactive_handles() {
        let registry = SubscriptionRegistry::new();
        let stale = SubscriptionHandle::new("p1");
        registry.register(1u32, stale.clone());
        stale.unsubscribe();
        registry.register(1u32, SubscriptionHandle::new("p1"));

        assert_eq!(registry.active_count(&1), 1);
        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.total_active(), 0);
    }

    #[test]
    fn test_release_forgets_finished_streams() {
        let registry = SubscriptionRegistry::new();
        let first = SubscriptionHandle::new("p1");
        let second = SubscriptionHandle::new("p2");
        registry.register(7u32, first.clone());
        registry.register(7u32, second.clone());

        assert!(registry.release(&7, first.id()));
        assert!(!registry.release(&7, first.id()));
        assert_eq!(registry.active_count(&7), 1);

        assert!(registry.release(&7, second.id()));
        assert_eq!(registry.owner_count(), 0);
    }

    #[test]
    fn test_released_owners_do_not_accumulate() {
        let registry = SubscriptionRegistry::new();
        for owner in 0..1000u32 {
            let handle = SubscriptionHandle::new("p1");
            registry.register(owner, handle.clone());
            handle.unsubscribe();
            registry.release(&owner, handle.id());
        }
        assert_eq!(registry.owner_count(), 0);
    }
}
