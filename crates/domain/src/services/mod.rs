//! Domain services for GoMapper.
//!
//! The store contract and its supporting pieces come first; the client core
//! (reconciliation, sync, map search, session, shell) is built on top.

pub mod backoff;
pub mod change_feed;
pub mod insights;
pub mod map_search;
pub mod memory_store;
pub mod reconciliation;
pub mod session;
pub mod shell;
pub mod store;
pub mod subscriptions;
pub mod sync;

pub use backoff::Backoff;
pub use change_feed::{ChangeFeed, FeedListener};
pub use insights::{contact_directory, villages_near, ContactEntry, VisitSummary};
pub use map_search::{GeocodeResult, MapSearchSession, SearchState};
pub use memory_store::MemoryPinStore;
pub use reconciliation::{ChangeOutcome, ReconcileReport, RejectedChange, VillageCache};
pub use session::{AuthError, IdentityProvider, Session};
pub use shell::{resolve_path, Chrome, NavLink, Resolution, Route};
pub use store::{
    spawn_forwarder, PinStore, SnapshotSource, StoreError, StoreEvent, Subscription,
    SubscriptionHandle, TimedPinStore,
};
pub use subscriptions::SubscriptionRegistry;
pub use sync::{ProjectSync, SyncError, SyncSnapshot, SyncStatus};
