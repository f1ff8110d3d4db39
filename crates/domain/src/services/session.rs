//! Authenticated session context.
//!
//! Owns the current identity and every subscription opened on its behalf,
//! so that signing out leaves nothing listening.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::backoff::Backoff;
use super::store::{PinStore, SubscriptionHandle};
use super::subscriptions::SubscriptionRegistry;
use super::sync::ProjectSync;
use crate::models::{Credentials, Identity};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired")]
    Expired,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Identity provider error: {0}")]
    Provider(String),
}

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn sign_out(&self, identity: &Identity) -> Result<(), AuthError>;
}

pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    identity: watch::Sender<Option<Identity>>,
    active_project: Mutex<Option<Arc<ProjectSync>>>,
    subscriptions: SubscriptionRegistry<Uuid>,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            provider,
            identity,
            active_project: Mutex::new(None),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    /// Signs in, replacing any previous identity.
    pub async fn login(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let identity = self.provider.sign_in(credentials).await?;

        if let Some(previous) = self.current_identity() {
            self.teardown();
            if let Err(e) = self.provider.sign_out(&previous).await {
                warn!(user_id = %previous.user_id, error = %e, "Sign-out of replaced identity failed");
            }
        }

        info!(user_id = %identity.user_id, "Signed in");
        self.identity.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    /// Tears down every subscription, then clears the identity.
    pub async fn logout(&self) {
        self.teardown();
        let Some(previous) = self.identity.send_replace(None) else {
            return;
        };
        if let Err(e) = self.provider.sign_out(&previous).await {
            warn!(user_id = %previous.user_id, error = %e, "Provider sign-out failed");
        }
        info!(user_id = %previous.user_id, "Signed out");
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_some()
    }

    pub fn on_auth_state_change(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    /// Starts syncing `project_id`, stopping whichever project was active.
    pub fn activate_project(
        &self,
        store: Arc<dyn PinStore>,
        project_id: &str,
        backoff: Backoff,
    ) -> Result<Arc<ProjectSync>, AuthError> {
        if !self.is_authenticated() {
            return Err(AuthError::NotSignedIn);
        }

        let mut active = self
            .active_project
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            if current.project_id() == project_id && !current.current().status.is_terminal() {
                return Ok(current.clone());
            }
        }
        if let Some(previous) = active.take() {
            previous.cancel();
        }

        let sync = Arc::new(ProjectSync::start(store, project_id, backoff));
        *active = Some(sync.clone());
        Ok(sync)
    }

    pub fn deactivate_project(&self) {
        let previous = self
            .active_project
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    pub fn active_project(&self) -> Option<Arc<ProjectSync>> {
        self.active_project
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ties a subscription to the signed-in user so logout cancels it.
    pub fn track_subscription(&self, handle: SubscriptionHandle) -> Result<(), AuthError> {
        let identity = self.current_identity().ok_or(AuthError::NotSignedIn)?;
        self.subscriptions.register(identity.user_id, handle);
        Ok(())
    }

    pub fn active_subscription_count(&self) -> usize {
        self.subscriptions.total_active()
    }

    /// Logs out if the access token has expired. Returns whether it did.
    pub async fn expire_if_needed(&self, now: DateTime<Utc>) -> bool {
        let expired = self
            .identity
            .borrow()
            .as_ref()
            .map(|identity| identity.is_expired(now))
            .unwrap_or(false);
        if expired {
            info!("Access token expired, signing out");
            self.logout().await;
        }
        expired
    }

    fn teardown(&self) {
        self.deactivate_project();
        let cancelled = self.subscriptions.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled session subscriptions");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
