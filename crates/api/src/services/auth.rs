//! Email/password accounts and server-side sessions.
//!
//! Every sign-in creates a `user_sessions` row whose id is carried in both
//! tokens as `sid`. Refresh rotates the stored fingerprint, and signing out
//! deletes the row, which invalidates outstanding access tokens as well.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use domain::models::{Credentials, Identity, User};
use domain::services::{AuthError, IdentityProvider};
use persistence::repositories::UserRepository;
use shared::crypto::{fingerprint_matches, token_fingerprint};
use shared::jwt::{JwtConfig, JwtError};
use shared::password::{check_password_strength, hash_password, verify_password, PasswordError};
use sqlx::PgPool;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum AuthServiceError {
    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("{0}")]
    WeakPassword(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Token error: {0}")]
    Token(#[from] JwtError),

    #[error("Password error: {0}")]
    Password(PasswordError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PasswordError> for AuthServiceError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooWeak(msg) => AuthServiceError::WeakPassword(msg),
            other => AuthServiceError::Password(other),
        }
    }
}

impl From<AuthServiceError> for ApiError {
    fn from(err: AuthServiceError) -> Self {
        match err {
            AuthServiceError::EmailAlreadyExists => {
                ApiError::Conflict("Email already registered".to_string())
            }
            AuthServiceError::WeakPassword(msg) => ApiError::Validation(msg),
            AuthServiceError::InvalidCredentials => {
                ApiError::Unauthorized("Invalid email or password".to_string())
            }
            AuthServiceError::InvalidRefreshToken | AuthServiceError::Token(_) => {
                ApiError::Unauthorized("Invalid or expired token".to_string())
            }
            AuthServiceError::SessionNotFound => {
                ApiError::Unauthorized("Session has ended".to_string())
            }
            AuthServiceError::Password(e) => ApiError::Internal(format!("Password error: {}", e)),
            AuthServiceError::Database(e) => ApiError::from(e),
        }
    }
}

/// Tokens handed to a client after sign-in or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub session_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub user: User,
    pub tokens: TokenPair,
}

impl AuthResult {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user.id,
            email: self.user.email.clone(),
            display_name: self.user.display_name.clone(),
            session_id: self.tokens.session_id,
            access_token: self.tokens.access_token.clone(),
            refresh_token: self.tokens.refresh_token.clone(),
            expires_at: self.tokens.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    jwt: Arc<JwtConfig>,
}

impl AuthService {
    pub fn new(pool: PgPool, jwt: Arc<JwtConfig>) -> Self {
        Self {
            users: UserRepository::new(pool),
            jwt,
        }
    }

    pub async fn signup(
        &self,
        credentials: &Credentials,
        display_name: &str,
    ) -> Result<AuthResult, AuthServiceError> {
        check_password_strength(&credentials.password)?;
        let email = credentials.normalized_email();

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthServiceError::EmailAlreadyExists);
        }

        let hash = hash_password(&credentials.password)?;
        let user: User = match self
            .users
            .create_user(&email, &hash, display_name.trim())
            .await
        {
            Ok(entity) => entity.into(),
            // Lost a race with a concurrent signup for the same address.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(AuthServiceError::EmailAlreadyExists)
            }
            Err(e) => return Err(e.into()),
        };

        let tokens = self.start_session(user.id).await?;
        info!(user_id = %user.id, "User signed up");
        Ok(AuthResult { user, tokens })
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResult, AuthServiceError> {
        let entity = self
            .users
            .find_by_email(&credentials.normalized_email())
            .await?
            .ok_or(AuthServiceError::InvalidCredentials)?;

        if !verify_password(&credentials.password, &entity.password_hash)? {
            return Err(AuthServiceError::InvalidCredentials);
        }

        let now = Utc::now();
        self.users.update_last_login(entity.id, now).await?;
        let mut user: User = entity.into();
        user.last_login_at = Some(now);

        let tokens = self.start_session(user.id).await?;
        info!(user_id = %user.id, session_id = %tokens.session_id, "User logged in");
        Ok(AuthResult { user, tokens })
    }

    /// Exchanges a refresh token for a new pair. The presented token stops
    /// working once this succeeds.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthServiceError> {
        let claims = self
            .jwt
            .validate_refresh_token(refresh_token)
            .map_err(|_| AuthServiceError::InvalidRefreshToken)?;
        let user_id = claims.user_id()?;
        let session_id = claims.session_id()?;

        let session = self
            .users
            .find_session(session_id)
            .await?
            .ok_or(AuthServiceError::InvalidRefreshToken)?;

        if session.user_id != user_id
            || !fingerprint_matches(refresh_token, &session.refresh_token_hash)
        {
            warn!(session_id = %session_id, "Refresh token mismatch");
            return Err(AuthServiceError::InvalidRefreshToken);
        }

        let tokens = self.issue_pair(user_id, session_id)?;
        let rotated = self
            .users
            .rotate_refresh_token(
                session_id,
                &session.refresh_token_hash,
                &token_fingerprint(&tokens.refresh_token),
                self.refresh_expiry(),
            )
            .await?;
        if !rotated {
            return Err(AuthServiceError::InvalidRefreshToken);
        }

        Ok(tokens)
    }

    /// Ends a session. Returns `false` if it was already gone.
    pub async fn logout(&self, session_id: Uuid) -> Result<bool, AuthServiceError> {
        let deleted = self.users.delete_session(session_id).await?;
        info!(session_id = %session_id, "Session ended");
        Ok(deleted)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AuthServiceError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(Into::into)
            .ok_or(AuthServiceError::SessionNotFound)
    }

    /// Whether the session behind an access token is still open.
    pub async fn session_is_open(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, AuthServiceError> {
        Ok(self
            .users
            .find_session(session_id)
            .await?
            .map(|s| s.user_id == user_id)
            .unwrap_or(false))
    }

    async fn start_session(&self, user_id: Uuid) -> Result<TokenPair, AuthServiceError> {
        let session_id = Uuid::new_v4();
        let tokens = self.issue_pair(user_id, session_id)?;
        self.users
            .create_session(
                session_id,
                user_id,
                &token_fingerprint(&tokens.refresh_token),
                self.refresh_expiry(),
            )
            .await?;
        Ok(tokens)
    }

    fn issue_pair(&self, user_id: Uuid, session_id: Uuid) -> Result<TokenPair, AuthServiceError> {
        let access = self.jwt.issue_access_token(user_id, session_id)?;
        let refresh = self.jwt.issue_refresh_token(user_id, session_id)?;
        Ok(TokenPair {
            session_id,
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: access.expires_in,
            expires_at: Utc::now() + Duration::seconds(access.expires_in),
        })
    }

    fn refresh_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.jwt.refresh_token_expiry_secs)
    }
}

/// Lets a domain [`domain::services::Session`] sign in against this server's
/// own account store.
#[async_trait]
impl IdentityProvider for AuthService {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match self.login(credentials).await {
            Ok(result) => Ok(result.identity()),
            Err(AuthServiceError::InvalidCredentials) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Provider(e.to_string())),
        }
    }

    async fn sign_out(&self, identity: &Identity) -> Result<(), AuthError> {
        self.logout(identity.session_id)
            .await
            .map(|_| ())
            .map_err(|e| AuthError::Provider(e.to_string()))
    }
}
