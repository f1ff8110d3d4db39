//! Bearer-token authentication for handlers.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use shared::jwt::bearer_token;

use crate::app::AppState;
use crate::error::ApiError;

/// A signed-in caller whose session is still open.
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// `EventSource` cannot set headers, so pin streams also accept the access
/// token as `?access_token=`.
#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

fn presented_token(parts: &Parts) -> Option<String> {
    if let Some(header) = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return bearer_token(header).map(str::to_string);
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
}

async fn authenticate(token: &str, state: &AppState) -> Result<UserAuth, ApiError> {
    let claims = state
        .jwt
        .validate_access_token(token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    let invalid = |_| ApiError::Unauthorized("Invalid or expired token".to_string());
    let user_id = claims.user_id().map_err(invalid)?;
    let session_id = claims.session_id().map_err(invalid)?;

    // Signing out deletes the session, which revokes its access tokens too.
    if !state.auth.session_is_open(user_id, session_id).await? {
        return Err(ApiError::Unauthorized("Session has ended".to_string()));
    }

    Ok(UserAuth {
        user_id,
        session_id,
        expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(auth) = parts.extensions.get::<UserAuth>() {
            return Ok(auth.clone());
        }

        let token = presented_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;
        let auth = authenticate(&token, state).await?;

        parts.extensions.insert(auth.clone());
        Ok(auth)
    }
}

/// Like [`UserAuth`], but a missing or invalid token yields `None`.
#[derive(Debug, Clone)]
pub struct OptionalUserAuth(pub Option<UserAuth>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalUserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = presented_token(parts) else {
            return Ok(OptionalUserAuth(None));
        };

        match authenticate(&token, state).await {
            Ok(auth) => Ok(OptionalUserAuth(Some(auth))),
            Err(ApiError::Unauthorized(_)) => Ok(OptionalUserAuth(None)),
            Err(e) => Err(e),
        }
    }
}
