//! Sign-up, sign-in and session endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use domain::models::{Credentials, User};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::routes::pins::close_streams_for;
use crate::services::{AuthResult, TokenPair};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters"))]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenPair> for TokensResponse {
    fn from(tokens: TokenPair) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub tokens: TokensResponse,
}

impl From<AuthResult> for AuthResponse {
    fn from(result: AuthResult) -> Self {
        Self {
            user: result.user,
            tokens: result.tokens.into(),
        }
    }
}

/// POST /api/v1/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    request.validate()?;

    let credentials = Credentials::new(request.email, request.password);
    let result = state
        .auth
        .signup(&credentials, &request.display_name)
        .await?;

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    request.validate()?;

    let credentials = Credentials::new(request.email, request.password);
    let result = state.auth.login(&credentials).await?;
    Ok(Json(result.into()))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokensResponse>, ApiError> {
    request.validate()?;
    let tokens = state.auth.refresh(&request.refresh_token).await?;
    Ok(Json(tokens.into()))
}

/// POST /api/v1/auth/logout
///
/// Closes the user's pin streams before the session row goes away.
pub async fn logout(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<StatusCode, ApiError> {
    let closed = close_streams_for(&state, auth.user_id);
    state.auth.logout(auth.session_id).await?;

    info!(
        user_id = %auth.user_id,
        session_id = %auth.session_id,
        streams_closed = closed,
        "User logged out"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me
pub async fn me(State(state): State<AppState>, auth: UserAuth) -> Result<Json<User>, ApiError> {
    Ok(Json(state.auth.current_user(auth.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn test_signup_request_validation() {
        let request = SignupRequest {
            email: "worker@example.com".to_string(),
            password: "fieldwork1".to_string(),
            display_name: "Field Worker".to_string(),
        };
        assert!(request.validate().is_ok());

        let bad_email = SignupRequest {
            email: "not-an-email".to_string(),
            ..request.clone()
        };
        assert!(bad_email.validate().is_err());

        let long_name = SignupRequest {
            display_name: "A".repeat(101),
            ..request
        };
        assert!(long_name.validate().is_err());
    }

    #[test]
    fn test_login_request_requires_fields() {
        let request = LoginRequest {
            email: String::new(),
            password: "x".to_string(),
        };
        let err: ApiError = request.validate().unwrap_err().into();
        match err {
            ApiError::Validation(msg) => assert_eq!(msg, "Email is required"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_tokens_response_shape() {
        let tokens = TokenPair {
            session_id: Uuid::new_v4(),
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: 900,
            expires_at: Utc::now() + Duration::seconds(900),
        };
        let json = serde_json::to_value(TokensResponse::from(tokens)).unwrap();
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["expiresIn"], 900);
        assert!(json.get("sessionId").is_none());
    }
}
