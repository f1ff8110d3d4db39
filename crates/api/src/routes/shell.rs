//! Route resolution for the single-page client.
//!
//! The client asks where a path leads for the current caller and what the
//! layout around it should show.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use domain::models::Identity;
use domain::services::{resolve_path, Chrome, MapSearchSession, Resolution, Route};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{OptionalUserAuth, UserAuth};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellQuery {
    pub path: String,
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellAction {
    Render,
    Redirect,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResponse {
    pub action: ShellAction,
    pub route: Route,
    pub path: &'static str,
    pub chrome: Chrome,
}

/// GET /api/v1/shell?path=&projectId=
pub async fn resolve(
    State(state): State<AppState>,
    OptionalUserAuth(auth): OptionalUserAuth,
    Query(query): Query<ShellQuery>,
) -> Result<Json<ShellResponse>, ApiError> {
    let identity = match auth {
        Some(auth) => Some(identity_for(&state, &auth).await?),
        None => None,
    };

    let mut search = MapSearchSession::new();
    search.select_project(query.project_id.filter(|id| !id.is_empty()));

    Ok(Json(shell_response(identity.as_ref(), &query.path, &search)))
}

fn shell_response(
    identity: Option<&Identity>,
    path: &str,
    search: &MapSearchSession,
) -> ShellResponse {
    let (action, route) = match resolve_path(path, identity.is_some()) {
        Resolution::Render(route) => (ShellAction::Render, route),
        Resolution::Redirect(route) => (ShellAction::Redirect, route),
    };

    ShellResponse {
        action,
        route,
        path: route.path(),
        chrome: Chrome::compose(identity, route, search),
    }
}

/// Identity as seen by the layout; tokens stay with the client.
async fn identity_for(state: &AppState, auth: &UserAuth) -> Result<Identity, ApiError> {
    let user = state.auth.current_user(auth.user_id).await?;
    Ok(Identity {
        user_id: user.id,
        email: user.email,
        display_name: user.display_name,
        session_id: auth.session_id,
        access_token: String::new(),
        refresh_token: String::new(),
        expires_at: auth.expires_at,
    })
}
