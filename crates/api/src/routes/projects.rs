//! Project endpoints. A project belongs to the user who created it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use domain::models::project::{
    CreateProjectRequest, ListProjectsResponse, ProjectResponse, UpdateProjectRequest,
};
use domain::models::Project;
use shared::crypto::random_document_id;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

const PROJECT_ID_LENGTH: usize = 20;

/// Loads a project the caller owns: 404 if it does not exist, 403 if it
/// belongs to someone else.
pub async fn owned_project(
    state: &AppState,
    user_id: Uuid,
    project_id: &str,
) -> Result<Project, ApiError> {
    let project: Project = state
        .projects
        .find_by_id(project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?
        .into();

    if !project.is_owned_by(user_id) {
        return Err(ApiError::Forbidden(
            "You do not have access to this project".to_string(),
        ));
    }
    Ok(project)
}

/// GET /api/v1/projects
pub async fn list_projects(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<ListProjectsResponse>, ApiError> {
    let projects: Vec<ProjectResponse> = state
        .projects
        .list_for_owner(auth.user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(ListProjectsResponse {
        total: projects.len(),
        projects,
    }))
}

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    request.validate()?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name must be 1-100 characters".to_string()));
    }

    let project: Project = state
        .projects
        .create(&random_document_id(PROJECT_ID_LENGTH), name, auth.user_id)
        .await?
        .into();

    info!(user_id = %auth.user_id, project_id = %project.id, "Project created");
    let mut response = ProjectResponse::from(project);
    response.pin_count = Some(0);
    Ok((StatusCode::CREATED, Json(response)))
}

/// PATCH /api/v1/projects/:project_id
pub async fn rename_project(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
    Json(request): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, ApiError> {
    request.validate()?;
    owned_project(&state, auth.user_id, &project_id).await?;

    let project: Project = state
        .projects
        .rename(&project_id, request.name.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?
        .into();

    Ok(Json(project.into()))
}

/// DELETE /api/v1/projects/:project_id
///
/// Pins go with the project, and open streams on it end with an error event.
pub async fn delete_project(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(project_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    owned_project(&state, auth.user_id, &project_id).await?;

    if !state.projects.delete(&project_id).await? {
        return Err(ApiError::NotFound("Project not found".to_string()));
    }
    state.pin_store.close_project(&project_id);

    info!(user_id = %auth.user_id, project_id = %project_id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_project_id_is_valid_document_id() {
        let id = random_document_id(PROJECT_ID_LENGTH);
        assert_eq!(id.len(), PROJECT_ID_LENGTH);
        assert!(shared::validation::validate_document_id(&id).is_ok());
    }

    #[test]
    fn test_create_request_rejects_long_name() {
        let request = CreateProjectRequest {
            name: "x".repeat(101),
        };
        let err: ApiError = request.validate().unwrap_err().into();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
