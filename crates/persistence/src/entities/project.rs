//! Project entities (database row mappings).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::project::ProjectResponse;
use domain::models::Project;

/// Database row mapping for the projects table.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectEntity {
    pub id: String,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectEntity> for Project {
    fn from(entity: ProjectEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            owner_id: entity.owner_id,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Project row joined with its pin count.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectWithCountEntity {
    pub id: String,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pin_count: i64,
}

impl From<ProjectWithCountEntity> for ProjectResponse {
    fn from(entity: ProjectWithCountEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            pin_count: Some(entity.pin_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_entity_to_response() {
        let entity = ProjectWithCountEntity {
            id: "p1".to_string(),
            name: "Survey".to_string(),
            owner_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            pin_count: 12,
        };
        let response: ProjectResponse = entity.into();
        assert_eq!(response.pin_count, Some(12));
    }
}
