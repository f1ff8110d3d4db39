//! Project repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{ProjectEntity, ProjectWithCountEntity};
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        id: &str,
        name: &str,
        owner_id: Uuid,
    ) -> Result<ProjectEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_project");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            INSERT INTO projects (id, name, owner_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, owner_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ProjectEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_project_by_id");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            SELECT id, name, owner_id, created_at, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Owner's projects, oldest first, with pin counts.
    pub async fn list_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<ProjectWithCountEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_projects_for_owner");
        let result = sqlx::query_as::<_, ProjectWithCountEntity>(
            r#"
            SELECT p.id, p.name, p.owner_id, p.created_at, p.updated_at,
                   COUNT(pin.pin_id) AS pin_count
            FROM projects p
            LEFT JOIN pins pin ON pin.project_id = p.id AND pin.deleted_at IS NULL
            WHERE p.owner_id = $1
            GROUP BY p.id
            ORDER BY p.created_at, p.id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<Option<ProjectEntity>, sqlx::Error> {
        let timer = QueryTimer::new("rename_project");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            UPDATE projects
            SET name = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, owner_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Deletes the project and, by cascade, its pins.
    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("delete_project");
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }
}
