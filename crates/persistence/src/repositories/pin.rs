//! Pin document repository.

use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use domain::models::Village;

use crate::entities::{PinEntity, PinWriteEntity};
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct PinRepository {
    pool: PgPool,
}

impl PinRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every live pin in the project, ordered by pin id.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<PinEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_pins_for_project");
        let result = sqlx::query_as::<_, PinEntity>(
            r#"
            SELECT project_id, pin_id, document, version, deleted_at, created_at, updated_at
            FROM pins
            WHERE project_id = $1 AND deleted_at IS NULL
            ORDER BY pin_id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Live pins and tombstones, ordered by pin id.
    pub async fn snapshot_rows(&self, project_id: &str) -> Result<Vec<PinEntity>, sqlx::Error> {
        let timer = QueryTimer::new("snapshot_pins");
        let result = sqlx::query_as::<_, PinEntity>(
            r#"
            SELECT project_id, pin_id, document, version, deleted_at, created_at, updated_at
            FROM pins
            WHERE project_id = $1
            ORDER BY pin_id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find(
        &self,
        project_id: &str,
        pin_id: &str,
    ) -> Result<Option<PinEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_pin");
        let result = sqlx::query_as::<_, PinEntity>(
            r#"
            SELECT project_id, pin_id, document, version, deleted_at, created_at, updated_at
            FROM pins
            WHERE project_id = $1 AND pin_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(project_id)
        .bind(pin_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Inserts or replaces the pin document, reviving a tombstone.
    ///
    /// An update draws its version after taking the row lock, so versions of
    /// one pin increase in commit order.
    pub async fn upsert(
        &self,
        project_id: &str,
        village: &Village,
    ) -> Result<PinWriteEntity, sqlx::Error> {
        let timer = QueryTimer::new("upsert_pin");
        let result = sqlx::query_as::<_, PinWriteEntity>(
            r#"
            WITH prior AS (
                SELECT deleted_at IS NULL AS live
                FROM pins
                WHERE project_id = $1 AND pin_id = $2
            )
            INSERT INTO pins (project_id, pin_id, document, name, status, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (project_id, pin_id) DO UPDATE
            SET document = EXCLUDED.document,
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                version = nextval('pin_version_seq'),
                deleted_at = NULL,
                updated_at = NOW()
            RETURNING version, NOT COALESCE((SELECT live FROM prior), FALSE) AS inserted
            "#,
        )
        .bind(project_id)
        .bind(&village.id)
        .bind(Json::<Value>(village.to_json()))
        .bind(&village.name)
        .bind(village.status.as_str())
        .bind(village.location.lat)
        .bind(village.location.lng)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Turns the pin into a tombstone and returns the version assigned to
    /// the removal, or `None` if there was no live pin.
    pub async fn delete(&self, project_id: &str, pin_id: &str) -> Result<Option<i64>, sqlx::Error> {
        let timer = QueryTimer::new("delete_pin");
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE pins
            SET deleted_at = NOW(),
                version = nextval('pin_version_seq'),
                updated_at = NOW()
            WHERE project_id = $1 AND pin_id = $2 AND deleted_at IS NULL
            RETURNING version
            "#,
        )
        .bind(project_id)
        .bind(pin_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }
}
