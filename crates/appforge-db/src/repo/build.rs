//! Build repository.

use appforge_core::image::StatusQuery;
use appforge_core::{AppId, Build, BuildFilter, BuildId, StepName, StepStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::action::load_actions;
use crate::{DbError, DbResult};

/// Fields supplied when creating a build.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub app_id: AppId,
    pub commit_id: String,
    pub message: Option<String>,
    pub version: String,
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Create the build, its action and the succeeded Queued step atomically.
    async fn create_build(&self, new: NewBuild) -> DbResult<Build>;

    async fn get_build(&self, id: BuildId) -> DbResult<Build>;

    /// List builds, newest first.
    async fn list_builds(&self, filter: &BuildFilter) -> DbResult<Vec<Build>>;

    /// Builds with a Running step of `name` that were not polled since
    /// `polled_before`, oldest first.
    async fn builds_with_running_step(
        &self,
        name: StepName,
        polled_before: DateTime<Utc>,
    ) -> DbResult<Vec<Build>>;

    /// Persist the remote build handle and poll time.
    async fn update_image_build_state(
        &self,
        id: BuildId,
        status_query: &StatusQuery,
        polled_at: DateTime<Utc>,
    ) -> DbResult<()>;

    async fn set_images(&self, id: BuildId, images: &[String]) -> DbResult<()>;
}

/// Database row for builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: Uuid,
    pub app_id: Uuid,
    pub action_id: Uuid,
    pub commit_id: String,
    pub message: Option<String>,
    pub version: String,
    pub images: Vec<String>,
    pub status_query: Option<serde_json::Value>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const BUILD_COLUMNS: &str = "id, app_id, action_id, commit_id, message, version, images, \
     status_query, status_updated_at, created_at";

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach fully loaded actions to build rows, preserving row order.
    async fn hydrate(&self, rows: Vec<BuildRow>) -> DbResult<Vec<Build>> {
        let action_ids: Vec<Uuid> = rows.iter().map(|r| r.action_id).collect();
        let mut actions = load_actions(&self.pool, &action_ids).await?;

        rows.into_iter()
            .map(|row| {
                let action = actions.remove(&row.action_id).ok_or_else(|| {
                    DbError::Corrupt(format!("build {} has no action {}", row.id, row.action_id))
                })?;
                Ok(Build {
                    id: row.id.into(),
                    app_id: row.app_id.into(),
                    commit_id: row.commit_id,
                    message: row.message,
                    version: row.version,
                    created_at: row.created_at,
                    images: row.images,
                    status_query: row.status_query.map(StatusQuery),
                    status_updated_at: row.status_updated_at,
                    action,
                })
            })
            .collect()
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create_build(&self, new: NewBuild) -> DbResult<Build> {
        let build_id = BuildId::new();
        let action_id = Uuid::now_v7();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO actions (id, created_at) VALUES ($1, NOW())")
            .bind(action_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO builds (id, app_id, action_id, commit_id, message, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(new.app_id.as_uuid())
        .bind(action_id)
        .bind(&new.commit_id)
        .bind(&new.message)
        .bind(&new.version)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO action_steps (id, action_id, name, message, status, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(action_id)
        .bind(StepName::Queued.as_str())
        .bind(StepName::Queued.default_message())
        .bind(StepStatus::Succeeded.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_build(build_id).await
    }

    async fn get_build(&self, id: BuildId) -> DbResult<Build> {
        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {BUILD_COLUMNS} FROM builds WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;

        self.hydrate(vec![row])
            .await?
            .pop()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn list_builds(&self, filter: &BuildFilter) -> DbResult<Vec<Build>> {
        let mut query_builder =
            sqlx::QueryBuilder::new(format!("SELECT {BUILD_COLUMNS} FROM builds WHERE TRUE"));

        if let Some(app_id) = filter.app_id {
            query_builder.push(" AND app_id = ");
            query_builder.push_bind(*app_id.as_uuid());
        }
        if let Some(commit_id) = &filter.commit_id {
            query_builder.push(" AND commit_id = ");
            query_builder.push_bind(commit_id.clone());
        }

        query_builder.push(" ORDER BY created_at DESC, id DESC");

        if let Some(limit) = filter.limit {
            query_builder.push(" LIMIT ");
            query_builder.push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            query_builder.push(" OFFSET ");
            query_builder.push_bind(offset);
        }

        let rows = query_builder
            .build_query_as::<BuildRow>()
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn builds_with_running_step(
        &self,
        name: StepName,
        polled_before: DateTime<Utc>,
    ) -> DbResult<Vec<Build>> {
        let rows = sqlx::query_as::<_, BuildRow>(&format!(
            r#"
            SELECT {BUILD_COLUMNS} FROM builds b
            WHERE EXISTS (
                SELECT 1 FROM action_steps s
                WHERE s.action_id = b.action_id AND s.name = $1 AND s.status = 'running'
            )
            AND (b.status_updated_at IS NULL OR b.status_updated_at <= $2)
            ORDER BY b.created_at ASC, b.id ASC
            "#
        ))
        .bind(name.as_str())
        .bind(polled_before)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn update_image_build_state(
        &self,
        id: BuildId,
        status_query: &StatusQuery,
        polled_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET status_query = $2, status_updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&status_query.0)
        .bind(polled_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }

    async fn set_images(&self, id: BuildId, images: &[String]) -> DbResult<()> {
        let result = sqlx::query("UPDATE builds SET images = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(images)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }
}
