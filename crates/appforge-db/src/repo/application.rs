//! Read side of the application data model.
//!
//! The application module owns these tables; the pipeline reads entity
//! versions and roles for generation and writes back the git sync outcome.

use appforge_core::application::{AppInfo, ApplicationFacade, EntityProvider, SourceRepository};
use appforge_core::generator::{Entity, Role};
use appforge_core::publisher::SourceCredential;
use appforge_core::{AppId, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// Database row for applications.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub url: String,
    pub git_owner: Option<String>,
    pub git_repo: Option<String>,
    pub git_base_branch: Option<String>,
    pub git_token: Option<String>,
}

impl From<ApplicationRow> for AppInfo {
    fn from(row: ApplicationRow) -> Self {
        // A repository is connected only when owner, name and token are all set.
        let source = match (row.git_owner, row.git_repo, row.git_token) {
            (Some(owner), Some(name), Some(token)) => Some(SourceRepository {
                owner,
                name,
                base_branch: row.git_base_branch,
                credential: SourceCredential::Token(token),
            }),
            _ => None,
        };

        AppInfo {
            id: row.id.into(),
            name: row.name,
            description: row.description,
            url: row.url,
            source,
        }
    }
}

/// Database row for an entity joined with its version at a commit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityVersionRow {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<EntityVersionRow> for Entity {
    fn from(row: EntityVersionRow) -> Self {
        Entity {
            id: row.id.into(),
            name: row.name,
            display_name: row.display_name,
            fields: row.fields,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    display_name: String,
}

/// PostgreSQL implementation of the application facade and entity provider.
pub struct PgApplicationRepo {
    pool: PgPool,
    /// Used for applications that connect a repository without their own
    /// token.
    default_token: Option<String>,
}

impl PgApplicationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_token: None,
        }
    }

    pub fn with_default_token(mut self, token: Option<String>) -> Self {
        self.default_token = token;
        self
    }

    async fn record_sync(
        &self,
        app_id: AppId,
        status: &str,
        message: &str,
    ) -> std::result::Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET git_sync_status = $2, git_sync_message = $3, git_synced_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(app_id.as_uuid())
        .bind(status)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("application {}", app_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityProvider for PgApplicationRepo {
    async fn entity_versions(&self, app_id: AppId, commit_id: &str) -> Result<Vec<Entity>> {
        // No ORDER BY: callers sort by creation time themselves.
        let rows = sqlx::query_as::<_, EntityVersionRow>(
            r#"
            SELECT e.id, e.name, e.display_name, v.fields, e.created_at
            FROM entities e
            JOIN entity_versions v ON v.entity_id = e.id
            WHERE e.app_id = $1 AND v.commit_id = $2
            "#,
        )
        .bind(app_id.as_uuid())
        .bind(commit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(rows.into_iter().map(Entity::from).collect())
    }

    async fn roles(&self, app_id: AppId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, display_name FROM roles WHERE app_id = $1 ORDER BY created_at, id",
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(rows
            .into_iter()
            .map(|r| Role {
                id: r.id.into(),
                name: r.name,
                display_name: r.display_name,
            })
            .collect())
    }
}

#[async_trait]
impl ApplicationFacade for PgApplicationRepo {
    async fn app_info(&self, app_id: AppId) -> Result<AppInfo> {
        let mut row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, name, description, url, git_owner, git_repo, git_base_branch, git_token
            FROM applications WHERE id = $1
            "#,
        )
        .bind(app_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| DbError::NotFound(format!("application {}", app_id)))?;

        if row.git_token.is_none() {
            row.git_token = self.default_token.clone();
        }
        Ok(row.into())
    }

    async fn report_sync_success(&self, app_id: AppId, pull_request_url: &str) -> Result<()> {
        self.record_sync(app_id, "synced", pull_request_url).await?;
        Ok(())
    }

    async fn report_sync_failure(&self, app_id: AppId, message: &str) -> Result<()> {
        self.record_sync(app_id, "failed", message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ApplicationRow {
        ApplicationRow {
            id: Uuid::now_v7(),
            name: "crm".to_string(),
            description: "Customer records".to_string(),
            url: "https://crm.example.com".to_string(),
            git_owner: Some("acme".to_string()),
            git_repo: Some("crm".to_string()),
            git_base_branch: None,
            git_token: Some("ghs_token".to_string()),
        }
    }

    #[test]
    fn test_connected_repository() {
        let info = AppInfo::from(row());
        let source = info.source.unwrap();
        assert_eq!(source.owner, "acme");
        assert_eq!(source.name, "crm");
        assert!(source.base_branch.is_none());
    }

    #[test]
    fn test_missing_token_means_no_repository() {
        let mut row = row();
        row.git_token = None;
        assert!(AppInfo::from(row).source.is_none());
    }
}
