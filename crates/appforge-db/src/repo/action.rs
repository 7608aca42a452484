//! Action log repository: steps and their log lines.

use appforge_core::{
    Action, ActionId, LogLevel, LogLine, Step, StepId, StepName, StepStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[async_trait]
pub trait ActionRepo: Send + Sync {
    /// Create a Running step. Fails with `NotFound` if the action is missing.
    async fn create_step(
        &self,
        action_id: ActionId,
        name: StepName,
        message: &str,
    ) -> DbResult<Step>;

    async fn get_step(&self, step_id: StepId) -> DbResult<Step>;

    async fn get_action(&self, action_id: ActionId) -> DbResult<Action>;

    async fn append_log(
        &self,
        step_id: StepId,
        level: LogLevel,
        message: &str,
        meta: serde_json::Value,
    ) -> DbResult<LogLine>;

    /// Move a Running step to `status`. Fails with `InvalidTransition` when
    /// the step is no longer Running.
    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> DbResult<Step>;
}

/// Database row for action steps.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepRow {
    pub id: Uuid,
    pub action_id: Uuid,
    pub name: String,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepRow> for Step {
    type Error = DbError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            id: row.id.into(),
            action_id: row.action_id.into(),
            name: row.name.parse().map_err(DbError::Corrupt)?,
            message: row.message,
            status: row.status.parse().map_err(DbError::Corrupt)?,
            created_at: row.created_at,
            completed_at: row.completed_at,
            logs: Vec::new(),
        })
    }
}

/// Database row for log lines.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogRow {
    pub id: Uuid,
    pub step_id: Uuid,
    pub level: String,
    pub message: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogLine {
    type Error = DbError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogLine {
            id: row.id.into(),
            step_id: row.step_id.into(),
            level: row.level.parse().map_err(DbError::Corrupt)?,
            message: row.message,
            meta: row.meta,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    created_at: DateTime<Utc>,
}

/// Load fully materialized actions (steps and log lines) in three queries.
pub(crate) async fn load_actions(
    pool: &PgPool,
    action_ids: &[Uuid],
) -> DbResult<HashMap<Uuid, Action>> {
    if action_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let actions = sqlx::query_as::<_, ActionRow>("SELECT * FROM actions WHERE id = ANY($1)")
        .bind(action_ids)
        .fetch_all(pool)
        .await?;

    let step_rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT id, action_id, name, message, status, created_at, completed_at
        FROM action_steps
        WHERE action_id = ANY($1)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(action_ids)
    .fetch_all(pool)
    .await?;

    let step_ids: Vec<Uuid> = step_rows.iter().map(|s| s.id).collect();
    let log_rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT id, step_id, level, message, meta, created_at
        FROM action_logs
        WHERE step_id = ANY($1)
        ORDER BY seq ASC
        "#,
    )
    .bind(&step_ids)
    .fetch_all(pool)
    .await?;

    let mut logs_by_step: HashMap<Uuid, Vec<LogLine>> = HashMap::new();
    for row in log_rows {
        let step_id = row.step_id;
        logs_by_step
            .entry(step_id)
            .or_default()
            .push(LogLine::try_from(row)?);
    }

    let mut steps_by_action: HashMap<Uuid, Vec<Step>> = HashMap::new();
    for row in step_rows {
        let action_id = row.action_id;
        let mut step = Step::try_from(row)?;
        step.logs = logs_by_step.remove(step.id.as_uuid()).unwrap_or_default();
        steps_by_action.entry(action_id).or_default().push(step);
    }

    Ok(actions
        .into_iter()
        .map(|a| {
            let steps = steps_by_action.remove(&a.id).unwrap_or_default();
            (
                a.id,
                Action {
                    id: a.id.into(),
                    created_at: a.created_at,
                    steps,
                },
            )
        })
        .collect())
}

/// PostgreSQL implementation of ActionRepo.
pub struct PgActionRepo {
    pool: PgPool,
}

impl PgActionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionRepo for PgActionRepo {
    async fn create_step(
        &self,
        action_id: ActionId,
        name: StepName,
        message: &str,
    ) -> DbResult<Step> {
        let row = sqlx::query_as::<_, StepRow>(
            r#"
            INSERT INTO action_steps (id, action_id, name, message, status, created_at)
            SELECT $1, a.id, $3, $4, 'running', NOW()
            FROM actions a WHERE a.id = $2
            RETURNING id, action_id, name, message, status, created_at, completed_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(action_id.as_uuid())
        .bind(name.as_str())
        .bind(message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("action {}", action_id)))?;
        row.try_into()
    }

    async fn get_step(&self, step_id: StepId) -> DbResult<Step> {
        let row = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, action_id, name, message, status, created_at, completed_at
            FROM action_steps WHERE id = $1
            "#,
        )
        .bind(step_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("step {}", step_id)))?;

        let mut step = Step::try_from(row)?;
        let logs = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, step_id, level, message, meta, created_at
            FROM action_logs WHERE step_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(step_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        step.logs = logs
            .into_iter()
            .map(LogLine::try_from)
            .collect::<DbResult<_>>()?;
        Ok(step)
    }

    async fn get_action(&self, action_id: ActionId) -> DbResult<Action> {
        load_actions(&self.pool, &[*action_id.as_uuid()])
            .await?
            .remove(action_id.as_uuid())
            .ok_or_else(|| DbError::NotFound(format!("action {}", action_id)))
    }

    async fn append_log(
        &self,
        step_id: StepId,
        level: LogLevel,
        message: &str,
        meta: serde_json::Value,
    ) -> DbResult<LogLine> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            INSERT INTO action_logs (id, step_id, level, message, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, step_id, level, message, meta, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(step_id.as_uuid())
        .bind(level.as_str())
        .bind(message)
        .bind(meta)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> DbResult<Step> {
        // Conditional update: only one caller can move a step out of Running.
        let updated = sqlx::query_as::<_, StepRow>(
            r#"
            UPDATE action_steps SET status = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING id, action_id, name, message, status, created_at, completed_at
            "#,
        )
        .bind(step_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.get_step(step_id).await?;
                Err(DbError::InvalidTransition {
                    step: step_id,
                    from: current.status,
                    to: status,
                })
            }
        }
    }
}
