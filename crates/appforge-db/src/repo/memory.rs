//! In-memory repositories for tests and local runs.

use appforge_core::application::{AppInfo, ApplicationFacade, EntityProvider};
use appforge_core::generator::{Entity, Role};
use appforge_core::image::StatusQuery;
use appforge_core::{
    Action, ActionId, AppId, Build, BuildFilter, BuildId, LogLevel, LogLine, LogLineId, Step,
    StepId, StepName, StepStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::action::ActionRepo;
use super::build::{BuildRepo, NewBuild};
use crate::{DbError, DbResult};

#[derive(Debug, Default)]
struct State {
    builds: HashMap<BuildId, Build>,
    /// Build ids in creation order.
    order: Vec<BuildId>,
    action_index: HashMap<ActionId, BuildId>,
    step_index: HashMap<StepId, ActionId>,
}

impl State {
    fn action_mut(&mut self, action_id: ActionId) -> DbResult<&mut Action> {
        let build_id = self
            .action_index
            .get(&action_id)
            .ok_or_else(|| DbError::NotFound(format!("action {}", action_id)))?;
        self.builds
            .get_mut(build_id)
            .map(|b| &mut b.action)
            .ok_or_else(|| DbError::Corrupt(format!("action {} has no build", action_id)))
    }

    fn step_mut(&mut self, step_id: StepId) -> DbResult<&mut Step> {
        let action_id = *self
            .step_index
            .get(&step_id)
            .ok_or_else(|| DbError::NotFound(format!("step {}", step_id)))?;
        self.action_mut(action_id)?
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| DbError::Corrupt(format!("step {} missing from action", step_id)))
    }

    fn build_mut(&mut self, id: BuildId) -> DbResult<&mut Build> {
        self.builds
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }
}

/// In-memory implementation of [`BuildRepo`] and [`ActionRepo`].
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    state: Arc<RwLock<State>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DbResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| DbError::Poisoned)
    }

    fn write(&self) -> DbResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| DbError::Poisoned)
    }
}

#[async_trait]
impl BuildRepo for MemoryRepo {
    async fn create_build(&self, new: NewBuild) -> DbResult<Build> {
        let now = Utc::now();
        let action_id = ActionId::new();
        let queued = Step {
            id: StepId::new(),
            action_id,
            name: StepName::Queued,
            message: StepName::Queued.default_message().to_string(),
            status: StepStatus::Succeeded,
            created_at: now,
            completed_at: Some(now),
            logs: Vec::new(),
        };
        let build = Build {
            id: BuildId::new(),
            app_id: new.app_id,
            commit_id: new.commit_id,
            message: new.message,
            version: new.version,
            created_at: now,
            images: Vec::new(),
            status_query: None,
            status_updated_at: None,
            action: Action {
                id: action_id,
                created_at: now,
                steps: vec![queued.clone()],
            },
        };

        let mut state = self.write()?;
        state.step_index.insert(queued.id, action_id);
        state.action_index.insert(action_id, build.id);
        state.order.push(build.id);
        state.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get_build(&self, id: BuildId) -> DbResult<Build> {
        self.read()?
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn list_builds(&self, filter: &BuildFilter) -> DbResult<Vec<Build>> {
        let state = self.read()?;
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);

        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.builds.get(id))
            .filter(|b| filter.app_id.is_none_or(|app_id| b.app_id == app_id))
            .filter(|b| {
                filter
                    .commit_id
                    .as_deref()
                    .is_none_or(|commit| b.commit_id == commit)
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn builds_with_running_step(
        &self,
        name: StepName,
        polled_before: DateTime<Utc>,
    ) -> DbResult<Vec<Build>> {
        let state = self.read()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.builds.get(id))
            .filter(|b| {
                b.action
                    .steps
                    .iter()
                    .any(|s| s.name == name && s.status == StepStatus::Running)
            })
            .filter(|b| b.status_updated_at.is_none_or(|at| at <= polled_before))
            .cloned()
            .collect())
    }

    async fn update_image_build_state(
        &self,
        id: BuildId,
        status_query: &StatusQuery,
        polled_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut state = self.write()?;
        let build = state.build_mut(id)?;
        build.status_query = Some(status_query.clone());
        build.status_updated_at = Some(polled_at);
        Ok(())
    }

    async fn set_images(&self, id: BuildId, images: &[String]) -> DbResult<()> {
        let mut state = self.write()?;
        state.build_mut(id)?.images = images.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ActionRepo for MemoryRepo {
    async fn create_step(
        &self,
        action_id: ActionId,
        name: StepName,
        message: &str,
    ) -> DbResult<Step> {
        let step = Step {
            id: StepId::new(),
            action_id,
            name,
            message: message.to_string(),
            status: StepStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            logs: Vec::new(),
        };

        let mut state = self.write()?;
        state.action_mut(action_id)?.steps.push(step.clone());
        state.step_index.insert(step.id, action_id);
        Ok(step)
    }

    async fn get_step(&self, step_id: StepId) -> DbResult<Step> {
        let mut state = self.write()?;
        state.step_mut(step_id).map(|s| s.clone())
    }

    async fn get_action(&self, action_id: ActionId) -> DbResult<Action> {
        let mut state = self.write()?;
        state.action_mut(action_id).map(|a| a.clone())
    }

    async fn append_log(
        &self,
        step_id: StepId,
        level: LogLevel,
        message: &str,
        meta: serde_json::Value,
    ) -> DbResult<LogLine> {
        let line = LogLine {
            id: LogLineId::new(),
            step_id,
            level,
            message: message.to_string(),
            meta,
            created_at: Utc::now(),
        };

        let mut state = self.write()?;
        state.step_mut(step_id)?.logs.push(line.clone());
        Ok(line)
    }

    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> DbResult<Step> {
        let mut state = self.write()?;
        let step = state.step_mut(step_id)?;
        if step.status != StepStatus::Running {
            return Err(DbError::InvalidTransition {
                step: step_id,
                from: step.status,
                to: status,
            });
        }
        step.status = status;
        step.completed_at = Some(Utc::now());
        Ok(step.clone())
    }
}

/// A git sync outcome reported through [`ApplicationFacade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    Success { app_id: AppId, pull_request_url: String },
    Failure { app_id: AppId, message: String },
}

#[derive(Debug, Default)]
struct AppState {
    apps: HashMap<AppId, AppInfo>,
    entities: HashMap<(AppId, String), Vec<Entity>>,
    roles: HashMap<AppId, Vec<Role>>,
    reports: Vec<SyncReport>,
}

/// In-memory application facade and entity provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryApplications {
    state: Arc<RwLock<AppState>>,
}

impl MemoryApplications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_app(&self, app: AppInfo) -> DbResult<()> {
        let mut state = self.state.write().map_err(|_| DbError::Poisoned)?;
        state.apps.insert(app.id, app);
        Ok(())
    }

    /// Entity versions visible at `commit_id`, kept in the given order.
    pub fn insert_entities(
        &self,
        app_id: AppId,
        commit_id: &str,
        entities: Vec<Entity>,
    ) -> DbResult<()> {
        let mut state = self.state.write().map_err(|_| DbError::Poisoned)?;
        state
            .entities
            .insert((app_id, commit_id.to_string()), entities);
        Ok(())
    }

    pub fn insert_roles(&self, app_id: AppId, roles: Vec<Role>) -> DbResult<()> {
        let mut state = self.state.write().map_err(|_| DbError::Poisoned)?;
        state.roles.insert(app_id, roles);
        Ok(())
    }

    /// Sync outcomes reported so far, oldest first.
    pub fn reports(&self) -> DbResult<Vec<SyncReport>> {
        let state = self.state.read().map_err(|_| DbError::Poisoned)?;
        Ok(state.reports.clone())
    }

    fn push_report(&self, report: SyncReport) -> DbResult<()> {
        let mut state = self.state.write().map_err(|_| DbError::Poisoned)?;
        let app_id = match &report {
            SyncReport::Success { app_id, .. } | SyncReport::Failure { app_id, .. } => *app_id,
        };
        if !state.apps.contains_key(&app_id) {
            return Err(DbError::NotFound(format!("application {}", app_id)));
        }
        state.reports.push(report);
        Ok(())
    }
}

#[async_trait]
impl EntityProvider for MemoryApplications {
    async fn entity_versions(
        &self,
        app_id: AppId,
        commit_id: &str,
    ) -> appforge_core::Result<Vec<Entity>> {
        let state = self.state.read().map_err(|_| DbError::Poisoned)?;
        Ok(state
            .entities
            .get(&(app_id, commit_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn roles(&self, app_id: AppId) -> appforge_core::Result<Vec<Role>> {
        let state = self.state.read().map_err(|_| DbError::Poisoned)?;
        Ok(state.roles.get(&app_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ApplicationFacade for MemoryApplications {
    async fn app_info(&self, app_id: AppId) -> appforge_core::Result<AppInfo> {
        let state = self.state.read().map_err(|_| DbError::Poisoned)?;
        state
            .apps
            .get(&app_id)
            .cloned()
            .ok_or_else(|| appforge_core::Error::NotFound(format!("application {}", app_id)))
    }

    async fn report_sync_success(
        &self,
        app_id: AppId,
        pull_request_url: &str,
    ) -> appforge_core::Result<()> {
        self.push_report(SyncReport::Success {
            app_id,
            pull_request_url: pull_request_url.to_string(),
        })?;
        Ok(())
    }

    async fn report_sync_failure(&self, app_id: AppId, message: &str) -> appforge_core::Result<()> {
        self.push_report(SyncReport::Failure {
            app_id,
            message: message.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_build(app_id: AppId, commit_id: &str) -> NewBuild {
        NewBuild {
            app_id,
            commit_id: commit_id.to_string(),
            message: None,
            version: appforge_core::build::version_label(commit_id),
        }
    }

    #[tokio::test]
    async fn test_create_build_with_queued_step() {
        let repo = MemoryRepo::new();
        let build = repo
            .create_build(new_build(AppId::new(), "c0ffee1234567890"))
            .await
            .unwrap();

        assert_eq!(build.version, "34567890");
        assert_eq!(build.action.steps.len(), 1);
        let queued = &build.action.steps[0];
        assert_eq!(queued.name, StepName::Queued);
        assert_eq!(queued.status, StepStatus::Succeeded);
        assert!(queued.completed_at.is_some());

        let fetched = repo.get_build(build.id).await.unwrap();
        assert_eq!(fetched, build);
    }

    #[tokio::test]
    async fn test_step_lifecycle_and_logs() {
        let repo = MemoryRepo::new();
        let build = repo
            .create_build(new_build(AppId::new(), "abc"))
            .await
            .unwrap();

        let step = repo
            .create_step(build.action.id, StepName::Generate, "Generating application")
            .await
            .unwrap();
        assert_eq!(step.status, StepStatus::Running);

        repo.append_log(step.id, LogLevel::Info, "first", serde_json::Value::Null)
            .await
            .unwrap();
        repo.append_log(
            step.id,
            LogLevel::Warning,
            "second",
            serde_json::json!({"k": [1, 2]}),
        )
        .await
        .unwrap();

        let done = repo
            .complete_step(step.id, StepStatus::Succeeded)
            .await
            .unwrap();
        assert_eq!(done.status, StepStatus::Succeeded);

        let build = repo.get_build(build.id).await.unwrap();
        let generate = build.action.step(StepName::Generate).unwrap();
        let messages: Vec<_> = generate.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_complete_twice_is_invalid_transition() {
        let repo = MemoryRepo::new();
        let build = repo
            .create_build(new_build(AppId::new(), "abc"))
            .await
            .unwrap();
        let step = repo
            .create_step(build.action.id, StepName::Generate, "Generating application")
            .await
            .unwrap();

        repo.complete_step(step.id, StepStatus::Failed).await.unwrap();
        let err = repo
            .complete_step(step.id, StepStatus::Succeeded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition {
                from: StepStatus::Failed,
                to: StepStatus::Succeeded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_step_for_unknown_action() {
        let repo = MemoryRepo::new();
        let err = repo
            .create_step(ActionId::new(), StepName::Generate, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_builds_newest_first_with_paging() {
        let repo = MemoryRepo::new();
        let app = AppId::new();
        let other = AppId::new();
        let first = repo.create_build(new_build(app, "1")).await.unwrap();
        repo.create_build(new_build(other, "2")).await.unwrap();
        let third = repo.create_build(new_build(app, "3")).await.unwrap();

        let filter = BuildFilter {
            app_id: Some(app),
            ..Default::default()
        };
        let ids: Vec<_> = repo
            .list_builds(&filter)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![third.id, first.id]);

        let page = repo
            .list_builds(&BuildFilter {
                limit: Some(1),
                offset: Some(1),
                ..filter
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
    }

    #[tokio::test]
    async fn test_builds_with_running_step_respects_poll_time() {
        let repo = MemoryRepo::new();
        let build = repo
            .create_build(new_build(AppId::new(), "abc"))
            .await
            .unwrap();
        repo.create_step(build.action.id, StepName::BuildImage, "Building container image")
            .await
            .unwrap();

        let now = Utc::now();
        let due = repo
            .builds_with_running_step(StepName::BuildImage, now)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        repo.update_image_build_state(
            build.id,
            &StatusQuery(serde_json::json!({"id": "b-1"})),
            now + chrono::Duration::seconds(5),
        )
        .await
        .unwrap();
        let due = repo
            .builds_with_running_step(StepName::BuildImage, now)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_sync_report_for_unknown_app() {
        let apps = MemoryApplications::new();
        let err = apps
            .report_sync_success(AppId::new(), "https://github.com/a/b/pull/1")
            .await
            .unwrap_err();
        assert!(matches!(err, appforge_core::Error::NotFound(_)));
    }
}
