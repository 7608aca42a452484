//! Interfaces to the application module that owns builds.
//!
//! The orchestrator only depends on these traits; the application module
//! provides the implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::generator::{Entity, Role};
use crate::id::AppId;
use crate::publisher::SourceCredential;

/// Source repository connected to an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRepository {
    pub owner: String,
    pub name: String,
    pub base_branch: Option<String>,
    pub credential: SourceCredential,
}

/// Application details needed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: AppId,
    pub name: String,
    pub description: String,
    /// Public URL of the deployed application.
    pub url: String,
    /// Connected repository; source publishing is disabled when `None`.
    pub source: Option<SourceRepository>,
}

/// Read access to the application's versioned data model.
#[async_trait]
pub trait EntityProvider: Send + Sync {
    /// Entity versions as of the given commit. Order is unspecified.
    async fn entity_versions(&self, app_id: AppId, commit_id: &str) -> Result<Vec<Entity>>;

    async fn roles(&self, app_id: AppId) -> Result<Vec<Role>>;
}

/// Application-side operations used by the pipeline.
#[async_trait]
pub trait ApplicationFacade: Send + Sync {
    /// Fails with `NotFound` for unknown applications.
    async fn app_info(&self, app_id: AppId) -> Result<AppInfo>;

    async fn report_sync_success(&self, app_id: AppId, pull_request_url: &str) -> Result<()>;

    async fn report_sync_failure(&self, app_id: AppId, message: &str) -> Result<()>;
}
