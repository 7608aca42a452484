//! Application state.

use appforge_artifacts::LocalArtifactStore;
use appforge_builder::HttpImageBuilder;
use appforge_config::SystemConfig;
use appforge_core::image::ImageBuilder;
use appforge_db::{PgActionRepo, PgApplicationRepo, PgBuildRepo};
use appforge_deployer::WebhookDeployer;
use appforge_generator::ProcessGenerator;
use appforge_orchestrator::{Backends, BuildOrchestrator, OrchestratorConfig};
use appforge_publisher::GitHubPublisher;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BuildOrchestrator,
    /// Checked by the readiness probe when present.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(orchestrator: BuildOrchestrator) -> Self {
        Self {
            orchestrator,
            pool: None,
        }
    }

    /// Wire the Postgres repositories and the configured backends.
    pub fn from_config(config: &SystemConfig, pool: PgPool) -> Self {
        let applications = Arc::new(
            PgApplicationRepo::new(pool.clone()).with_default_token(config.github.token.clone()),
        );
        let image_builder = config.image_build.as_ref().map(|c| {
            Arc::new(HttpImageBuilder::new(c.endpoint.clone(), c.token.clone()))
                as Arc<dyn ImageBuilder>
        });

        let backends = Backends {
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            actions: Arc::new(PgActionRepo::new(pool.clone())),
            entities: applications.clone(),
            applications,
            generator: Arc::new(ProcessGenerator::new(
                config.generator.command.clone(),
                config.generator.args.clone(),
            )),
            store: Arc::new(LocalArtifactStore::new(config.artifacts.root.clone())),
            image_builder,
            publisher: Arc::new(GitHubPublisher::new(config.github.api_url.clone())),
            deployer: Arc::new(WebhookDeployer::new(config.deployer.endpoint.clone())),
        };

        let defaults = OrchestratorConfig::default();
        let orchestrator_config = OrchestratorConfig {
            poll_interval: config.reconciler.interval,
            submit_timeout: config.reconciler.submit_timeout,
            image_repository: config
                .image_build
                .as_ref()
                .map(|c| c.repository.clone())
                .unwrap_or(defaults.image_repository),
            artifacts_root: config.artifacts.root.clone(),
            default_commit_message: config.builds.default_commit_message.clone(),
            branch_prefix: config.builds.branch_prefix.clone(),
        };

        Self {
            orchestrator: BuildOrchestrator::new(backends, orchestrator_config),
            pool: Some(pool),
        }
    }
}
