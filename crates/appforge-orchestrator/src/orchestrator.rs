//! Build orchestrator - drives builds through the pipeline stages.
//!
//! A build runs as a sequence of steps on its action:
//!
//! 1. `ADD_TO_QUEUE`, created succeeded together with the build
//! 2. `GENERATE_APPLICATION`, code generation plus packaging (final)
//! 3. `BUILD_DOCKER_IMAGE`, submitted here and left Running; the
//!    reconciliation sweep completes it
//! 4. `PUSH_TO_GITHUB`, run by the sweep after a successful image build
//!
//! Only a generation failure stops the pipeline with an error; image build
//! and publish failures are confined to their own step.

use appforge_artifacts::{ArchiveError, package, unpack_zip};
use appforge_core::application::{ApplicationFacade, EntityProvider, SourceRepository};
use appforge_core::artifact::{ArtifactStore, ByteStream, zip_path};
use appforge_core::build::version_label;
use appforge_core::deployer::SandboxDeployer;
use appforge_core::generator::{
    AppMeta, CodeGenerator, Entity, GenerationInput, GeneratorLogRecord, GeneratorLogger,
    LogSink, order_entities,
};
use appforge_core::image::{ImageBuildRequest, ImageBuildStatus, ImageBuilder};
use appforge_core::publisher::{PublishRequest, SourcePublisher};
use appforge_core::{
    AppId, Build, BuildFilter, BuildId, BuildRequest, BuildStatus, Error, LogLevel, Result,
    StepId, StepName, StepStatus,
};
use appforge_db::{ActionRepo, BuildRepo, NewBuild};
use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use futures::future::join_all;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action_log::{ActionLog, StepContext};

/// Collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Backends {
    pub builds: Arc<dyn BuildRepo>,
    pub actions: Arc<dyn ActionRepo>,
    pub entities: Arc<dyn EntityProvider>,
    pub applications: Arc<dyn ApplicationFacade>,
    pub generator: Arc<dyn CodeGenerator>,
    pub store: Arc<dyn ArtifactStore>,
    /// Without an image builder, builds stop after generation.
    pub image_builder: Option<Arc<dyn ImageBuilder>>,
    pub publisher: Arc<dyn SourcePublisher>,
    pub deployer: Arc<dyn SandboxDeployer>,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum time between two polls of the same image build.
    pub poll_interval: Duration,
    /// Grace period for an image build step that has no status query yet.
    /// Submission may still be in flight until it elapses.
    pub submit_timeout: Duration,
    /// Image repository the build tags are derived from.
    pub image_repository: String,
    /// Filesystem root of the artifact store, used as the build context
    /// location when the store has no URLs.
    pub artifacts_root: PathBuf,
    pub default_commit_message: String,
    pub branch_prefix: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(300),
            image_repository: "appforge/apps".to_string(),
            artifacts_root: PathBuf::from("artifacts"),
            default_commit_message: "AppForge build".to_string(),
            branch_prefix: "appforge-build".to_string(),
        }
    }
}

/// A newly created build and the task running its pipeline.
#[derive(Debug)]
pub struct SubmittedBuild {
    pub build: Build,
    pub pipeline: JoinHandle<()>,
}

/// Drives builds through generation, image build and publication.
///
/// Cheap to clone; clones share the same backends.
#[derive(Clone)]
pub struct BuildOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    backends: Backends,
    config: OrchestratorConfig,
    log: ActionLog,
}

impl BuildOrchestrator {
    pub fn new(backends: Backends, config: OrchestratorConfig) -> Self {
        let log = ActionLog::new(backends.actions.clone());
        Self {
            inner: Arc::new(Inner {
                backends,
                config,
                log,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.inner.log
    }

    /// Create a build and start its pipeline in the background.
    ///
    /// With `skip_publish` the pipeline ends after generation.
    pub async fn create(&self, request: BuildRequest, skip_publish: bool) -> Result<SubmittedBuild> {
        if request.commit_id.trim().is_empty() {
            return Err(Error::InvalidInput("commit id must not be empty".to_string()));
        }

        // Fails with NotFound for unknown applications.
        self.inner
            .backends
            .applications
            .app_info(request.app_id)
            .await?;

        let version = version_label(&request.commit_id);
        let build = self
            .inner
            .backends
            .builds
            .create_build(NewBuild {
                app_id: request.app_id,
                commit_id: request.commit_id,
                message: request.message.filter(|m| !m.trim().is_empty()),
                version,
            })
            .await?;

        info!(
            build_id = %build.id,
            app_id = %build.app_id,
            version = %build.version,
            skip_publish,
            "Build created"
        );

        let inner = self.inner.clone();
        let pipeline_build = build.clone();
        let pipeline = tokio::spawn(async move {
            inner.run_pipeline(pipeline_build, skip_publish).await;
        });

        Ok(SubmittedBuild { build, pipeline })
    }

    pub async fn find_many(&self, filter: &BuildFilter) -> Result<Vec<Build>> {
        Ok(self.inner.backends.builds.list_builds(filter).await?)
    }

    pub async fn find_one(&self, build_id: BuildId) -> Result<Build> {
        Ok(self.inner.backends.builds.get_build(build_id).await?)
    }

    pub async fn calc_build_status(&self, build_id: BuildId) -> Result<BuildStatus> {
        Ok(self.find_one(build_id).await?.status())
    }

    /// Entity versions of the build's commit, in generation order.
    pub async fn ordered_entities(&self, build: &Build) -> Result<Vec<Entity>> {
        self.inner.ordered_entities(build).await
    }

    /// Stream the generated zip of a build.
    ///
    /// Fails with `StepNotFound` before generation started, `StepNotComplete`
    /// while generation has not succeeded and `BuildArtifactNotFound` when
    /// the archive is missing from the store.
    pub async fn download(&self, build_id: BuildId) -> Result<ByteStream> {
        let build = self.find_one(build_id).await?;

        let step = build.action.step(StepName::Generate).ok_or_else(|| {
            Error::StepNotFound(format!("{} for build {}", StepName::Generate, build_id))
        })?;
        if step.status != StepStatus::Succeeded {
            return Err(Error::StepNotComplete(format!(
                "{} for build {} is {}",
                StepName::Generate,
                build_id,
                step.status
            )));
        }

        let store = &self.inner.backends.store;
        let path = zip_path(&build_id);
        if !store.exists(&path).await? {
            return Err(Error::BuildArtifactNotFound(build_id));
        }
        store.get_stream(&path).await.map_err(|e| match e {
            Error::NotFound(_) => Error::BuildArtifactNotFound(build_id),
            other => other,
        })
    }

    /// Poll every outstanding image build that is due.
    ///
    /// Builds of one application are processed one after another in creation
    /// order; different applications are processed concurrently. Failures are
    /// recorded on the affected build and never abort the sweep. Returns the
    /// number of builds processed.
    pub async fn update_running_builds_status(&self) -> Result<usize> {
        let interval = TimeDelta::from_std(self.inner.config.poll_interval)
            .map_err(|e| Error::Internal(format!("invalid poll interval: {e}")))?;
        let due = self
            .inner
            .backends
            .builds
            .builds_with_running_step(StepName::BuildImage, Utc::now() - interval)
            .await?;
        let count = due.len();

        let mut groups: Vec<(AppId, Vec<Build>)> = Vec::new();
        for build in due {
            match groups.iter_mut().find(|(app_id, _)| *app_id == build.app_id) {
                Some((_, builds)) => builds.push(build),
                None => groups.push((build.app_id, vec![build])),
            }
        }

        let inner = &self.inner;
        join_all(groups.into_iter().map(|(app_id, builds)| async move {
            debug!(app_id = %app_id, builds = builds.len(), "Reconciling image builds");
            for build in builds {
                inner.reconcile_build(build).await;
            }
        }))
        .await;

        Ok(count)
    }
}

impl Inner {
    async fn run_pipeline(&self, build: Build, skip_publish: bool) {
        let action_id = build.action.id;

        let generated = self
            .log
            .run(
                action_id,
                StepName::Generate,
                StepName::Generate.default_message(),
                |step| self.generate(&build, step),
                true,
            )
            .await;
        let context_url = match generated {
            Ok(Some(url)) => url,
            Ok(None) => return,
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Build stopped after generation failure");
                return;
            }
        };

        if skip_publish {
            info!(build_id = %build.id, "Skipping image build and publish");
            return;
        }
        let Some(builder) = self.backends.image_builder.clone() else {
            info!(build_id = %build.id, "No image builder configured, build ends after generation");
            return;
        };

        if let Err(e) = self
            .log
            .run(
                action_id,
                StepName::BuildImage,
                StepName::BuildImage.default_message(),
                |step| self.submit_image_build(&build, builder.as_ref(), context_url, step),
                false,
            )
            .await
        {
            warn!(build_id = %build.id, error = %e, "Could not start image build step");
        }
    }

    async fn ordered_entities(&self, build: &Build) -> Result<Vec<Entity>> {
        let entities = self
            .backends
            .entities
            .entity_versions(build.app_id, &build.commit_id)
            .await?;
        Ok(order_entities(entities))
    }

    /// Generate and package the application, returning the build context
    /// location.
    async fn generate(&self, build: &Build, step: StepContext) -> Result<String> {
        let app = self.backends.applications.app_info(build.app_id).await?;
        let entities = self.ordered_entities(build).await?;
        let roles = self.backends.entities.roles(build.app_id).await?;

        step.info(format!(
            "Generating {} with {} entities and {} roles",
            app.name,
            entities.len(),
            roles.len()
        ))
        .await;

        let input = GenerationInput {
            entities,
            roles,
            app: AppMeta {
                name: app.name,
                description: app.description,
                version: build.version.clone(),
                url: app.url,
            },
        };

        let (sink, mut records) = ChannelSink::new();
        let forwarder = {
            let step = step.clone();
            tokio::spawn(async move {
                while let Some(record) = records.recv().await {
                    step.log(record.level.into(), &record.message, record.meta)
                        .await;
                }
            })
        };

        let generated = self
            .backends
            .generator
            .generate(input, GeneratorLogger::new(sink.clone()))
            .await;

        sink.close();
        if let Err(e) = forwarder.await {
            warn!(build_id = %build.id, error = %e, "Generator log forwarder failed");
        }

        let modules = generated?;
        step.info(format!("Generated {} modules", modules.len())).await;

        let packaged = package(self.backends.store.as_ref(), &build.id, modules).await?;
        for artifact in [&packaged.zip, &packaged.tar_gz] {
            step.log(
                LogLevel::Info,
                format!("Stored {}", artifact.path),
                json!({
                    "path": artifact.path,
                    "sha256": artifact.sha256,
                    "size": artifact.size,
                }),
            )
            .await;
        }

        self.context_location(&packaged.tar_gz.path).await
    }

    async fn context_location(&self, path: &str) -> Result<String> {
        match self.backends.store.url(path).await {
            Ok(url) => Ok(url),
            Err(Error::UrlNotSupported(_)) => Ok(self
                .config
                .artifacts_root
                .join(path)
                .to_string_lossy()
                .into_owned()),
            Err(e) => Err(e),
        }
    }

    async fn submit_image_build(
        &self,
        build: &Build,
        builder: &dyn ImageBuilder,
        context_url: String,
        step: StepContext,
    ) -> Result<()> {
        let repository = &self.config.image_repository;
        let latest = format!("{}:{}-latest", repository, build.app_id);
        let tags = vec![
            format!("{}:{}-{}", repository, build.app_id, build.id),
            latest.clone(),
        ];

        step.log(
            LogLevel::Info,
            "Submitting image build",
            json!({ "tags": tags, "context": context_url }),
        )
        .await;

        let query = builder
            .submit(ImageBuildRequest {
                tags,
                cache_from: vec![latest],
                context_url,
            })
            .await?;
        self.backends
            .builds
            .update_image_build_state(build.id, &query, Utc::now())
            .await?;

        step.info(format!("Image build submitted to {}", builder.name()))
            .await;
        info!(build_id = %build.id, builder = builder.name(), "Image build submitted");

        // Completed by the reconciliation sweep.
        step.detach();
        Ok(())
    }

    async fn reconcile_build(&self, build: Build) {
        let Some((step_id, started_at)) = build
            .action
            .step(StepName::BuildImage)
            .filter(|s| s.status == StepStatus::Running)
            .map(|s| (s.id, s.created_at))
        else {
            return;
        };

        let Some(query) = build.status_query.clone() else {
            let expired = TimeDelta::from_std(self.config.submit_timeout)
                .ok()
                .and_then(|timeout| started_at.checked_add_signed(timeout))
                .is_some_and(|deadline| Utc::now() >= deadline);
            if !expired {
                debug!(build_id = %build.id, "Image build submission still in flight");
                return;
            }
            self.fail_image_build(
                &build,
                step_id,
                "Image build was not submitted before the submit timeout",
            )
            .await;
            return;
        };
        let Some(builder) = self.backends.image_builder.as_ref() else {
            self.fail_image_build(&build, step_id, "No image builder configured")
                .await;
            return;
        };

        match builder.poll(&query).await {
            Err(e) => {
                self.fail_image_build(&build, step_id, &format!("Failed to poll image build: {e}"))
                    .await;
            }
            Ok(ImageBuildStatus::Running { status_query }) => {
                debug!(build_id = %build.id, "Image build still running");
                if let Err(e) = self
                    .backends
                    .builds
                    .update_image_build_state(build.id, &status_query, Utc::now())
                    .await
                {
                    warn!(build_id = %build.id, error = %e, "Failed to record image build poll");
                }
            }
            Ok(ImageBuildStatus::Failed { message }) => {
                self.fail_image_build(&build, step_id, &format!("Image build failed: {message}"))
                    .await;
            }
            Ok(ImageBuildStatus::Completed { images }) => {
                self.finish_image_build(build, step_id, images).await;
            }
        }
    }

    async fn fail_image_build(&self, build: &Build, step_id: StepId, message: &str) {
        warn!(build_id = %build.id, reason = message, "Image build failed");
        self.log
            .log(step_id, LogLevel::Error, message, serde_json::Value::Null)
            .await;
        if let Err(e) = self.log.complete(step_id, StepStatus::Failed).await {
            warn!(build_id = %build.id, error = %e, "Failed to mark image build step failed");
        }
    }

    async fn finish_image_build(&self, mut build: Build, step_id: StepId, images: Vec<String>) {
        if let Err(e) = self.backends.builds.set_images(build.id, &images).await {
            // Step stays Running, the next sweep retries.
            warn!(build_id = %build.id, error = %e, "Failed to store image references");
            return;
        }
        self.log
            .log(
                step_id,
                LogLevel::Info,
                "Image build completed",
                json!({ "images": images }),
            )
            .await;
        match self.log.complete(step_id, StepStatus::Succeeded).await {
            Ok(_) => {}
            Err(Error::InvalidStepTransition { .. }) => {
                debug!(build_id = %build.id, "Image build step already completed");
                return;
            }
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Failed to complete image build step");
                return;
            }
        }
        info!(build_id = %build.id, images = images.len(), "Image build completed");
        build.images = images;

        let deployer = &self.backends.deployer;
        if deployer.can_deploy() {
            match deployer.auto_deploy_to_sandbox(&build).await {
                Ok(()) => {
                    self.log
                        .log_info(
                            step_id,
                            "Triggered sandbox deployment",
                            Some(json!({ "deployer": deployer.name() })),
                        )
                        .await;
                }
                Err(e) => {
                    warn!(build_id = %build.id, error = %e, "Sandbox deployment failed");
                    self.log
                        .log(
                            step_id,
                            LogLevel::Warning,
                            &format!("Sandbox deployment failed: {e}"),
                            serde_json::Value::Null,
                        )
                        .await;
                }
            }
        }

        let app = match self.backends.applications.app_info(build.app_id).await {
            Ok(app) => app,
            Err(e) => {
                warn!(build_id = %build.id, error = %e, "Cannot load application, skipping publish");
                return;
            }
        };
        let Some(source) = app.source else {
            debug!(build_id = %build.id, "No source repository connected, skipping publish");
            return;
        };

        if let Err(e) = self
            .log
            .run(
                build.action.id,
                StepName::PublishSource,
                StepName::PublishSource.default_message(),
                |step| self.publish(&build, source, step),
                false,
            )
            .await
        {
            warn!(build_id = %build.id, error = %e, "Could not start publish step");
        }
    }

    /// Publish the generated sources and report the outcome to the
    /// application.
    async fn publish(&self, build: &Build, source: SourceRepository, step: StepContext) -> Result<()> {
        let applications = &self.backends.applications;
        match self.push_source(build, source, &step).await {
            Ok(url) => {
                step.log(LogLevel::Info, "Pull request ready", json!({ "url": url }))
                    .await;
                if let Err(e) = applications.report_sync_success(build.app_id, &url).await {
                    warn!(build_id = %build.id, error = %e, "Failed to report sync success");
                }
                Ok(())
            }
            Err(err) => {
                if let Err(e) = applications
                    .report_sync_failure(build.app_id, &err.to_string())
                    .await
                {
                    warn!(build_id = %build.id, error = %e, "Failed to report sync failure");
                }
                Err(err)
            }
        }
    }

    async fn push_source(
        &self,
        build: &Build,
        source: SourceRepository,
        step: &StepContext,
    ) -> Result<String> {
        let archive = self.read_artifact(&zip_path(&build.id)).await?;
        let modules = tokio::task::spawn_blocking(move || unpack_zip(&archive))
            .await
            .map_err(ArchiveError::from)??;

        let commit_message = build
            .message
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.config.default_commit_message, build.id));
        let branch = format!("{}-{}", self.config.branch_prefix, build.id);

        step.log(
            LogLevel::Info,
            format!(
                "Publishing {} modules to {}/{}",
                modules.len(),
                source.owner,
                source.name
            ),
            json!({ "branch": branch }),
        )
        .await;

        self.backends
            .publisher
            .publish(PublishRequest {
                owner: source.owner,
                repo: source.name,
                modules,
                branch,
                commit_message,
                pr_body: format!(
                    "Generated by AppForge build {} (version {}).",
                    build.id, build.version
                ),
                base_branch: source.base_branch,
                credential: source.credential,
            })
            .await
    }

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.backends.store.get_stream(path).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Storage(format!("failed to read {path}: {e}")))?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

/// Forwards generator log records to a channel until closed.
struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<GeneratorLogRecord>>>,
}

impl ChannelSink {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<GeneratorLogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Drop the sender so the receiving side drains and ends, even if the
    /// generator kept a logger clone.
    fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

impl LogSink for ChannelSink {
    fn record(&self, record: GeneratorLogRecord) {
        let Ok(tx) = self.tx.lock() else {
            return;
        };
        match tx.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(record) {
                    debug!(record = %e.0.message, "Generator log record after step ended");
                }
            }
            None => debug!(record = %record.message, "Generator log record after sink closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_artifacts::MemoryArtifactStore;
    use appforge_core::application::AppInfo;
    use appforge_core::generator::{GeneratorLevel, Module};
    use appforge_core::image::StatusQuery;
    use appforge_db::{MemoryApplications, MemoryRepo};
    use async_trait::async_trait;

    struct FixedGenerator;

    #[async_trait]
    impl CodeGenerator for FixedGenerator {
        async fn generate(
            &self,
            input: GenerationInput,
            logger: GeneratorLogger,
        ) -> Result<Vec<Module>> {
            logger.warn("no roles defined");
            Ok(vec![Module {
                path: "app.json".to_string(),
                code: serde_json::to_string(&input.app).unwrap(),
            }])
        }
    }

    struct NoPublish;

    #[async_trait]
    impl SourcePublisher for NoPublish {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn publish(&self, _request: PublishRequest) -> Result<String> {
            Err(Error::Publish("not configured".to_string()))
        }
    }

    struct NoDeploy;

    #[async_trait]
    impl SandboxDeployer for NoDeploy {
        fn name(&self) -> &'static str {
            "none"
        }

        fn can_deploy(&self) -> bool {
            false
        }

        async fn auto_deploy_to_sandbox(&self, _build: &Build) -> Result<()> {
            Ok(())
        }
    }

    struct UrlStore(MemoryArtifactStore);

    #[async_trait]
    impl ArtifactStore for UrlStore {
        async fn put(&self, path: &str, data: bytes::Bytes) -> Result<()> {
            self.0.put(path, data).await
        }

        async fn get_stream(&self, path: &str) -> Result<ByteStream> {
            self.0.get_stream(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.0.exists(path).await
        }

        async fn url(&self, path: &str) -> Result<String> {
            Ok(format!("https://artifacts.example.com/{path}"))
        }
    }

    fn setup(store: Arc<dyn ArtifactStore>) -> (BuildOrchestrator, MemoryRepo, AppId) {
        let config = OrchestratorConfig {
            artifacts_root: PathBuf::from("/var/lib/appforge"),
            ..OrchestratorConfig::default()
        };
        setup_with(store, config)
    }

    fn setup_with(
        store: Arc<dyn ArtifactStore>,
        config: OrchestratorConfig,
    ) -> (BuildOrchestrator, MemoryRepo, AppId) {
        let repo = MemoryRepo::new();
        let apps = MemoryApplications::new();
        let app_id = AppId::new();
        apps.insert_app(AppInfo {
            id: app_id,
            name: "crm".to_string(),
            description: "Customer records".to_string(),
            url: "https://crm.example.com".to_string(),
            source: None,
        })
        .unwrap();

        let backends = Backends {
            builds: Arc::new(repo.clone()),
            actions: Arc::new(repo.clone()),
            entities: Arc::new(apps.clone()),
            applications: Arc::new(apps),
            generator: Arc::new(FixedGenerator),
            store,
            image_builder: None,
            publisher: Arc::new(NoPublish),
            deployer: Arc::new(NoDeploy),
        };
        (BuildOrchestrator::new(backends, config), repo, app_id)
    }

    fn request(app_id: AppId, commit_id: &str) -> BuildRequest {
        BuildRequest {
            app_id,
            commit_id: commit_id.to_string(),
            message: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_empty_commit() {
        let (orchestrator, _, app_id) = setup(Arc::new(MemoryArtifactStore::new()));
        let err = orchestrator
            .create(request(app_id, "  "), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_app() {
        let (orchestrator, repo, _) = setup(Arc::new(MemoryArtifactStore::new()));
        let err = orchestrator
            .create(request(AppId::new(), "0123456789abcdef"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(repo.list_builds(&BuildFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_without_image_builder_completes_build() {
        let (orchestrator, _, app_id) = setup(Arc::new(MemoryArtifactStore::new()));

        let submitted = orchestrator
            .create(request(app_id, "0123456789abcdef"), false)
            .await
            .unwrap();
        assert_eq!(submitted.build.version, "89abcdef");
        submitted.pipeline.await.unwrap();

        let build = orchestrator.find_one(submitted.build.id).await.unwrap();
        assert_eq!(build.status(), BuildStatus::Completed);
        assert!(build.action.step(StepName::BuildImage).is_none());

        let generate = build.action.step(StepName::Generate).unwrap();
        assert_eq!(generate.status, StepStatus::Succeeded);
        assert!(generate.logs.iter().any(|l| {
            l.level == LogLevel::Warning && l.message == "no roles defined"
        }));
        let stored: Vec<_> = generate
            .logs
            .iter()
            .filter(|l| l.meta.get("sha256").is_some())
            .collect();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_context_location_falls_back_to_artifacts_root() {
        let (orchestrator, _, _) = setup(Arc::new(MemoryArtifactStore::new()));
        let location = orchestrator
            .inner
            .context_location("builds/x.tar.gz")
            .await
            .unwrap();
        assert_eq!(location, "/var/lib/appforge/builds/x.tar.gz");
    }

    #[tokio::test]
    async fn test_context_location_prefers_store_url() {
        let (orchestrator, _, _) = setup(Arc::new(UrlStore(MemoryArtifactStore::new())));
        let location = orchestrator
            .inner
            .context_location("builds/x.tar.gz")
            .await
            .unwrap();
        assert_eq!(location, "https://artifacts.example.com/builds/x.tar.gz");
    }

    #[tokio::test]
    async fn test_unsubmitted_build_fails_after_submit_timeout() {
        let config = OrchestratorConfig {
            submit_timeout: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        let (orchestrator, repo, app_id) =
            setup_with(Arc::new(MemoryArtifactStore::new()), config);
        let build = repo
            .create_build(NewBuild {
                app_id,
                commit_id: "0123456789abcdef".to_string(),
                message: None,
                version: "89abcdef".to_string(),
            })
            .await
            .unwrap();
        orchestrator
            .action_log()
            .begin_step(build.action.id, StepName::BuildImage, "Building container image")
            .await
            .unwrap();

        let processed = orchestrator.update_running_builds_status().await.unwrap();
        assert_eq!(processed, 1);

        let build = orchestrator.find_one(build.id).await.unwrap();
        assert_eq!(build.status(), BuildStatus::Failed);
        let step = build.action.step(StepName::BuildImage).unwrap();
        assert!(step.logs.iter().any(|l| l.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_unsubmitted_build_within_submit_timeout_stays_running() {
        let (orchestrator, repo, app_id) = setup(Arc::new(MemoryArtifactStore::new()));
        let build = repo
            .create_build(NewBuild {
                app_id,
                commit_id: "0123456789abcdef".to_string(),
                message: None,
                version: "89abcdef".to_string(),
            })
            .await
            .unwrap();
        orchestrator
            .action_log()
            .begin_step(build.action.id, StepName::BuildImage, "Building container image")
            .await
            .unwrap();

        orchestrator.update_running_builds_status().await.unwrap();

        let build = orchestrator.find_one(build.id).await.unwrap();
        let step = build.action.step(StepName::BuildImage).unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.logs.iter().all(|l| l.level != LogLevel::Error));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_records_once_closed() {
        let (sink, mut rx) = ChannelSink::new();
        sink.record(GeneratorLogRecord {
            level: GeneratorLevel::Info,
            message: "first".to_string(),
            meta: serde_json::Value::Null,
        });
        sink.close();
        sink.record(GeneratorLogRecord {
            level: GeneratorLevel::Info,
            message: "late".to_string(),
            meta: serde_json::Value::Null,
        });

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recently_polled_build_is_not_due() {
        let (orchestrator, repo, app_id) = setup(Arc::new(MemoryArtifactStore::new()));
        let build = repo
            .create_build(NewBuild {
                app_id,
                commit_id: "0123456789abcdef".to_string(),
                message: None,
                version: "89abcdef".to_string(),
            })
            .await
            .unwrap();
        orchestrator
            .action_log()
            .begin_step(build.action.id, StepName::BuildImage, "Building container image")
            .await
            .unwrap();
        repo.update_image_build_state(build.id, &StatusQuery(json!({"id": "b-1"})), Utc::now())
            .await
            .unwrap();

        assert_eq!(orchestrator.update_running_builds_status().await.unwrap(), 0);
        assert_eq!(
            orchestrator.calc_build_status(build.id).await.unwrap(),
            BuildStatus::Running
        );
    }
}
