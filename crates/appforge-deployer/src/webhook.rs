//! Webhook sandbox deployer.

use appforge_core::build::Build;
use appforge_core::deployer::SandboxDeployer;
use appforge_core::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Body posted to the deployment service.
#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    app_id: String,
    build_id: String,
    version: &'a str,
    images: &'a [String],
}

/// Triggers sandbox deployments by POSTing to a deployment service.
///
/// Without an endpoint, `can_deploy` is false and the orchestrator never
/// calls `auto_deploy_to_sandbox`.
pub struct WebhookDeployer {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl WebhookDeployer {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// A deployer that never deploys.
    pub fn disabled() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SandboxDeployer for WebhookDeployer {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn can_deploy(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn auto_deploy_to_sandbox(&self, build: &Build) -> Result<()> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("no deployment endpoint configured".to_string()))?;

        let body = DeployRequest {
            app_id: build.app_id.to_string(),
            build_id: build.id.to_string(),
            version: &build.version,
            images: &build.images,
        };

        let response = self
            .client
            .post(endpoint)
            .header("User-Agent", "AppForge")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("deploy request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "deploy request rejected ({}): {}",
                status, text
            )));
        }

        info!(build_id = %build.id, app_id = %build.app_id, "Triggered sandbox deployment");
        Ok(())
    }
}
