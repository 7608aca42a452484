//! Sandbox deployment trigger.

use async_trait::async_trait;

use crate::Result;
use crate::build::Build;

/// Trait for deployment backends triggered after a successful image build.
#[async_trait]
pub trait SandboxDeployer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether deployments are configured at all.
    fn can_deploy(&self) -> bool;

    /// Start a deployment of the build's images to the sandbox environment.
    async fn auto_deploy_to_sandbox(&self, build: &Build) -> Result<()>;
}
