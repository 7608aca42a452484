//! Source publishing abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generator::Module;
use crate::Result;

/// Credential used to push to the source-control host.
#[derive(Clone, Serialize, Deserialize)]
pub enum SourceCredential {
    /// Bearer token (personal or installation access token).
    Token(String),
}

impl std::fmt::Debug for SourceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceCredential::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// Request to publish generated modules as a pull request.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub owner: String,
    pub repo: String,
    pub modules: Vec<Module>,
    pub branch: String,
    pub commit_message: String,
    pub pr_body: String,
    /// Branch to open the pull request against; the repository default when
    /// `None`.
    pub base_branch: Option<String>,
    pub credential: SourceCredential,
}

/// Trait for source-control publishing backends.
#[async_trait]
pub trait SourcePublisher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create or update the pull request for `request.branch`, returning its
    /// URL. Fails with `Error::Publish` carrying the upstream detail.
    async fn publish(&self, request: PublishRequest) -> Result<String>;
}
