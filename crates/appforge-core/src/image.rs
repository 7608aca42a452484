//! Remote image build abstraction.
//!
//! Image builders run container builds on an external service. A build is
//! submitted once and then observed by polling an opaque [`StatusQuery`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Opaque, backend-specific handle for polling an image build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusQuery(pub serde_json::Value);

/// Request to build and push an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildRequest {
    /// Tags to push on success.
    pub tags: Vec<String>,
    /// Images whose layers may be reused.
    pub cache_from: Vec<String>,
    /// Location of the gzipped tar build context.
    pub context_url: String,
}

/// Result of polling an image build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageBuildStatus {
    /// Still in progress; the handle to use for the next poll.
    Running { status_query: StatusQuery },
    Completed { images: Vec<String> },
    Failed { message: String },
}

impl ImageBuildStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImageBuildStatus::Running { .. })
    }
}

/// Trait for remote image build backends.
///
/// `poll` must be safe to call repeatedly and must keep returning the same
/// terminal result once one is reached.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Submit a build, returning the handle to poll.
    async fn submit(&self, request: ImageBuildRequest) -> Result<StatusQuery>;

    /// Query the current state of a submitted build.
    async fn poll(&self, query: &StatusQuery) -> Result<ImageBuildStatus>;
}
