//! HTTP image build backend.
//!
//! Talks to an image build service exposing:
//! - `POST {endpoint}/builds` with `{tags, cache_from, context_url}`,
//!   answering `{id, status}`
//! - `GET {endpoint}/builds/{id}`, answering
//!   `{id, status, images?, message?}`

use appforge_core::image::{ImageBuildRequest, ImageBuildStatus, ImageBuilder, StatusQuery};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ImageBuildError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("unknown build status: {0}")]
    UnknownStatus(String),

    #[error("invalid status query: {0}")]
    InvalidQuery(String),
}

impl From<ImageBuildError> for appforge_core::Error {
    fn from(err: ImageBuildError) -> Self {
        match err {
            ImageBuildError::InvalidQuery(msg) => appforge_core::Error::InvalidInput(msg),
            other => appforge_core::Error::Transport(other.to_string()),
        }
    }
}

/// Handle persisted between polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BuildHandle {
    id: String,
    /// Requested tags, reported as the images when the service omits them.
    #[serde(default)]
    tags: Vec<String>,
}

impl BuildHandle {
    fn to_query(&self) -> StatusQuery {
        StatusQuery(serde_json::json!({ "id": self.id, "tags": self.tags }))
    }

    fn from_query(query: &StatusQuery) -> Result<Self, ImageBuildError> {
        serde_json::from_value(query.0.clone())
            .map_err(|e| ImageBuildError::InvalidQuery(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RemoteBuild {
    id: String,
    status: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a remote build state onto [`ImageBuildStatus`].
fn interpret(remote: RemoteBuild, handle: &BuildHandle) -> Result<ImageBuildStatus, ImageBuildError> {
    match remote.status.as_str() {
        "queued" | "pending" | "working" => Ok(ImageBuildStatus::Running {
            status_query: handle.to_query(),
        }),
        "success" => {
            let images = if remote.images.is_empty() {
                handle.tags.clone()
            } else {
                remote.images
            };
            Ok(ImageBuildStatus::Completed { images })
        }
        "failure" | "internal_error" | "timeout" | "cancelled" | "expired" => {
            let message = remote
                .message
                .unwrap_or_else(|| format!("image build {} ended with {}", remote.id, remote.status));
            Ok(ImageBuildStatus::Failed { message })
        }
        other => Err(ImageBuildError::UnknownStatus(other.to_string())),
    }
}

/// Number of terminal results kept for repeated polls.
const FINISHED_CAPACITY: usize = 256;

/// Terminal results by remote build id, oldest evicted first.
#[derive(Debug, Default)]
struct FinishedBuilds {
    statuses: HashMap<String, ImageBuildStatus>,
    order: VecDeque<String>,
}

impl FinishedBuilds {
    fn get(&self, id: &str) -> Option<ImageBuildStatus> {
        self.statuses.get(id).cloned()
    }

    fn insert(&mut self, id: &str, status: ImageBuildStatus, capacity: usize) {
        if self.statuses.insert(id.to_string(), status).is_none() {
            self.order.push_back(id.to_string());
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

/// Image builder backed by a remote HTTP build service.
pub struct HttpImageBuilder {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    /// The service may expire finished builds; recent terminal results are
    /// answered from here.
    finished: Mutex<FinishedBuilds>,
    finished_capacity: usize,
}

impl HttpImageBuilder {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            finished: Mutex::new(FinishedBuilds::default()),
            finished_capacity: FINISHED_CAPACITY,
        }
    }

    /// Limit how many terminal results are remembered.
    pub fn with_finished_capacity(mut self, capacity: usize) -> Self {
        self.finished_capacity = capacity;
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder
            .header("User-Agent", "AppForge")
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_build(response: reqwest::Response) -> Result<RemoteBuild, ImageBuildError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ImageBuildError::Api { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| ImageBuildError::Parse(e.to_string()))
    }

    fn memoized(&self, id: &str) -> Option<ImageBuildStatus> {
        self.finished
            .lock()
            .ok()
            .and_then(|finished| finished.get(id))
    }

    fn remember(&self, id: &str, status: &ImageBuildStatus) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.insert(id, status.clone(), self.finished_capacity);
            debug!(build = %id, remembered = finished.len(), "Remembered terminal image build");
        }
    }
}

#[async_trait]
impl ImageBuilder for HttpImageBuilder {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit(&self, request: ImageBuildRequest) -> appforge_core::Result<StatusQuery> {
        let url = format!("{}/builds", self.endpoint);
        let response = self
            .request(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ImageBuildError::Request(e.to_string()))?;
        let remote = Self::read_build(response).await?;

        info!(build = %remote.id, status = %remote.status, tags = ?request.tags, "Submitted image build");

        Ok(BuildHandle {
            id: remote.id,
            tags: request.tags,
        }
        .to_query())
    }

    async fn poll(&self, query: &StatusQuery) -> appforge_core::Result<ImageBuildStatus> {
        let handle = BuildHandle::from_query(query)?;
        if let Some(status) = self.memoized(&handle.id) {
            return Ok(status);
        }

        let url = format!(
            "{}/builds/{}",
            self.endpoint,
            urlencoding::encode(&handle.id)
        );
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ImageBuildError::Request(e.to_string()))?;
        let remote = Self::read_build(response).await?;
        debug!(build = %remote.id, status = %remote.status, "Polled image build");

        let status = interpret(remote, &handle)?;
        if status.is_terminal() {
            self.remember(&handle.id, &status);
        }
        Ok(status)
    }
}
