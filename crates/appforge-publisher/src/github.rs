//! GitHub source publisher.
//!
//! Publishing a build is a sequence of Git data API calls:
//! 1. resolve the head commit of the base branch
//! 2. create a tree holding the modules on top of the base tree
//! 3. create a commit for that tree
//! 4. create the build branch, or force-move it if it exists
//! 5. reuse the open pull request for the branch, or open one

use appforge_core::publisher::{PublishRequest, SourceCredential, SourcePublisher};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

/// Default GitHub API location.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for appforge_core::Error {
    fn from(err: GitHubError) -> Self {
        appforge_core::Error::Publish(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct Repository {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Reference {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
}

/// Publishes generated modules to GitHub repositories.
pub struct GitHubPublisher {
    client: reqwest::Client,
    api_url: String,
}

impl Default for GitHubPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl GitHubPublisher {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_url,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            path
        )
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        credential: &SourceCredential,
    ) -> reqwest::RequestBuilder {
        let SourceCredential::Token(token) = credential;
        builder
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "AppForge")
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send a request; `Ok(None)` on 404.
    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        credential: &SourceCredential,
        what: &str,
    ) -> Result<Option<T>, GitHubError> {
        let response = self
            .authorized(builder, credential)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status: status.as_u16(),
                message: format!("Failed to {}: {}", what, text),
            });
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| GitHubError::Parse(e.to_string()))
    }

    /// Like [`Self::send`], but a 404 is an error.
    async fn send_required<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        credential: &SourceCredential,
        what: &str,
    ) -> Result<T, GitHubError> {
        self.send(builder, credential, what)
            .await?
            .ok_or_else(|| GitHubError::Api {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("Failed to {}: not found", what),
            })
    }

    async fn base_branch(&self, request: &PublishRequest) -> Result<String, GitHubError> {
        if let Some(branch) = &request.base_branch {
            return Ok(branch.clone());
        }
        let url = self.repo_url(&request.owner, &request.repo, "");
        let repo: Repository = self
            .send_required(self.client.get(&url), &request.credential, "get repository")
            .await?;
        Ok(repo.default_branch)
    }

    async fn publish_inner(&self, request: &PublishRequest) -> Result<String, GitHubError> {
        let credential = &request.credential;
        let (owner, repo) = (request.owner.as_str(), request.repo.as_str());

        let base = self.base_branch(request).await?;
        let base_ref: Reference = self
            .send_required(
                self.client.get(self.repo_url(
                    owner,
                    repo,
                    &format!("/git/ref/heads/{}", urlencoding::encode(&base)),
                )),
                credential,
                "get base branch",
            )
            .await?;
        let base_commit: Commit = self
            .send_required(
                self.client.get(self.repo_url(
                    owner,
                    repo,
                    &format!("/git/commits/{}", base_ref.object.sha),
                )),
                credential,
                "get base commit",
            )
            .await?;

        let entries: Vec<_> = request
            .modules
            .iter()
            .map(|m| {
                json!({
                    "path": m.path,
                    "mode": "100644",
                    "type": "blob",
                    "content": m.code,
                })
            })
            .collect();
        let tree: GitObject = self
            .send_required(
                self.client
                    .post(self.repo_url(owner, repo, "/git/trees"))
                    .json(&json!({ "base_tree": base_commit.tree.sha, "tree": entries })),
                credential,
                "create tree",
            )
            .await?;

        let commit: GitObject = self
            .send_required(
                self.client
                    .post(self.repo_url(owner, repo, "/git/commits"))
                    .json(&json!({
                        "message": request.commit_message,
                        "tree": tree.sha,
                        "parents": [base_commit.sha],
                    })),
                credential,
                "create commit",
            )
            .await?;
        debug!(owner, repo, commit = %commit.sha, "Created commit");

        let branch_path = format!("/git/ref/heads/{}", urlencoding::encode(&request.branch));
        let existing: Option<Reference> = self
            .send(
                self.client.get(self.repo_url(owner, repo, &branch_path)),
                credential,
                "get branch",
            )
            .await?;
        match existing {
            Some(_) => {
                let _: Reference = self
                    .send_required(
                        self.client
                            .patch(self.repo_url(
                                owner,
                                repo,
                                &format!("/git/refs/heads/{}", urlencoding::encode(&request.branch)),
                            ))
                            .json(&json!({ "sha": commit.sha, "force": true })),
                        credential,
                        "update branch",
                    )
                    .await?;
            }
            None => {
                let _: Reference = self
                    .send_required(
                        self.client
                            .post(self.repo_url(owner, repo, "/git/refs"))
                            .json(&json!({
                                "ref": format!("refs/heads/{}", request.branch),
                                "sha": commit.sha,
                            })),
                        credential,
                        "create branch",
                    )
                    .await?;
            }
        }

        let open: Vec<PullRequest> = self
            .send_required(
                self.client
                    .get(self.repo_url(owner, repo, "/pulls"))
                    .query(&[
                        ("head", format!("{}:{}", owner, request.branch)),
                        ("state", "open".to_string()),
                    ]),
                credential,
                "list pull requests",
            )
            .await?;
        if let Some(pr) = open.into_iter().next() {
            return Ok(pr.html_url);
        }

        let title = request
            .commit_message
            .lines()
            .next()
            .unwrap_or(&request.branch)
            .to_string();
        let pr: PullRequest = self
            .send_required(
                self.client
                    .post(self.repo_url(owner, repo, "/pulls"))
                    .json(&json!({
                        "title": title,
                        "head": request.branch,
                        "base": base,
                        "body": request.pr_body,
                    })),
                credential,
                "create pull request",
            )
            .await?;
        Ok(pr.html_url)
    }
}

#[async_trait]
impl SourcePublisher for GitHubPublisher {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn publish(&self, request: PublishRequest) -> appforge_core::Result<String> {
        let url = self.publish_inner(&request).await?;
        info!(
            owner = %request.owner,
            repo = %request.repo,
            branch = %request.branch,
            modules = request.modules.len(),
            pull_request = %url,
            "Published generated sources"
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_core::generator::Module;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, patch, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeRepo {
        refs: HashMap<String, String>,
        trees: Vec<Value>,
        commits: Vec<Value>,
        pulls: Vec<(String, String)>,
        ref_updates: usize,
    }

    type Shared = Arc<Mutex<FakeRepo>>;

    async fn serve(state: Shared) -> String {
        async fn repository() -> Json<Value> {
            Json(json!({ "default_branch": "main" }))
        }

        async fn get_ref(
            State(state): State<Shared>,
            Path((_, _, branch)): Path<(String, String, String)>,
        ) -> Result<Json<Value>, HttpStatus> {
            let state = state.lock().unwrap();
            state
                .refs
                .get(&branch)
                .map(|sha| Json(json!({ "object": { "sha": sha } })))
                .ok_or(HttpStatus::NOT_FOUND)
        }

        async fn get_commit(Path((_, _, sha)): Path<(String, String, String)>) -> Json<Value> {
            Json(json!({ "sha": sha, "tree": { "sha": format!("tree-of-{sha}") } }))
        }

        async fn create_tree(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
            state.lock().unwrap().trees.push(body);
            Json(json!({ "sha": "tree-new" }))
        }

        async fn create_commit(
            State(state): State<Shared>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            let mut state = state.lock().unwrap();
            state.commits.push(body);
            Json(json!({ "sha": format!("commit-{}", state.commits.len()) }))
        }

        async fn create_ref(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
            let name = body["ref"].as_str().unwrap().trim_start_matches("refs/heads/");
            let sha = body["sha"].as_str().unwrap().to_string();
            state.lock().unwrap().refs.insert(name.to_string(), sha.clone());
            Json(json!({ "object": { "sha": sha } }))
        }

        async fn update_ref(
            State(state): State<Shared>,
            Path((_, _, branch)): Path<(String, String, String)>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            assert_eq!(body["force"], true);
            let sha = body["sha"].as_str().unwrap().to_string();
            let mut state = state.lock().unwrap();
            state.refs.insert(branch, sha.clone());
            state.ref_updates += 1;
            Json(json!({ "object": { "sha": sha } }))
        }

        async fn list_pulls(
            State(state): State<Shared>,
            Query(query): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            let state = state.lock().unwrap();
            let head = query.get("head").cloned().unwrap_or_default();
            let open: Vec<Value> = state
                .pulls
                .iter()
                .filter(|(h, _)| *h == head)
                .map(|(_, url)| json!({ "html_url": url }))
                .collect();
            Json(Value::Array(open))
        }

        async fn create_pull(
            State(state): State<Shared>,
            Path((owner, repo)): Path<(String, String)>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            assert_eq!(body["base"], "main");
            let mut state = state.lock().unwrap();
            let number = state.pulls.len() + 1;
            let url = format!("https://github.com/{owner}/{repo}/pull/{number}");
            let head = format!("{owner}:{}", body["head"].as_str().unwrap());
            state.pulls.push((head, url.clone()));
            Json(json!({ "html_url": url }))
        }

        let app = Router::new()
            .route("/repos/{owner}/{repo}", get(repository))
            .route("/repos/{owner}/{repo}/git/ref/heads/{branch}", get(get_ref))
            .route("/repos/{owner}/{repo}/git/commits/{sha}", get(get_commit))
            .route("/repos/{owner}/{repo}/git/trees", post(create_tree))
            .route("/repos/{owner}/{repo}/git/commits", post(create_commit))
            .route("/repos/{owner}/{repo}/git/refs", post(create_ref))
            .route("/repos/{owner}/{repo}/git/refs/heads/{branch}", patch(update_ref))
            .route("/repos/{owner}/{repo}/pulls", get(list_pulls).post(create_pull))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(branch: &str) -> PublishRequest {
        PublishRequest {
            owner: "acme".to_string(),
            repo: "crm".to_string(),
            modules: vec![Module {
                path: "src/app.ts".to_string(),
                code: "export {}\n".to_string(),
            }],
            branch: branch.to_string(),
            commit_message: "Add customer entity\n\nDetails".to_string(),
            pr_body: "Generated by AppForge".to_string(),
            base_branch: None,
            credential: SourceCredential::Token("ghs_test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_publish_creates_branch_and_pull_request() {
        let state: Shared = Arc::default();
        state
            .lock()
            .unwrap()
            .refs
            .insert("main".to_string(), "base-sha".to_string());
        let publisher = GitHubPublisher::new(serve(state.clone()).await);

        let url = publisher.publish(request("appforge-build-1")).await.unwrap();

        assert_eq!(url, "https://github.com/acme/crm/pull/1");
        let state = state.lock().unwrap();
        assert_eq!(state.trees[0]["base_tree"], "tree-of-base-sha");
        assert_eq!(state.trees[0]["tree"][0]["path"], "src/app.ts");
        assert_eq!(state.commits[0]["parents"][0], "base-sha");
        assert_eq!(state.refs["appforge-build-1"], "commit-1");
        assert_eq!(state.ref_updates, 0);
    }

    #[tokio::test]
    async fn test_republish_force_updates_and_reuses_pull_request() {
        let state: Shared = Arc::default();
        state
            .lock()
            .unwrap()
            .refs
            .insert("main".to_string(), "base-sha".to_string());
        let publisher = GitHubPublisher::new(serve(state.clone()).await);

        let first = publisher.publish(request("appforge-build-2")).await.unwrap();
        let second = publisher.publish(request("appforge-build-2")).await.unwrap();

        assert_eq!(first, second);
        let state = state.lock().unwrap();
        assert_eq!(state.pulls.len(), 1);
        assert_eq!(state.ref_updates, 1);
        assert_eq!(state.refs["appforge-build-2"], "commit-2");
    }

    #[tokio::test]
    async fn test_missing_base_branch_is_publish_error() {
        let state: Shared = Arc::default();
        let publisher = GitHubPublisher::new(serve(state).await);

        let err = publisher.publish(request("appforge-build-3")).await.unwrap_err();
        match err {
            appforge_core::Error::Publish(detail) => assert!(detail.contains("get base branch")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
