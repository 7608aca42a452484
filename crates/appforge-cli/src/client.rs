//! HTTP client for the AppForge API.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base =
            Url::parse(api_url).with_context(|| format!("invalid API URL: {api_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// Resolve an API path such as `api/v1/builds` against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid API path: {path}"))?;
        debug!(%url, "API request");
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .query(query)
            .header("User-Agent", "AppForge-CLI")
            .send()
            .await
            .context("request failed")?;
        let response = check(response).await?;
        response.json().await.context("invalid response body")
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .header("User-Agent", "AppForge-CLI")
            .json(body)
            .send()
            .await
            .context("request failed")?;
        let response = check(response).await?;
        response.json().await.context("invalid response body")
    }

    /// Issue a GET and return the raw response for streaming.
    pub async fn get_raw(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.url(path)?)
            .header("User-Agent", "AppForge-CLI")
            .send()
            .await
            .context("request failed")?;
        check(response).await
    }
}

/// Turn non-success responses into errors carrying the server's message.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(text);
    bail!("{}: {}", status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_url_joins_below_base_path() {
        let client = ApiClient::new("https://forge.example.com/prefix").unwrap();
        assert_eq!(
            client.url("/api/v1/builds").unwrap().as_str(),
            "https://forge.example.com/prefix/api/v1/builds"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_get_json_passes_query() {
        let app = Router::new().route(
            "/api/v1/builds",
            get(|axum::extract::RawQuery(query): axum::extract::RawQuery| async move {
                Json(json!({ "query": query }))
            }),
        );
        let client = ApiClient::new(&serve(app).await).unwrap();

        let body: Value = client
            .get_json("api/v1/builds", &[("limit", "5".to_string())])
            .await
            .unwrap();
        assert_eq!(body["query"], "limit=5");
    }

    #[tokio::test]
    async fn test_error_message_from_body() {
        let app = Router::new().route(
            "/api/v1/builds/x",
            get(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "error": "step not complete: GENERATE_APPLICATION" })),
                )
            }),
        );
        let client = ApiClient::new(&serve(app).await).unwrap();

        let err = client
            .get_json::<Value>("api/v1/builds/x", &[])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("409"));
        assert!(message.contains("step not complete"));
    }
}
