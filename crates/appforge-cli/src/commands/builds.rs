//! Build commands.

use anyhow::{Context, Result};
use appforge_core::{BuildStatus, Step, StepName, StepStatus};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::client::ApiClient;

const WAIT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct StepView {
    name: StepName,
    message: String,
    status: StepStatus,
}

#[derive(Debug, Deserialize)]
struct BuildView {
    id: String,
    app_id: String,
    commit_id: String,
    message: Option<String>,
    version: String,
    status: BuildStatus,
    images: Vec<String>,
    created_at: String,
    steps: Vec<StepView>,
}

#[derive(Debug, Deserialize)]
struct StatusView {
    status: BuildStatus,
}

fn is_finished(status: BuildStatus) -> bool {
    matches!(status, BuildStatus::Completed | BuildStatus::Failed)
}

pub async fn create(
    client: &ApiClient,
    app: &str,
    commit: &str,
    message: Option<String>,
    skip_publish: bool,
    wait: bool,
) -> Result<()> {
    let build: BuildView = client
        .post_json(
            &format!("api/v1/apps/{app}/builds"),
            &json!({
                "commit_id": commit,
                "message": message,
                "skip_publish": skip_publish,
            }),
        )
        .await?;
    println!("Created build {} (version {})", build.id, build.version);

    if wait {
        let status = wait_for(client, &build.id).await?;
        println!("Build {} {}", build.id, status);
        if status == BuildStatus::Failed {
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn wait_for(client: &ApiClient, id: &str) -> Result<BuildStatus> {
    loop {
        let view: StatusView = client
            .get_json(&format!("api/v1/builds/{id}/status"), &[])
            .await?;
        if is_finished(view.status) {
            return Ok(view.status);
        }
        debug!(build_id = %id, status = %view.status, "Waiting for build");
        tokio::time::sleep(WAIT_INTERVAL).await;
    }
}

pub async fn list(client: &ApiClient, app: Option<String>, limit: u32) -> Result<()> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(app) = app {
        query.push(("app_id", app));
    }
    let builds: Vec<BuildView> = client.get_json("api/v1/builds", &query).await?;

    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }
    println!("{:<38} {:<10} {:<10} CREATED", "ID", "VERSION", "STATUS");
    for build in builds {
        println!(
            "{:<38} {:<10} {:<10} {}",
            build.id, build.version, build.status, build.created_at
        );
    }
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    let build: BuildView = client.get_json(&format!("api/v1/builds/{id}"), &[]).await?;

    println!("Build:   {}", build.id);
    println!("App:     {}", build.app_id);
    println!("Commit:  {}", build.commit_id);
    if let Some(message) = &build.message {
        println!("Message: {}", message);
    }
    println!("Version: {}", build.version);
    println!("Status:  {}", build.status);
    for image in &build.images {
        println!("Image:   {}", image);
    }
    println!();
    for step in &build.steps {
        println!("  [{:<9}] {:<22} {}", step.status, step.name, step.message);
    }
    Ok(())
}

pub async fn status(client: &ApiClient, id: &str) -> Result<()> {
    let view: StatusView = client
        .get_json(&format!("api/v1/builds/{id}/status"), &[])
        .await?;
    println!("{}", view.status);
    Ok(())
}

pub async fn logs(client: &ApiClient, id: &str) -> Result<()> {
    let steps: Vec<Step> = client
        .get_json(&format!("api/v1/builds/{id}/logs"), &[])
        .await?;

    for step in steps {
        println!("== {} ({}) ==", step.name, step.status);
        for line in step.logs {
            println!(
                "{} {:<7} {}",
                line.created_at.format("%H:%M:%S"),
                line.level,
                line.message
            );
        }
    }
    Ok(())
}

pub async fn download(client: &ApiClient, id: &str, output: Option<String>) -> Result<()> {
    let output = output.unwrap_or_else(|| format!("{id}.zip"));
    let response = client
        .get_raw(&format!("api/v1/builds/{id}/download"))
        .await?;

    let mut file = tokio::fs::File::create(&output)
        .await
        .with_context(|| format!("failed to create {output}"))?;
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("download interrupted")?;
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;

    println!("Wrote {} bytes to {}", written, output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_view_parses_api_response() {
        let view: BuildView = serde_json::from_value(json!({
            "id": "0190c6d2-0000-7000-8000-000000000001",
            "app_id": "0190c6d2-0000-7000-8000-000000000002",
            "commit_id": "0123456789abcdef",
            "message": null,
            "version": "89abcdef",
            "status": "running",
            "images": [],
            "created_at": "2026-01-01T00:00:00Z",
            "steps": [
                {
                    "id": "0190c6d2-0000-7000-8000-000000000003",
                    "name": "BUILD_DOCKER_IMAGE",
                    "message": "Building container image",
                    "status": "running",
                    "created_at": "2026-01-01T00:00:01Z",
                    "completed_at": null
                }
            ]
        }))
        .unwrap();

        assert_eq!(view.status, BuildStatus::Running);
        assert_eq!(view.steps[0].name, StepName::BuildImage);
        assert!(!is_finished(view.status));
    }

    #[test]
    fn test_finished_statuses() {
        assert!(is_finished(BuildStatus::Completed));
        assert!(is_finished(BuildStatus::Failed));
        assert!(!is_finished(BuildStatus::Invalid));
    }
}
