//! Build endpoints.

use appforge_core::{
    AppId, Build, BuildFilter, BuildId, BuildRequest, BuildStatus, Step, StepName, StepStatus,
};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apps/{app_id}/builds", post(create_build))
        .route("/builds", get(list_builds))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/status", get(get_build_status))
        .route("/builds/{id}/logs", get(get_build_logs))
        .route("/builds/{id}/download", get(download_build))
}

#[derive(Debug, Deserialize)]
struct CreateBuildRequest {
    commit_id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    skip_publish: bool,
}

#[derive(Debug, Serialize)]
struct StepResponse {
    id: String,
    name: StepName,
    message: String,
    status: StepStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<&Step> for StepResponse {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.to_string(),
            name: step.name,
            message: step.message.clone(),
            status: step.status,
            created_at: step.created_at,
            completed_at: step.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct BuildResponse {
    id: String,
    app_id: String,
    commit_id: String,
    message: Option<String>,
    version: String,
    status: BuildStatus,
    images: Vec<String>,
    created_at: DateTime<Utc>,
    steps: Vec<StepResponse>,
}

impl From<Build> for BuildResponse {
    fn from(build: Build) -> Self {
        let status = build.status();
        Self {
            id: build.id.to_string(),
            app_id: build.app_id.to_string(),
            steps: build.action.steps.iter().map(StepResponse::from).collect(),
            commit_id: build.commit_id,
            message: build.message,
            version: build.version,
            status,
            images: build.images,
            created_at: build.created_at,
        }
    }
}

async fn create_build(
    State(state): State<AppState>,
    Path(app_id): Path<AppId>,
    Json(req): Json<CreateBuildRequest>,
) -> Result<(StatusCode, Json<BuildResponse>), ApiError> {
    let submitted = state
        .orchestrator
        .create(
            BuildRequest {
                app_id,
                commit_id: req.commit_id,
                message: req.message,
            },
            req.skip_publish,
        )
        .await?;

    info!(build_id = %submitted.build.id, app_id = %app_id, "Build accepted");

    // The pipeline keeps running after the handle is dropped.
    Ok((StatusCode::ACCEPTED, Json(submitted.build.into())))
}

#[derive(Debug, Deserialize)]
struct ListBuildsQuery {
    app_id: Option<AppId>,
    commit_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<BuildResponse>>, ApiError> {
    let filter = BuildFilter {
        app_id: query.app_id,
        commit_id: query.commit_id,
        limit: Some(
            query
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        ),
        offset: Some(query.offset.unwrap_or(0).max(0)),
    };
    let builds = state.orchestrator.find_many(&filter).await?;
    Ok(Json(builds.into_iter().map(BuildResponse::from).collect()))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildResponse>, ApiError> {
    let build = state.orchestrator.find_one(id).await?;
    Ok(Json(build.into()))
}

#[derive(Debug, Serialize)]
struct BuildStatusResponse {
    id: String,
    status: BuildStatus,
}

async fn get_build_status(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildStatusResponse>, ApiError> {
    let status = state.orchestrator.calc_build_status(id).await?;
    Ok(Json(BuildStatusResponse {
        id: id.to_string(),
        status,
    }))
}

/// Steps with their log lines, in creation order.
async fn get_build_logs(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<Vec<Step>>, ApiError> {
    let build = state.orchestrator.find_one(id).await?;
    Ok(Json(build.action.steps))
}

async fn download_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Response, ApiError> {
    let stream = state.orchestrator.download(id).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", id),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}
