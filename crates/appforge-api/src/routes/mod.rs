//! API routes.

pub mod builds;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", builds::router())
        .merge(health::router())
        .with_state(state)
}
