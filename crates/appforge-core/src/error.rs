//! Error types for AppForge.

use thiserror::Error;

use crate::action::StepStatus;
use crate::id::{ActionId, BuildId, StepId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("action {0} not found")]
    ActionNotFound(ActionId),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("step not complete: {0}")]
    StepNotComplete(String),

    #[error("build artifact not found for build {0}")]
    BuildArtifactNotFound(BuildId),

    #[error("invalid transition for step {step}: {from} -> {to}")]
    InvalidStepTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stage failed: {0}")]
    StageFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("url not supported for {0}")]
    UrlNotSupported(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
