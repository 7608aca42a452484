//! Database error types.

use appforge_core::{StepId, StepStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition for step {step}: {from} -> {to}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("lock poisoned")]
    Poisoned,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for appforge_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => appforge_core::Error::NotFound(what),
            DbError::InvalidTransition { step, from, to } => {
                appforge_core::Error::InvalidStepTransition { step, from, to }
            }
            other => appforge_core::Error::Storage(other.to_string()),
        }
    }
}
