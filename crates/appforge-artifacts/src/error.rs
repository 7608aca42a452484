//! Archive error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ArchiveError> for appforge_core::Error {
    fn from(err: ArchiveError) -> Self {
        appforge_core::Error::StageFailed(format!("packaging failed: {err}"))
    }
}
