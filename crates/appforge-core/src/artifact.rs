//! Artifact storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::id::BuildId;
use crate::Result;

/// Stream of artifact bytes.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, std::io::Error>>;

/// Store path of a build's zip artifact.
pub fn zip_path(build_id: &BuildId) -> String {
    format!("builds/{build_id}.zip")
}

/// Store path of a build's tar.gz artifact.
pub fn tar_gz_path(build_id: &BuildId) -> String {
    format!("builds/{build_id}.tar.gz")
}

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an object, replacing any previous content.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Stream an object. Fails with `NotFound` when absent.
    async fn get_stream(&self, path: &str) -> Result<ByteStream>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Externally reachable URL for an object.
    ///
    /// Backends without URL support return `Error::UrlNotSupported`.
    async fn url(&self, path: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_are_keyed_by_build() {
        let id = BuildId::new();
        assert_eq!(zip_path(&id), format!("builds/{id}.zip"));
        assert_eq!(tar_gz_path(&id), format!("builds/{id}.tar.gz"));
    }
}
