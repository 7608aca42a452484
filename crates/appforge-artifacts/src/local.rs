//! Local filesystem artifact store.

use appforge_core::artifact::{ArtifactStore, ByteStream};
use appforge_core::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Stores artifacts as files below a root directory.
///
/// Writes go to a temporary sibling file first and are renamed into place,
/// so readers never observe a partially written archive.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a store path. Rejects absolute paths and `..`.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let valid = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !valid {
            return Err(Error::InvalidInput(format!("invalid artifact path: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{action} {}: {err}", path.display()))
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create", parent, e))?;
        }

        let mut temp_name = target.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp = PathBuf::from(temp_name);

        tokio::fs::write(&temp, &data)
            .await
            .map_err(|e| storage_error("write", &temp, e))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| storage_error("rename", &target, e))?;

        debug!(path = %target.display(), size = data.len(), "Stored artifact");
        Ok(())
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        let target = self.resolve(path)?;
        let file = tokio::fs::File::open(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("artifact {path}"))
            } else {
                storage_error("open", &target, e)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| storage_error("stat", &target, e))
    }

    async fn url(&self, path: &str) -> Result<String> {
        Err(Error::UrlNotSupported(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_creates_directories_and_streams_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        store
            .put("builds/b1.tar.gz", Bytes::from_static(b"context"))
            .await
            .unwrap();

        assert!(dir.path().join("builds/b1.tar.gz").exists());
        assert!(!dir.path().join("builds/b1.tar.gz.tmp").exists());
        assert!(store.exists("builds/b1.tar.gz").await.unwrap());

        let chunks: Vec<Bytes> = store
            .get_stream("builds/b1.tar.gz")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"context");
    }

    #[tokio::test]
    async fn test_put_replaces_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        store.put("a.zip", Bytes::from_static(b"one")).await.unwrap();
        store.put("a.zip", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.zip")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        assert!(!store.exists("builds/none.zip").await.unwrap());
        assert!(matches!(
            store.get_stream("builds/none.zip").await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let store = LocalArtifactStore::new("/var/lib/appforge");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert_eq!(
            store.resolve("builds/x.zip").unwrap(),
            PathBuf::from("/var/lib/appforge/builds/x.zip")
        );
    }
}
