//! In-memory artifact store.

use appforge_core::artifact::{ArtifactStore, ByteStream};
use appforge_core::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Artifact store backed by a shared map. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes of an object.
    pub fn get_bytes(&self, path: &str) -> Result<Bytes> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {path}")))
    }

    /// Paths of all stored objects, sorted.
    pub fn paths(&self) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        let mut paths: Vec<String> = objects.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        objects.insert(path.to_string(), data);
        Ok(())
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        let data = self.get_bytes(path)?;
        Ok(Box::pin(stream::once(async move { Ok(data) })))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Internal("lock poisoned".into()))?;
        Ok(objects.contains_key(path))
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
    async fn test_put_and_stream() {
        let store = MemoryArtifactStore::new();
        store
            .put("builds/a.zip", Bytes::from_static(b"zip bytes"))
            .await
            .unwrap();

        let chunks: Vec<Bytes> = store
            .get_stream("builds/a.zip")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"zip bytes");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryArtifactStore::new();
        assert!(!store.exists("builds/missing.zip").await.unwrap());
        assert!(matches!(
            store.get_stream("builds/missing.zip").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_url_not_supported() {
        let store = MemoryArtifactStore::new();
        assert!(matches!(
            store.url("builds/a.tar.gz").await,
            Err(Error::UrlNotSupported(_))
        ));
    }
}
