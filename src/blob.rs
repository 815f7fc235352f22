//! Blob registry: narrow external interface for whatever object store backs
//! uploaded schema packages. Mirrors the original `SchemaBlobRepository`
//! (upload/download/delete/list/presigned URL) one-for-one, minus the
//! lifecycle `Shutdown` hook, which has no place in a pipeline that borrows
//! the registry rather than owning its connection.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::BlobError;

#[async_trait]
pub trait BlobRegistry: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError>;
    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError>;
    async fn delete(&self, path: &str) -> Result<(), BlobError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError>;
}

/// In-process registry backing tests and local dry runs; a `RwLock<HashMap>`
/// stands in for the bucket.
#[derive(Default)]
pub struct InMemoryBlobRegistry {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobRegistry for InMemoryBlobRegistry {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.objects.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        if !self.objects.read().await.contains_key(path) {
            return Err(BlobError::NotFound(path.to_string()));
        }
        Ok(format!("memory://{}?ttl={}", path, ttl.as_secs()))
    }
}

/// Talks to a presign-capable HTTP object store (e.g. an S3-compatible
/// gateway) over `reqwest`, the same client the teacher uses for its RPC
/// calls.
pub struct HttpBlobRegistry {
    base_url: String,
    client: Client,
}

impl HttpBlobRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl BlobRegistry for HttpBlobRegistry {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let resp = self
            .client
            .put(self.object_url(path))
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BlobError::Transport(format!(
                "upload to {} returned {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        let resp = self
            .client
            .get(self.object_url(path))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(BlobError::Transport(format!(
                "download of {} returned {}",
                path,
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let resp = self
            .client
            .delete(self.object_url(path))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::Transport(format!(
                "delete of {} returned {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let resp = self
            .client
            .get(format!("{}?prefix={}", self.base_url, prefix))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, BlobError> {
        let resp = self
            .client
            .get(format!(
                "{}?presign=true&ttl={}",
                self.object_url(path),
                ttl.as_secs()
            ))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(path.to_string()));
        }
        resp.text().await.map_err(|e| BlobError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_registry_round_trips() {
        let registry = InMemoryBlobRegistry::new();
        registry.upload("a/b.proto", b"hello".to_vec()).await.unwrap();
        assert_eq!(registry.download("a/b.proto").await.unwrap(), b"hello");
        assert_eq!(registry.list("a/").await.unwrap(), vec!["a/b.proto".to_string()]);
        assert!(registry.presign("a/b.proto", Duration::from_secs(60)).await.is_ok());
        registry.delete("a/b.proto").await.unwrap();
        assert!(matches!(
            registry.download("a/b.proto").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_registry_reports_missing_objects() {
        let registry = InMemoryBlobRegistry::new();
        assert!(matches!(
            registry.download("missing").await,
            Err(BlobError::NotFound(_))
        ));
        assert!(matches!(
            registry.presign("missing", Duration::from_secs(60)).await,
            Err(BlobError::NotFound(_))
        ));
    }
}
