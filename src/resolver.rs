//! Source Resolver (spec §4.1): given an import path, return raw schema
//! bytes. Pure read, no mutation; the same path must return identical bytes
//! across repeated calls within one ingest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::blob::BlobRegistry;
use crate::cache::HybridCache;
use crate::error::SourceError;

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Vec<u8>, SourceError>;
}

/// Walks a root directory once at construction; lookups are constant-time
/// thereafter.
pub struct LocalResolver {
    files: HashMap<String, Vec<u8>>,
}

impl LocalResolver {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref();
        let mut files = HashMap::new();
        collect_proto_files(root, root, &mut files)?;
        Ok(Self { files })
    }
}

fn collect_proto_files(
    root: &Path,
    dir: &Path,
    out: &mut HashMap<String, Vec<u8>>,
) -> Result<(), SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| SourceError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_proto_files(root, &path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("proto") {
            continue;
        }
        let bytes = std::fs::read(&path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        out.insert(rel, bytes);
    }
    Ok(())
}

#[async_trait]
impl SourceResolver for LocalResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        match self.files.get(path) {
            Some(bytes) => {
                debug!(path, bytes = bytes.len(), "resolved local source");
                Ok(bytes.clone())
            }
            None => {
                warn!(path, "local source not found");
                Err(SourceError::NotFound(path.to_string()))
            }
        }
    }
}

const BLOB_CACHE_TTL_SECS: u64 = 3600;
const BLOB_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Streams objects out of a [`BlobRegistry`], caching fetched bytes so that
/// repeated resolves of the same path within one ingest do not re-download.
pub struct BlobResolver {
    registry: Arc<dyn BlobRegistry>,
    cache: HybridCache,
}

impl BlobResolver {
    pub fn new(registry: Arc<dyn BlobRegistry>, cache_dir: PathBuf) -> Self {
        Self {
            registry,
            cache: HybridCache::new(
                cache_dir,
                Duration::from_secs(BLOB_CACHE_TTL_SECS),
                BLOB_CACHE_MAX_ENTRIES,
            ),
        }
    }
}

#[async_trait]
impl SourceResolver for BlobResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        if let Some(cached) = self
            .cache
            .get(path)
            .await
            .map_err(|e| SourceError::Io {
                path: path.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?
        {
            debug!(path, "resolved blob source from cache");
            return Ok(cached.into_bytes());
        }

        let bytes = self.registry.download(path).await.map_err(|e| match e {
            crate::error::BlobError::NotFound(p) => {
                warn!(path = %p, "blob source not found");
                SourceError::NotFound(p)
            }
            other => SourceError::Io {
                path: path.to_string(),
                source: std::io::Error::other(other.to_string()),
            },
        })?;
        debug!(path, bytes = bytes.len(), "resolved blob source from registry");

        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.cache
            .set(path, &text)
            .await
            .map_err(|e| SourceError::Io {
                path: path.to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_resolver_reads_flat_and_nested_proto_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.proto"), b"package a.v1;").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.proto"), b"package b.v1;").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"ignored").unwrap();

        let resolver = LocalResolver::new(dir.path()).unwrap();
        assert_eq!(resolver.resolve("a.proto").await.unwrap(), b"package a.v1;");
        assert_eq!(
            resolver.resolve("sub/b.proto").await.unwrap(),
            b"package b.v1;"
        );
        assert!(resolver.resolve("readme.md").await.is_err());
    }

    #[tokio::test]
    async fn local_resolver_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = LocalResolver::new(dir.path()).unwrap();
        let err = resolver.resolve("missing.proto").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
