//! Injected configuration (spec §9's redesign note: no global/env-read
//! state). Mirrors the shape of the original's `AppConfig`/`PGSQLConfig`
//! structs in `internal/shared/config/config.go`, minus any direct
//! environment reads — the caller assembles one of these and hands it to
//! `ingest`, keeping the crate itself free of process-wide mutable state.

use std::time::Duration;

/// How the Source Resolver reaches schema files for one ingest call.
#[derive(Debug, Clone)]
pub enum ResolverConfig {
    /// Walk a local directory tree once, eagerly.
    Local { root: std::path::PathBuf },
    /// Stream through a `BlobRegistry`, with an on-disk cache directory.
    Blob { cache_dir: std::path::PathBuf },
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub resolver: ResolverConfig,
    /// Upper bound on concurrently-compiling packages.
    pub max_concurrent_compiles: usize,
    /// Wall-clock budget for one `ingest` call, from the first resolve to
    /// the last compile. Exceeding it cancels in-flight work.
    pub deadline: Duration,
}

impl IngestConfig {
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            resolver: ResolverConfig::Local { root: root.into() },
            max_concurrent_compiles: DEFAULT_MAX_CONCURRENT_COMPILES,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
        }
    }

    pub fn blob(cache_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            resolver: ResolverConfig::Blob { cache_dir: cache_dir.into() },
            max_concurrent_compiles: DEFAULT_MAX_CONCURRENT_COMPILES,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
        }
    }

    pub fn with_max_concurrent_compiles(mut self, n: usize) -> Self {
        self.max_concurrent_compiles = n;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

pub const DEFAULT_MAX_CONCURRENT_COMPILES: usize = 8;
pub const DEFAULT_DEADLINE_SECS: u64 = 30;
