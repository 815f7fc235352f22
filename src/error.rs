//! Closed error taxonomy for the ingest pipeline (spec §7). Each layer has
//! its own enum; they all funnel into [`IngestError`] via `#[from]`, mirroring
//! how the teacher's `DownloadError`/`CacheError` both convert into
//! `PackageManagerError`.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::BadVersionSuffix;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported dialect in {file}: expected proto3, found {found}")]
    UnsupportedDialect { file: String, found: String },

    #[error("syntax error in {file}: {message}")]
    Syntax { file: String, message: String },

    #[error("import '{import}' in {file} could not be resolved")]
    UnresolvedImport { file: String, import: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("package '{name}' declared twice with differing contents")]
    DuplicatePackage { name: String },

    #[error("cyclic imports detected: {}", .0.join(" -> "))]
    CyclicImports(Vec<String>),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    BadVersionSuffix(#[from] BadVersionSuffix),

    #[error("field '{field}' in message '{message}' references unknown {kind} '{reference}'")]
    UnresolvedReference {
        message: String,
        field: String,
        kind: &'static str,
        reference: String,
    },
}

/// The top-level error every `ingest` call resolves to.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unauthorized: caller role does not meet the minimum required role")]
    Unauthorized,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("executor failed: {0}")]
    Executor(String),

    #[error("{} package(s) failed to compile", .0.len())]
    Batch(BTreeMap<String, IngestError>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn is_fatal_for_batch(&self) -> bool {
        !matches!(self, IngestError::Source(SourceError::NotFound(_)))
    }
}
