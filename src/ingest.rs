//! Orchestrates the six components into the single `ingest` entry point
//! (spec §6). Concurrency follows the teacher's `DownloadManager` shape in
//! `parallel.rs`: a bounded `tokio::sync::Semaphore` gates how many
//! packages compile at once, fanned out with `tokio::spawn` and joined at
//! a barrier before assembly. A `CancellationToken` carries the ingest-wide
//! deadline, generalizing past the teacher (which has no cancellation) to
//! satisfy spec §5's deadline-triggered cancellation requirement.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::auth::{CallerIdentity, GraphExecutor, MIN_INGEST_ROLE};
use crate::compiler::{self, CompileContext};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::graph::DependencyGraph;
use crate::model::{CompilationOutput, PackageDescriptor};
use crate::parser;
use crate::resolver::SourceResolver;
use crate::{assembler, config::ResolverConfig};

/// One uploaded schema package's entry files; every import they pull in is
/// resolved transitively by the parser.
#[derive(Debug, Clone, Default)]
pub struct SchemaRoot {
    pub entry_paths: Vec<String>,
}

impl SchemaRoot {
    pub fn new(entry_paths: Vec<String>) -> Self {
        Self { entry_paths }
    }
}

pub struct IngestContext {
    pub resolver: Arc<dyn SourceResolver>,
    pub executor: Option<Arc<dyn GraphExecutor>>,
    pub caller: CallerIdentity,
    pub config: IngestConfig,
}

impl IngestContext {
    pub fn new(resolver: Arc<dyn SourceResolver>, caller: CallerIdentity, config: IngestConfig) -> Self {
        Self {
            resolver,
            executor: None,
            caller,
            config,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn GraphExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

/// Runs the full pipeline: resolve, parse, graph, order, compile, assemble
/// — and, if an executor is configured, execute. Returns the assembled
/// Cypher batch, one wrapped statement per package in dependency order.
#[instrument(skip(ctx, roots), fields(packages = roots.len()))]
pub async fn ingest(
    ctx: &IngestContext,
    roots: Vec<SchemaRoot>,
) -> Result<Vec<String>, IngestError> {
    ctx.caller.authorize(MIN_INGEST_ROLE)?;

    let cancel = CancellationToken::new();
    let deadline_guard = cancel.clone();
    let deadline = ctx.config.deadline;
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        deadline_guard.cancel();
    });

    let entry_paths: Vec<String> = roots.into_iter().flat_map(|r| r.entry_paths).collect();

    let descriptors = tokio::select! {
        result = parser::parse_tree(ctx.resolver.as_ref(), &entry_paths) => result?,
        _ = cancel.cancelled() => return Err(IngestError::Internal("ingest deadline exceeded during resolve/parse".to_string())),
    };

    let graph = DependencyGraph::build(&descriptors)?;
    let ordered: Vec<&PackageDescriptor> = graph.topological_order()?;
    let compile_ctx = CompileContext::build(&descriptors);

    let outputs = compile_all(&ordered, &compile_ctx, ctx.config.max_concurrent_compiles, &cancel).await?;

    let cyphers = assembler::cyphers(&outputs);

    if let Some(executor) = &ctx.executor {
        for statement in &cyphers {
            executor.execute(statement).await?;
        }
    }

    Ok(cyphers)
}

async fn compile_all(
    ordered: &[&PackageDescriptor],
    ctx: &CompileContext,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Result<Vec<CompilationOutput>, IngestError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(ordered.len());

    for pkg in ordered {
        let pkg = (*pkg).clone();
        let permit_holder = semaphore.clone();
        let cancel = cancel.clone();
        // CompileContext borrows nothing long-lived that can't be rebuilt
        // cheaply per task; cloning its small HashMaps keeps each spawned
        // task fully owned, matching the teacher's `DownloadTask` shape.
        let ctx_owned = CompileContext { declared: ctx.declared.clone() };

        let handle = tokio::spawn(async move {
            let _permit = permit_holder.acquire_owned().await.expect("semaphore closed");
            let pkg_name = pkg.pkg_name.clone();
            tokio::select! {
                result = compiler::compile_package(&pkg, &ctx_owned) => (pkg_name, result),
                _ = cancel.cancelled() => (pkg_name, Err(crate::error::CompileError::UnresolvedReference {
                    message: String::new(),
                    field: String::new(),
                    kind: "deadline",
                    reference: "ingest deadline exceeded".to_string(),
                })),
            }
        });
        handles.push(handle);
    }

    let mut outputs = Vec::with_capacity(handles.len());
    let mut errors: BTreeMap<String, IngestError> = BTreeMap::new();

    for handle in handles {
        let (pkg_name, result) = handle.await.map_err(|e| IngestError::Internal(e.to_string()))?;
        match result {
            Ok(output) => outputs.push(output),
            Err(err) => {
                warn!(package = %pkg_name, error = %err, "package failed to compile");
                errors.insert(pkg_name, IngestError::Compile(err));
            }
        }
    }

    if !errors.is_empty() {
        return Err(IngestError::Batch(errors));
    }

    Ok(outputs)
}

/// Convenience constructor wiring a [`crate::resolver::LocalResolver`] or
/// [`crate::resolver::BlobResolver`] from config, matching how the teacher's
/// `PackageManager::new` picks its transport from its own constructor args.
pub fn resolver_from_config(
    config: &ResolverConfig,
    blob_registry: Option<Arc<dyn crate::blob::BlobRegistry>>,
) -> Result<Arc<dyn SourceResolver>, IngestError> {
    match config {
        ResolverConfig::Local { root } => {
            let resolver = crate::resolver::LocalResolver::new(root)?;
            Ok(Arc::new(resolver))
        }
        ResolverConfig::Blob { cache_dir } => {
            let registry = blob_registry
                .ok_or_else(|| IngestError::Internal("blob resolver requires a BlobRegistry".to_string()))?;
            Ok(Arc::new(crate::resolver::BlobResolver::new(registry, cache_dir.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::resolver::LocalResolver;
    use tempfile::TempDir;

    fn write_proto(dir: &TempDir, name: &str, contents: &str) {
        std::fs::write(dir.path().join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn ingest_compiles_trivial_package() {
        let dir = TempDir::new().unwrap();
        write_proto(
            &dir,
            "demo.proto",
            r#"
                syntax = "proto3";
                package demo.v1;

                message Ping {
                  string text = 1;
                }
            "#,
        );
        let resolver: Arc<dyn SourceResolver> = Arc::new(LocalResolver::new(dir.path()).unwrap());
        let caller = CallerIdentity::new("acct-1", Role::Account);
        let ctx = IngestContext::new(resolver, caller, IngestConfig::local(dir.path()));

        let result = ingest(&ctx, vec![SchemaRoot::new(vec!["demo.proto".to_string()])])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].contains("Ping"));
    }

    #[tokio::test]
    async fn ingest_rejects_unauthorized_caller() {
        let dir = TempDir::new().unwrap();
        write_proto(&dir, "demo.proto", "syntax = \"proto3\";\npackage demo.v1;\n");
        let resolver: Arc<dyn SourceResolver> = Arc::new(LocalResolver::new(dir.path()).unwrap());
        let caller = CallerIdentity::new("acct-1", Role::ReadOnly);
        let ctx = IngestContext::new(resolver, caller, IngestConfig::local(dir.path()));

        let err = ingest(&ctx, vec![SchemaRoot::new(vec!["demo.proto".to_string()])])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Unauthorized));
    }

    #[tokio::test]
    async fn ingest_resolves_cross_package_reference() {
        let dir = TempDir::new().unwrap();
        write_proto(
            &dir,
            "common.proto",
            r#"
                syntax = "proto3";
                package common.v1;

                message Id { string value = 1; }
            "#,
        );
        write_proto(
            &dir,
            "demo.proto",
            r#"
                syntax = "proto3";
                package demo.v1;
                import "common.proto";

                message Widget {
                  common.v1.Id id = 1;
                }
            "#,
        );
        let resolver: Arc<dyn SourceResolver> = Arc::new(LocalResolver::new(dir.path()).unwrap());
        let caller = CallerIdentity::new("acct-1", Role::Account);
        let ctx = IngestContext::new(resolver, caller, IngestConfig::local(dir.path()));

        let result = ingest(&ctx, vec![SchemaRoot::new(vec!["demo.proto".to_string()])])
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().any(|c| c.contains("common.v1")));
    }

    #[tokio::test]
    async fn ingest_reports_cyclic_imports() {
        let dir = TempDir::new().unwrap();
        write_proto(
            &dir,
            "a.proto",
            "syntax = \"proto3\";\npackage a.v1;\nimport \"b.proto\";\n",
        );
        write_proto(
            &dir,
            "b.proto",
            "syntax = \"proto3\";\npackage b.v1;\nimport \"a.proto\";\n",
        );
        let resolver: Arc<dyn SourceResolver> = Arc::new(LocalResolver::new(dir.path()).unwrap());
        let caller = CallerIdentity::new("acct-1", Role::Account);
        let ctx = IngestContext::new(resolver, caller, IngestConfig::local(dir.path()));

        let err = ingest(&ctx, vec![SchemaRoot::new(vec!["a.proto".to_string()])])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Graph(_)));
    }
}
