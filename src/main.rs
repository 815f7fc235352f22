use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use protograph::auth::{CallerIdentity, Role};
use protograph::config::IngestConfig;
use protograph::ingest::SchemaRoot;
use protograph::resolver::LocalResolver;
use protograph::{ingest, IngestContext};

/// Compiles a proto3 schema tree into a Cypher mutation batch.
#[derive(Parser, Debug)]
#[command(name = "protograph", version)]
struct Cli {
    /// Root directory containing the .proto files to ingest.
    root: PathBuf,

    /// Entry .proto file paths, relative to `root`. Defaults to every
    /// `.proto` file found directly under `root`.
    #[arg(long = "entry", value_name = "PATH")]
    entries: Vec<String>,

    /// Caller id recorded on the ingest span; does not affect authorization.
    #[arg(long, default_value = "cli")]
    caller_id: String,

    /// Suppress printing the assembled Cypher batch to stdout. This CLI
    /// never wires a `GraphExecutor` (that's an embedding concern), so
    /// ingestion is always a dry run in the sense that nothing but stdout
    /// observes the result.
    #[arg(long)]
    quiet: bool,

    /// Maximum packages compiled concurrently.
    #[arg(long, default_value_t = protograph::config::DEFAULT_MAX_CONCURRENT_COMPILES)]
    max_concurrent: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let resolver = Arc::new(LocalResolver::new(&cli.root)?);
    let entries = if cli.entries.is_empty() {
        discover_entry_points(&cli.root)?
    } else {
        cli.entries.clone()
    };

    let config = IngestConfig::local(cli.root.clone()).with_max_concurrent_compiles(cli.max_concurrent);
    let caller = CallerIdentity::new(cli.caller_id.clone(), Role::Account);
    let ctx = IngestContext::new(resolver, caller, config);

    match ingest(&ctx, vec![SchemaRoot::new(entries)]).await {
        Ok(cyphers) => {
            if !cli.quiet {
                for statement in &cyphers {
                    println!("{statement}");
                }
            }
            println!("compiled {} package(s)", cyphers.len());
        }
        Err(protograph::IngestError::Batch(errors)) => {
            eprintln!("{} package(s) failed to compile:", errors.len());
            for (package, error) in &errors {
                eprintln!("  {package}: {error}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("ingest failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn discover_entry_points(root: &std::path::Path) -> std::io::Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("proto") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                entries.push(name.to_string());
            }
        }
    }
    entries.sort();
    Ok(entries)
}
