//! Command-line interface
//!
//! Each command loads a file into an in-memory buffer set, runs the compiler
//! against it, and prints a JSON response carrying the result plus every
//! editor event the engine emitted along the way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::engine::{BufferSource, EditorSink, MemoryBuffers, RecordingSink, RequestOutcome};
use crate::error::IdeResult;
use crate::models::Span;
use crate::process::PolyProcess;

/// IDE protocol front-end for the Poly/ML compiler
#[derive(Parser, Debug)]
#[command(name = "polyide")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Per-request timeout in seconds, overriding the config
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a file and print its diagnostics
    Check {
        file: PathBuf,
    },

    /// Report the type of the value at a byte span
    TypeAt {
        file: PathBuf,
        start: u64,
        end: u64,
    },

    /// Locate the declaration of the name at a byte span
    DeclAt {
        file: PathBuf,
        start: u64,
        end: u64,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    let timeout = cli.timeout.map(Duration::from_secs);

    match cli.command {
        Commands::Check { file } => check(config, &file, timeout).await?,
        Commands::TypeAt { file, start, end } => {
            type_at(config, &file, Span::new(start, end), timeout).await?;
        }
        Commands::DeclAt { file, start, end } => {
            decl_at(config, &file, Span::new(start, end), timeout).await?;
        }
    }
    Ok(())
}

struct Session {
    process: Arc<PolyProcess>,
    sink: Arc<RecordingSink>,
    file: String,
    source: String,
}

impl Session {
    /// Load `path`, mark it active, and bring the compiler up.
    async fn open(config: EngineConfig, path: &Path) -> IdeResult<Self> {
        let source = tokio::fs::read_to_string(path).await?;
        let file = path.display().to_string();

        let buffers = Arc::new(
            MemoryBuffers::new()
                .with_file(&file, &source)
                .with_active(&file),
        );
        let sink = Arc::new(RecordingSink::new());
        let process = PolyProcess::new(
            config,
            buffers as Arc<dyn BufferSource>,
            Arc::clone(&sink) as Arc<dyn EditorSink>,
        );
        process.start().await?;

        Ok(Self {
            process,
            sink,
            file,
            source,
        })
    }

    fn print(&self, mut response: serde_json::Value) {
        if let Some(map) = response.as_object_mut() {
            map.insert("events".into(), serde_json::json!(self.sink.events()));
        }
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{}", json),
            Err(e) => println!(r#"{{"success":false,"error":"{}"}}"#, e),
        }
    }
}

async fn check(config: EngineConfig, path: &Path, timeout: Option<Duration>) -> IdeResult<()> {
    let session = Session::open(config, path).await?;
    let result = session
        .process
        .compile_and_wait(&session.file, &session.source, timeout)
        .await?;

    session.print(serde_json::json!({
        "success": true,
        "file": session.file,
        "is_failure": result.is_failure,
        "error_count": result.error_count(),
        "diagnostics": result.diagnostics,
    }));
    session.process.stop().await;
    Ok(())
}

async fn type_at(
    config: EngineConfig,
    path: &Path,
    span: Span,
    timeout: Option<Duration>,
) -> IdeResult<()> {
    let session = Session::open(config, path).await?;
    session
        .process
        .compile_and_wait(&session.file, &session.source, timeout)
        .await?;

    let id = session.process.type_at(&session.file, span).await?;
    let outcome = session.process.wait(id, timeout).await?;

    let type_desc = match &*outcome {
        RequestOutcome::TypeInfo { type_desc, .. } => type_desc.clone(),
        _ => None,
    };
    session.print(serde_json::json!({
        "success": true,
        "file": session.file,
        "span": span,
        "type": type_desc,
    }));
    session.process.stop().await;
    Ok(())
}

async fn decl_at(
    config: EngineConfig,
    path: &Path,
    span: Span,
    timeout: Option<Duration>,
) -> IdeResult<()> {
    let session = Session::open(config, path).await?;
    session
        .process
        .compile_and_wait(&session.file, &session.source, timeout)
        .await?;

    let id = session.process.declaration_at(&session.file, span).await?;
    let outcome = session.process.wait(id, timeout).await?;

    let declaration = match &*outcome {
        RequestOutcome::Location { remote, .. } => remote.clone(),
        _ => None,
    };
    session.print(serde_json::json!({
        "success": true,
        "file": session.file,
        "span": span,
        "declaration": declaration,
    }));
    session.process.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_command() {
        let cli = Cli::parse_from(["polyide", "check", "a.ml"]);
        assert!(matches!(cli.command, Commands::Check { .. }));
        assert!(cli.timeout.is_none());
    }

    #[test]
    fn test_parse_type_at_with_timeout() {
        let cli = Cli::parse_from(["polyide", "--timeout", "5", "type-at", "a.ml", "4", "5"]);
        assert_eq!(cli.timeout, Some(5));
        let Commands::TypeAt { start, end, .. } = cli.command else {
            panic!("expected type-at");
        };
        assert_eq!((start, end), (4, 5));
    }
}
