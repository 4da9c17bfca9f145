//! `gcq`: command-line client for the per-project gcq daemon.
//!
//! Every command prints the daemon's JSON result to stdout. Exit codes:
//! 0 success, 2 misuse, 3 daemon not reachable, 4 index not ready,
//! 5 anything else.

mod error;
mod launcher;

use clap::{Parser, Subcommand};
use error::{exit, CliError, Result};
use gcq_daemon::{DaemonPaths, GcqConfig};
use gcq_protocol::{Command, DaemonClient, Endpoint};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gcq", version, about, long_about = None)]
struct Args {
    /// Project root (defaults to the current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start the daemon for this project
    Start {
        /// Run in this terminal instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Wait until the initial index pass has completed
        #[arg(long)]
        wait: bool,
    },
    /// Stop the daemon, escalating to SIGTERM if it lingers
    Stop,
    /// Daemon, index and provider status
    Status,
    /// Mark files as changed (paths relative to the current directory)
    Notify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Semantic search over the project
    Semantic {
        query: String,

        /// Maximum number of results
        #[arg(short)]
        k: Option<usize>,
    },
    /// Force a full reindex round
    Reindex {
        /// Return as soon as the round is queued
        #[arg(long = "async")]
        run_async: bool,
    },
    /// Ask the daemon to exit
    Shutdown,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .filter_module("ort", log::LevelFilter::Off)
        .init();

    let code = match run(args).await {
        Ok(Some(output)) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                exit::SUCCESS
            }
            Err(err) => {
                eprintln!("gcq: {err}");
                exit::FAILURE
            }
        },
        Ok(None) => exit::SUCCESS,
        Err(err) => {
            eprintln!("gcq: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<Option<Value>> {
    let cwd = std::env::current_dir().map_err(anyhow::Error::from)?;
    let project = args.project.unwrap_or_else(|| cwd.clone());
    let project = project
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("project root {}: {e}", project.display()))?;
    let paths = DaemonPaths::for_project(project);
    let config = GcqConfig::load(&paths.config_file(), false)?;
    let endpoint = paths.endpoint(&config);

    let (command, params) = match args.command {
        Cmd::Start { foreground, wait } => {
            let report = launcher::start(&paths, &endpoint, foreground, wait).await?;
            return report
                .map(|r| serde_json::to_value(r).map_err(|e| CliError::Other(e.into())))
                .transpose();
        }
        Cmd::Stop => return launcher::stop(&paths, &endpoint).await.map(Some),
        Cmd::Status => (Command::Status, json!({})),
        Cmd::Notify { paths } => {
            let paths: Vec<String> = paths
                .iter()
                .map(|p| cwd.join(p).display().to_string())
                .collect();
            (Command::Notify, json!({ "paths": paths }))
        }
        Cmd::Semantic { query, k } => (Command::Semantic, json!({ "query": query, "k": k })),
        Cmd::Reindex { run_async } => (Command::Reindex, json!({ "async": run_async })),
        Cmd::Shutdown => (Command::Shutdown, json!({})),
    };

    call(&endpoint, command, params).await.map(Some)
}

async fn call(endpoint: &Endpoint, command: Command, params: Value) -> Result<Value> {
    let mut client = DaemonClient::connect(endpoint).await?;
    if command != Command::Reindex {
        client = client.with_timeout(Duration::from_secs(30));
    }
    Ok(client.call(command, params).await?)
}
