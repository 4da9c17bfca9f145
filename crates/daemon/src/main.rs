use anyhow::{Context, Result};
use clap::Parser;
use gcq_daemon::{Daemon, DaemonOptions, DaemonPaths, GcqConfig};
use std::path::PathBuf;

/// Per-project semantic code index daemon.
#[derive(Parser, Debug)]
#[command(name = "gcqd", version, about, long_about = None)]
struct Args {
    /// Project root (defaults to the current directory)
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Configuration file (defaults to <project>/.gcq/config.yaml, optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project = match args.project {
        Some(project) => project,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let project = project
        .canonicalize()
        .with_context(|| format!("project root {} not found", project.display()))?;
    let paths = DaemonPaths::for_project(project);

    let config = match &args.config {
        Some(path) => GcqConfig::load(path, true)?,
        None => GcqConfig::load(&paths.config_file(), false)?,
    };

    let default_filter = if args.verbose || config.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .filter_module("ort", log::LevelFilter::Off)
        .init();

    let daemon = Daemon::start(DaemonOptions {
        paths,
        config,
        providers: None,
    })
    .await?;

    let shutdown = daemon.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        log::info!("Signal received");
        shutdown.cancel();
    });

    daemon.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            log::warn!("Cannot install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
