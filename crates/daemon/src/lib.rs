//! # gcq daemon
//!
//! One daemon per project. It owns the vector index, keeps it fresh from
//! `notify` hints and answers queries over a local socket.
//!
//! ```text
//! <project>/.gcq/
//!   daemon.pid   flock-held for the daemon's lifetime
//!   daemon.sock  newline-delimited JSON, mode 0600
//!   status       DaemonStatus (pretty JSON)
//!   index.idx    vector snapshot
//!   records.json per-file content hashes and chunk ids
//!   config.yaml  optional
//! ```
//!
//! ```no_run
//! use gcq_daemon::{Daemon, DaemonOptions, DaemonPaths, GcqConfig};
//!
//! # async fn run() -> gcq_daemon::Result<()> {
//! let paths = DaemonPaths::for_project("/path/to/project");
//! let config = GcqConfig::load(&paths.config_file(), false)?;
//! let daemon = Daemon::start(DaemonOptions { paths, config, providers: None }).await?;
//! daemon.run().await
//! # }
//! ```

pub mod config;
mod error;
pub mod paths;
pub mod pidfile;
pub mod server;
pub mod status;
mod supervisor;

pub use config::{FileConfig, GcqConfig, ProviderSection};
pub use error::{DaemonError, Result};
pub use paths::DaemonPaths;
pub use pidfile::PidLock;
pub use supervisor::{Daemon, DaemonOptions, Providers};
