use crate::config::{GcqConfig, CONFIG_FILE_NAME};
use gcq_indexer::RECORDS_FILE_NAME;
use gcq_protocol::Endpoint;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DAEMON_DIR_NAME: &str = ".gcq";
pub const PID_FILE_NAME: &str = "daemon.pid";
pub const STATUS_FILE_NAME: &str = "status";
pub const SNAPSHOT_FILE_NAME: &str = "index.idx";
pub const SOCKET_FILE_NAME: &str = "daemon.sock";

/// On-disk layout of one project's daemon state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub project_root: PathBuf,
    pub dir: PathBuf,
}

impl DaemonPaths {
    /// `GCQ_DAEMON_DIR` if set, else `<project>/.gcq`.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let dir = std::env::var_os("GCQ_DAEMON_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::with_dir(project_root, dir)
    }

    pub fn with_dir(project_root: impl Into<PathBuf>, dir: Option<PathBuf>) -> Self {
        let project_root = project_root.into();
        let dir = dir.unwrap_or_else(|| project_root.join(DAEMON_DIR_NAME));
        Self { project_root, dir }
    }

    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.dir.join(PID_FILE_NAME)
    }

    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.dir.join(STATUS_FILE_NAME)
    }

    #[must_use]
    pub fn snapshot(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    #[must_use]
    pub fn records(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE_NAME)
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    /// Configured socket path, else `<dir>/daemon.sock`.
    #[must_use]
    pub fn socket(&self, config: &GcqConfig) -> PathBuf {
        config
            .socket_path
            .clone()
            .unwrap_or_else(|| self.dir.join(SOCKET_FILE_NAME))
    }

    /// Unix socket where available, loopback TCP otherwise.
    #[must_use]
    pub fn endpoint(&self, config: &GcqConfig) -> Endpoint {
        if cfg!(unix) {
            Endpoint::Unix(self.socket(config))
        } else {
            Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, config.tcp_port)))
        }
    }

    /// Whether `path` lies inside the daemon directory.
    #[must_use]
    pub fn is_state_path(&self, path: &Path) -> bool {
        path.starts_with(&self.dir)
    }
}
