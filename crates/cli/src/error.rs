use gcq_protocol::{ClientError, ErrorKind};
use thiserror::Error;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const UNREACHABLE: i32 = 3;
    pub const NOT_READY: i32 = 4;
    pub const FAILURE: i32 = 5;
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("daemon is not running: {0}")]
    Unreachable(String),

    #[error("{0}")]
    NotReady(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable(_) => exit::UNREACHABLE,
            Self::NotReady(_) => exit::NOT_READY,
            Self::Other(_) => exit::FAILURE,
        }
    }
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connect { .. } => Self::Unreachable(err.to_string()),
            ClientError::Remote(remote) if remote.kind == ErrorKind::NotReady => {
                Self::NotReady(remote.message)
            }
            other => Self::Other(other.into()),
        }
    }
}

impl From<gcq_daemon::DaemonError> for CliError {
    fn from(err: gcq_daemon::DaemonError) -> Self {
        Self::Other(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
