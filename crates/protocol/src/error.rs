use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classification carried in `error.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigError,
    ProviderTransient,
    ProviderBadRequest,
    ProviderUnavailable,
    ProviderMismatch,
    IncompatibleSnapshot,
    #[serde(rename = "IOError")]
    IoError,
    NotReady,
    Cancelled,
    UnknownCommand,
    BadRequest,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigError => "ConfigError",
            Self::ProviderTransient => "ProviderTransient",
            Self::ProviderBadRequest => "ProviderBadRequest",
            Self::ProviderUnavailable => "ProviderUnavailable",
            Self::ProviderMismatch => "ProviderMismatch",
            Self::IncompatibleSnapshot => "IncompatibleSnapshot",
            Self::IoError => "IOError",
            Self::NotReady => "NotReady",
            Self::Cancelled => "Cancelled",
            Self::UnknownCommand => "UnknownCommand",
            Self::BadRequest => "BadRequest",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WireError {}
