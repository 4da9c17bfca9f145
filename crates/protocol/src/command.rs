use crate::error::{ErrorKind, WireError};
use crate::status::RoundSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Request envelope: `{type, id, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(command: Command, id: impl Into<Value>, params: Value) -> Self {
        Self {
            kind: command.as_str().to_string(),
            id: id.into(),
            params,
        }
    }

    /// Decode `params` into a typed payload. Missing params decode as `{}`.
    pub fn params<T: serde::de::DeserializeOwned>(&self) -> Result<T, WireError> {
        let params = if self.params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.params.clone()
        };
        serde_json::from_value(params)
            .map_err(|e| WireError::new(ErrorKind::BadRequest, format!("invalid params: {e}")))
    }
}

/// Response envelope: `{id, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Semantic,
    Notify,
    Reindex,
    Shutdown,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Semantic => "semantic",
            Self::Notify => "notify",
            Self::Reindex => "reindex",
            Self::Shutdown => "shutdown",
        }
    }
}

impl FromStr for Command {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(Self::Status),
            "semantic" => Ok(Self::Semantic),
            "notify" => Ok(Self::Notify),
            "reindex" => Ok(Self::Reindex),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(WireError::new(
                ErrorKind::UnknownCommand,
                format!("unknown command: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyParams {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub accepted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexParams {
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexResult {
    /// False when the request returned before the round finished
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundSummary>,
}

/// Neighbouring chunk attached to a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub line_start: u32,
    pub line_end: u32,
    pub text: String,
}

/// One ranked result of a `semantic` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticHit {
    pub chunk_id: String,
    pub file_path: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub score: f32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextChunk>,
}
