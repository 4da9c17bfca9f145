use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle record persisted to `<daemon_dir>/status` after each transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub ready: bool,
    pub started_at_epoch: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Ready,
    Downloading,
    Missing,
    Unreachable,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderHealth {
    pub const fn ready() -> Self {
        Self {
            status: ProviderStatus::Ready,
            detail: None,
        }
    }

    pub fn with_detail(status: ProviderStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub dimension: usize,
    pub health: ProviderHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Draining,
    Indexing,
    Persisting,
}

/// Outcome of one scheduler round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub reason: String,
    pub full_scan: bool,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub files_deferred: usize,
    pub chunks_embedded: usize,
    pub persisted: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerReport {
    pub state: SchedulerState,
    pub rounds_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_round: Option<RoundSummary>,
}

/// Payload of the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub daemon: DaemonStatus,
    pub project_root: String,
    pub index_size: usize,
    pub dirty_count: usize,
    pub warm_provider: ProviderInfo,
    pub search_provider: ProviderInfo,
    pub scheduler: SchedulerReport,
    #[serde(default)]
    pub file_errors: BTreeMap<String, String>,
}
