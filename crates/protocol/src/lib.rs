//! Wire types shared by the `gcqd` daemon and its clients.
//!
//! Framing is newline-delimited JSON: one [`Request`] line in, one
//! [`Response`] line out. Connections may carry several exchanges.

mod client;
mod command;
mod error;
mod status;

pub use client::{ClientError, DaemonClient, Endpoint};
pub use command::{
    Command, ContextChunk, NotifyParams, NotifyResult, ReindexParams, ReindexResult, Request,
    Response, SemanticHit, SemanticParams,
};
pub use error::{ErrorKind, WireError};
pub use status::{
    DaemonStatus, ProviderHealth, ProviderInfo, ProviderStatus, RoundSummary, SchedulerReport,
    SchedulerState, StatusReport,
};
