//! Requests the lifecycle engine sends to the game server.

pub mod memory;

use crate::sim::jobs::id_string;
use crate::sim::resources::{DeltaEntry, ResourceDelta};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub action_id: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    #[serde(deserialize_with = "id_string")]
    pub job_id: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub duration_seconds: f64,
    #[serde(default)]
    pub locked_costs: Vec<DeltaEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub action_id: String,
    pub job_id: String,
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    #[serde(default)]
    pub locked_costs_refund: Vec<DeltaEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub job_id: String,
}

/// `ok: false` means the job is not finished yet, not that something failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub ok: bool,
    #[serde(default)]
    pub resource_delta: ResourceDelta,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("job not found or no longer running: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// The server no longer knows the job, so "no active job" already holds.
    pub fn is_already_gone(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// The server side of start/cancel/complete. Implementations must treat
/// repeated `complete` calls for one job id as safe.
#[async_trait]
pub trait ActionBackend: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<StartResponse, BackendError>;

    async fn cancel(&self, request: CancelRequest) -> Result<CancelResponse, BackendError>;

    async fn complete(&self, request: CompleteRequest) -> Result<CompleteResponse, BackendError>;
}
