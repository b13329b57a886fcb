//! Pull requests: narrow, in-session requests for vault data.
//!
//! The browser sends `PULL_REQUEST`; the peer answers with
//! `PULL_REQUEST_ACTION`, either carrying a sealed inline payload or
//! announcing that the response follows as a transfer tagged with the
//! request id. Several requests may be outstanding at once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestKind {
    /// The secret fields of one item (TOP_SECRET reveal).
    ItemSecret,
    /// One full item.
    Item,
    /// A whole vault.
    Vault,
}

/// `PULL_REQUEST` payload. The frame id equals `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub request_id: String,
    pub kind: PullRequestKind,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl PullRequest {
    pub fn new(kind: PullRequestKind, device_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            vault_id: None,
            item_id: None,
        }
    }

    pub fn for_item(
        kind: PullRequestKind,
        device_id: impl Into<String>,
        vault_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            vault_id: Some(vault_id.into()),
            item_id: Some(item_id.into()),
            ..Self::new(kind, device_id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullStatus {
    Accept,
    Cancel,
}

/// `PULL_REQUEST_ACTION` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestAction {
    pub request_id: String,
    pub status: PullStatus,
    /// Base64 sealed inline response. Absent when a transfer follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// `PULL_REQUEST_COMPLETED` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestCompleted {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Data(Value),
    Cancelled,
    /// The peer finished the request without returning data.
    Completed,
    /// The session closed before the peer answered.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingAction,
    AwaitingTransfer,
}

#[derive(Debug)]
struct Tracked {
    request: PullRequest,
    phase: Phase,
}

/// Outstanding pull requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PullRequestTracker {
    pending: HashMap<String, Tracked>,
}

impl PullRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, request: PullRequest) -> Result<(), ProtocolError> {
        if self.pending.contains_key(&request.request_id) {
            return Err(ProtocolError::DuplicatePullRequest(request.request_id));
        }
        self.pending.insert(
            request.request_id.clone(),
            Tracked {
                request,
                phase: Phase::AwaitingAction,
            },
        );
        Ok(())
    }

    pub fn get(&self, request_id: &str) -> Option<&PullRequest> {
        self.pending.get(request_id).map(|t| &t.request)
    }

    /// The peer accepted and will stream the response as a transfer.
    pub fn await_transfer(&mut self, request_id: &str) -> Result<(), ProtocolError> {
        let tracked = self
            .pending
            .get_mut(request_id)
            .ok_or_else(|| ProtocolError::UnknownPullRequest(request_id.to_string()))?;
        tracked.phase = Phase::AwaitingTransfer;
        Ok(())
    }

    pub fn is_awaiting_transfer(&self, request_id: &str) -> bool {
        self.pending
            .get(request_id)
            .is_some_and(|t| t.phase == Phase::AwaitingTransfer)
    }

    /// Remove and return a request that has been answered.
    pub fn resolve(&mut self, request_id: &str) -> Result<PullRequest, ProtocolError> {
        self.pending
            .remove(request_id)
            .map(|t| t.request)
            .ok_or_else(|| ProtocolError::UnknownPullRequest(request_id.to_string()))
    }

    /// Remove every outstanding request, e.g. when the session closes.
    pub fn drain(&mut self) -> Vec<PullRequest> {
        self.pending.drain().map(|(_, t)| t.request).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
