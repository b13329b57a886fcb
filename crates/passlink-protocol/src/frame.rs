//! JSON wire frames: `{ id, action, payload }`.
//!
//! Replies echo the `id` of the frame they answer; that echo is the only
//! correlation the peer relies on across pipelined pull requests.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketAction {
    Hello,
    Challenge,
    InitTransfer,
    InitTransferConfirmed,
    TransferChunk,
    TransferChunkConfirmed,
    TransferCompleted,
    PullRequest,
    PullRequestAction,
    PullRequestCompleted,
    CloseWithError,
    CloseWithSuccess,
}

impl SocketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketAction::Hello => "HELLO",
            SocketAction::Challenge => "CHALLENGE",
            SocketAction::InitTransfer => "INIT_TRANSFER",
            SocketAction::InitTransferConfirmed => "INIT_TRANSFER_CONFIRMED",
            SocketAction::TransferChunk => "TRANSFER_CHUNK",
            SocketAction::TransferChunkConfirmed => "TRANSFER_CHUNK_CONFIRMED",
            SocketAction::TransferCompleted => "TRANSFER_COMPLETED",
            SocketAction::PullRequest => "PULL_REQUEST",
            SocketAction::PullRequestAction => "PULL_REQUEST_ACTION",
            SocketAction::PullRequestCompleted => "PULL_REQUEST_COMPLETED",
            SocketAction::CloseWithError => "CLOSE_WITH_ERROR",
            SocketAction::CloseWithSuccess => "CLOSE_WITH_SUCCESS",
        }
    }
}

impl fmt::Display for SocketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    pub action: SocketAction,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// A frame that starts a new exchange, with a fresh id.
    pub fn new<P: Serialize>(action: SocketAction, payload: &P) -> Result<Self, ProtocolError> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), action, payload)
    }

    pub fn with_id<P: Serialize>(
        id: impl Into<String>,
        action: SocketAction,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: id.into(),
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// A reply echoing this frame's id.
    pub fn reply<P: Serialize>(
        &self,
        action: SocketAction,
        payload: &P,
    ) -> Result<Self, ProtocolError> {
        Self::with_id(self.id.clone(), action, payload)
    }

    /// Deserialize the payload into its typed form.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ProtocolError::InvalidPayload(format!("{} payload: {}", self.action, e))
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }

    /// `CLOSE_WITH_ERROR` describing `error`. Carries only the error code.
    pub fn close_with_error(reply_to: Option<&str>, error: &ProtocolError) -> Self {
        let payload = serde_json::json!({ "errorCode": error.error_code() });
        Self {
            id: reply_to
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            action: SocketAction::CloseWithError,
            payload,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Lightweight vault reference a peer advertises in `HELLO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRef {
    pub id: String,
    pub name: String,
}

/// `HELLO`: device identifier plus descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub device_id: String,
    pub name: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default)]
    pub vaults: Vec<VaultRef>,
}

/// Inbound `CHALLENGE` from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    /// Peer ephemeral public key, base64 SEC1.
    pub public_key: String,
    pub session_id: String,
    /// Base64 HKDF salt for the session key.
    pub hkdf_salt: String,
}

/// Our `CHALLENGE` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeReply {
    /// Hex r||s signature, 128 chars.
    pub signature: String,
    /// Local ephemeral public key, base64 uncompressed SEC1.
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTransferPayload {
    pub total_chunks: u32,
    /// Hex SHA-256 of the sealed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Set when the transfer answers a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunkPayload {
    pub chunk_index: u32,
    /// Base64 chunk bytes.
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkConfirmedPayload {
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Payload-less frames serialize as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}
