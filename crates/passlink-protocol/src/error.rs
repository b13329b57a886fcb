use thiserror::Error;

use crate::frame::SocketAction;
use crate::session::SessionState;

/// Failures while driving one transport session.
///
/// Every variant maps to a wire `errorCode` sent with `CLOSE_WITH_ERROR`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unexpected {action} frame in state {state}")]
    UnexpectedFrame {
        action: SocketAction,
        state: SessionState,
    },

    #[error("Unexpected {event} in state {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: SessionState,
    },

    #[error("Device id mismatch: expected {expected}, peer declared {declared}")]
    DeviceMismatch { expected: String, declared: String },

    #[error("Session id mismatch: expected {expected}, peer declared {declared}")]
    SessionMismatch { expected: String, declared: String },

    #[error("Out-of-order chunk: expected index {expected}, got {got}")]
    OutOfOrderChunk { expected: u32, got: u32 },

    #[error("Duplicate chunk index {0}")]
    DuplicateChunk(u32),

    #[error("Chunk index {index} out of range for {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Invalid chunk count: {0}")]
    InvalidChunkCount(u32),

    #[error("A transfer is already in progress")]
    TransferActive,

    #[error("Transfer checksum mismatch")]
    ChecksumMismatch,

    #[error("Unknown pull request: {0}")]
    UnknownPullRequest(String),

    #[error("Duplicate pull request: {0}")]
    DuplicatePullRequest(String),

    #[error("Decompressed payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Session keys not established")]
    NoSessionKeys,

    #[error("Crypto error: {0}")]
    Crypto(#[from] passlink_crypto::CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Wire error code for `CLOSE_WITH_ERROR`.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::UnexpectedFrame { .. } | ProtocolError::UnexpectedEvent { .. } => {
                "UNEXPECTED_FRAME"
            }
            ProtocolError::DeviceMismatch { .. } => "DEVICE_MISMATCH",
            ProtocolError::SessionMismatch { .. } => "SESSION_MISMATCH",
            ProtocolError::OutOfOrderChunk { .. }
            | ProtocolError::DuplicateChunk(_)
            | ProtocolError::ChunkOutOfRange { .. }
            | ProtocolError::InvalidChunkCount(_) => "CHUNK_ORDER",
            ProtocolError::TransferActive => "TRANSFER_ACTIVE",
            ProtocolError::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ProtocolError::UnknownPullRequest(_) | ProtocolError::DuplicatePullRequest(_) => {
                "UNKNOWN_PULL_REQUEST"
            }
            ProtocolError::PayloadTooLarge { .. }
            | ProtocolError::InvalidPayload(_)
            | ProtocolError::Compression(_)
            | ProtocolError::Json(_) => "PAYLOAD_INVALID",
            ProtocolError::NoSessionKeys | ProtocolError::Crypto(_) => "CRYPTO_FAILURE",
        }
    }

    /// Whether the failure came from cryptography rather than the peer's framing.
    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            ProtocolError::Crypto(_) | ProtocolError::NoSessionKeys
        )
    }
}
