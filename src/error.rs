use serde::{Deserialize, Serialize};
use thiserror::Error;

use passlink_crypto::CryptoError;
use passlink_protocol::ProtocolError;

use crate::model::SecurityTier;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Item {0} is TOP_SECRET and is never cached")]
    TopSecretNotCached(String),

    #[error("Item {item_id} not found for device {device_id}")]
    ItemNotFound { device_id: String, item_id: String },

    #[error("Security tier of item {item_id} is immutable ({stored:?} -> {incoming:?})")]
    TierChanged {
        item_id: String,
        stored: SecurityTier,
        incoming: SecurityTier,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Device id {id} already belongs to device {existing_uuid}")]
    DeviceCollision { id: String, existing_uuid: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the surrounding UI is told when a session fails. Never carries
/// cryptographic detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    ConnectionError,
    Timeout,
}

impl Error {
    pub fn user_status(&self) -> UserStatus {
        match self {
            Error::Timeout(_) => UserStatus::Timeout,
            _ => UserStatus::ConnectionError,
        }
    }
}
