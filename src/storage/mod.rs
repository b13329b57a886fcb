//! Host key-value storage capability.
//!
//! Two areas mirror the browser's extension storage: `Local` survives
//! restarts, `Session` is wiped when the browser closes. Per-item cache keys
//! live only in `Session`.

mod locks;
mod memory;

pub use locks::KeyLocks;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Local,
    Session,
}

/// User-implemented storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>>;

    async fn set(&self, area: StorageArea, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, area: StorageArea, key: &str) -> Result<()>;

    async fn remove_many(&self, area: StorageArea, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(area, key).await?;
        }
        Ok(())
    }
}

/// Read and deserialize a value. A value that doesn't parse is `Corrupt`.
pub async fn load<T: DeserializeOwned>(
    storage: &dyn Storage,
    area: StorageArea,
    key: &str,
) -> Result<Option<T>> {
    match storage.get(area, key).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        }),
        None => Ok(None),
    }
}

pub async fn save<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    area: StorageArea,
    key: &str,
    value: &T,
) -> Result<()> {
    storage.set(area, key, serde_json::to_value(value)?).await
}

// Storage keys.

pub const DEVICES_KEY: &str = "devices";
pub const WRAPPING_KEY: &str = "keystore:wrapping-key";
pub const POPUP_STATE_KEY: &str = "popup-state";
pub const POPUP_STATE_KEY_KEY: &str = "popup-state-key";

/// Ids of the vaults stored for a device.
pub fn vault_index_key(device_uuid: &str) -> String {
    format!("vaults:{device_uuid}")
}

pub fn vault_key(device_uuid: &str, vault_id: &str) -> String {
    format!("vault:{device_uuid}:{vault_id}")
}

pub fn item_key_key(device_uuid: &str, item_id: &str) -> String {
    format!("item-key:{device_uuid}:{item_id}")
}

pub fn device_key_key(device_uuid: &str) -> String {
    format!("keystore:device:{device_uuid}")
}
