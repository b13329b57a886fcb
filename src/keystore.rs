//! Device storage keys, persisted wrapped under a local key-encryption key.
//!
//! Each paired device gets its own extractable storage key. The key never
//! reaches storage in the clear: it is AES-KW wrapped under the wrapping key
//! kept at `keystore:wrapping-key`.

use std::sync::Arc;

use tokio::sync::Mutex;

use passlink_crypto::{
    base64_decode, base64_encode, derive_device_storage_key, unwrap_key, wrap_key, ExtractableKey,
};

use crate::error::{Result, StorageError};
use crate::storage::{device_key_key, Storage, StorageArea, WRAPPING_KEY};

pub struct DeviceKeyStore {
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
}

impl DeviceKeyStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// The storage key for `device_uuid`, provisioning one on first use.
    pub async fn ensure(&self, device_uuid: &str) -> Result<ExtractableKey> {
        let _guard = self.lock.lock().await;
        let kek = self.wrapping_key().await?;
        if let Some(key) = self.read(device_uuid, &kek).await? {
            return Ok(key);
        }

        let material = ExtractableKey::generate()?;
        let key = derive_device_storage_key(device_uuid, material.as_bytes())?;
        let wrapped = wrap_key(&key, &kek)?;
        self.storage
            .set(
                StorageArea::Local,
                &device_key_key(device_uuid),
                base64_encode(&wrapped).into(),
            )
            .await?;
        tracing::debug!(uuid = %device_uuid, "provisioned device storage key");
        Ok(key)
    }

    /// The storage key for `device_uuid`, if one was provisioned.
    pub async fn load(&self, device_uuid: &str) -> Result<Option<ExtractableKey>> {
        let _guard = self.lock.lock().await;
        let Some(kek) = self.existing_wrapping_key().await? else {
            return Ok(None);
        };
        self.read(device_uuid, &kek).await
    }

    pub async fn forget(&self, device_uuid: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.storage
            .remove(StorageArea::Local, &device_key_key(device_uuid))
            .await
    }

    async fn read(&self, device_uuid: &str, kek: &ExtractableKey) -> Result<Option<ExtractableKey>> {
        let key = device_key_key(device_uuid);
        let Some(value) = self.storage.get(StorageArea::Local, &key).await? else {
            return Ok(None);
        };
        let encoded = value.as_str().ok_or_else(|| StorageError::Corrupt {
            key: key.clone(),
            reason: "expected base64 string".to_string(),
        })?;
        Ok(Some(unwrap_key(&base64_decode(encoded)?, kek)?))
    }

    async fn existing_wrapping_key(&self) -> Result<Option<ExtractableKey>> {
        let Some(value) = self.storage.get(StorageArea::Local, WRAPPING_KEY).await? else {
            return Ok(None);
        };
        let encoded = value.as_str().ok_or_else(|| StorageError::Corrupt {
            key: WRAPPING_KEY.to_string(),
            reason: "expected base64 string".to_string(),
        })?;
        Ok(Some(ExtractableKey::from_base64(encoded)?))
    }

    async fn wrapping_key(&self) -> Result<ExtractableKey> {
        if let Some(kek) = self.existing_wrapping_key().await? {
            return Ok(kek);
        }
        let kek = ExtractableKey::generate()?;
        self.storage
            .set(StorageArea::Local, WRAPPING_KEY, kek.to_base64().into())
            .await?;
        Ok(kek)
    }
}
