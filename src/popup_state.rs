//! Popup UI snapshot, sealed under a key that lives only in session storage.
//!
//! Losing the session area (browser restart) makes the snapshot unreadable,
//! which reads as an empty state.

use std::sync::Arc;

use serde_json::Value;

use passlink_crypto::{base64_decode, base64_encode, ExtractableKey};

use crate::error::{Result, StorageError};
use crate::storage::{Storage, StorageArea, POPUP_STATE_KEY, POPUP_STATE_KEY_KEY};

pub struct PopupStateStore {
    storage: Arc<dyn Storage>,
}

impl PopupStateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn save(&self, state: &Value) -> Result<()> {
        let key = match self.session_key().await? {
            Some(key) => key,
            None => {
                let key = ExtractableKey::generate()?;
                self.storage
                    .set(StorageArea::Session, POPUP_STATE_KEY_KEY, key.to_base64().into())
                    .await?;
                key
            }
        };
        let sealed = key.seal(&serde_json::to_vec(state)?)?;
        self.storage
            .set(StorageArea::Local, POPUP_STATE_KEY, base64_encode(&sealed).into())
            .await
    }

    /// The last saved state, or `{}` if there is none or it can't be read.
    pub async fn load(&self) -> Value {
        match self.try_load().await {
            Ok(Some(state)) => state,
            Ok(None) => Value::Object(Default::default()),
            Err(e) => {
                tracing::warn!(error = %e, "popup state unreadable, starting empty");
                Value::Object(Default::default())
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(StorageArea::Local, POPUP_STATE_KEY).await?;
        self.storage
            .remove(StorageArea::Session, POPUP_STATE_KEY_KEY)
            .await
    }

    async fn try_load(&self) -> Result<Option<Value>> {
        let Some(sealed) = self.storage.get(StorageArea::Local, POPUP_STATE_KEY).await? else {
            return Ok(None);
        };
        let Some(key) = self.session_key().await? else {
            return Ok(None);
        };
        let encoded = sealed.as_str().ok_or_else(|| StorageError::Corrupt {
            key: POPUP_STATE_KEY.to_string(),
            reason: "expected base64 string".to_string(),
        })?;
        let plaintext = key.open(&base64_decode(encoded)?)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    async fn session_key(&self) -> Result<Option<ExtractableKey>> {
        let Some(value) = self.storage.get(StorageArea::Session, POPUP_STATE_KEY_KEY).await? else {
            return Ok(None);
        };
        let encoded = value.as_str().ok_or_else(|| StorageError::Corrupt {
            key: POPUP_STATE_KEY_KEY.to_string(),
            reason: "expected base64 string".to_string(),
        })?;
        Ok(Some(ExtractableKey::from_base64(encoded)?))
    }
}
