//! Tiered secret cache.
//!
//! Every synced vault is persisted whole (name, tags and items) under
//! `vault:{uuid}:{vaultId}` as base64(seal(gzip(json(vault)), device storage
//! key)). The ids of a device's stored vaults are listed under
//! `vaults:{uuid}`. What a stored item may contain depends on its tier:
//!
//! - `TopSecret`: never any secret field, in any form.
//! - `HighlySecret`: no plaintext. After an explicit reveal the secret is
//!   sealed under a per-item key made from fresh random material, the item
//!   key is kept in session storage, and an alarm forgets both after the
//!   retention window. Values whose alarm did not survive a restart are
//!   dropped by [`SecretCache::sweep`].
//! - `Secret`: plaintext inside the (encrypted) vault, kept indefinitely.
//!
//! Every read-modify-write of one device's vaults and item keys runs under
//! that device's lock, including alarm firing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use passlink_crypto::{base64_decode, base64_encode, derive_item_key, ExtractableKey};
use passlink_protocol::{compress, decompress, MAX_DECOMPRESSED_SIZE};

use crate::alarms::Alarms;
use crate::error::{CacheError, Error, Result, StorageError};
use crate::keystore::DeviceKeyStore;
use crate::model::{merge_items, Item, ItemSecrets, SecurityTier, Vault};
use crate::storage::{
    self, item_key_key, vault_index_key, vault_key, KeyLocks, Storage, StorageArea,
};

const ALARM_PREFIX: &str = "forget-secret:";

/// Wait before retrying a forget that could not be persisted.
const FORGET_RETRY_DELAY: Duration = Duration::from_secs(10);

/// A reveal the user asked to keep for a while.
#[derive(Debug, Clone)]
pub struct KeepPasswordState {
    pub device_uuid: String,
    pub item_id: String,
    pub secrets: ItemSecrets,
}

/// Result of applying a vault sync or a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub stored: usize,
    /// Items whose incoming version was refused; the stored version is kept.
    pub rejected: Vec<String>,
}

type ItemRef = (String, String);

#[derive(Debug, Default)]
struct PendingAlarms {
    by_alarm: HashMap<String, ItemRef>,
    by_item: HashMap<ItemRef, String>,
}

impl PendingAlarms {
    fn insert(&mut self, alarm: String, item: ItemRef) -> Option<String> {
        let previous = self.by_item.insert(item.clone(), alarm.clone());
        if let Some(previous) = &previous {
            self.by_alarm.remove(previous);
        }
        self.by_alarm.insert(alarm, item);
        previous
    }

    fn remove_item(&mut self, item: &ItemRef) -> Option<String> {
        let alarm = self.by_item.remove(item)?;
        self.by_alarm.remove(&alarm);
        Some(alarm)
    }

    fn for_device(&self, device_uuid: &str) -> Vec<ItemRef> {
        self.by_item
            .keys()
            .filter(|(device, _)| device == device_uuid)
            .cloned()
            .collect()
    }
}

pub struct SecretCache {
    storage: Arc<dyn Storage>,
    keystore: Arc<DeviceKeyStore>,
    alarms: Arc<dyn Alarms>,
    locks: KeyLocks,
    retention: Duration,
    pending: Mutex<PendingAlarms>,
}

impl SecretCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        keystore: Arc<DeviceKeyStore>,
        alarms: Arc<dyn Alarms>,
        retention: Duration,
    ) -> Self {
        Self {
            storage,
            keystore,
            alarms,
            locks: KeyLocks::new(),
            retention,
            pending: Mutex::new(PendingAlarms::default()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of scheduled auto-forget alarms.
    pub fn pending_alarms(&self) -> usize {
        self.pending.lock().by_alarm.len()
    }

    /// Replace one vault wholesale with a fresh sync. Other vaults of the
    /// device are untouched.
    ///
    /// Incoming items that fail validation, belong to another vault or
    /// change an existing item's tier are refused and the stored version
    /// kept. A cached HIGHLY_SECRET value survives only if its item's
    /// `updatedAt` is unchanged.
    pub async fn replace_vault(&self, device_uuid: &str, vault: Vault) -> Result<SyncReport> {
        let _guard = self.locks.lock(device_uuid).await;
        let device_key = self.keystore.ensure(device_uuid).await?;
        let Vault {
            id,
            name,
            items,
            tags,
        } = vault;

        let current = self
            .read_vault(device_uuid, &id, &device_key)
            .await?
            .map(|stored| stored.items)
            .unwrap_or_default();
        let (items, report) = self.reconcile(device_uuid, &id, current, items).await?;
        self.write_vault(
            device_uuid,
            &device_key,
            Vault {
                id: id.clone(),
                name,
                items,
                tags,
            },
        )
        .await?;

        tracing::info!(
            uuid = %device_uuid,
            vault_id = %id,
            stored = report.stored,
            rejected = report.rejected.len(),
            "replaced vault"
        );
        Ok(report)
    }

    /// Merge single items from a pull response into their vaults, last
    /// writer wins by `updatedAt`. Same per-item rules as `replace_vault`.
    pub async fn merge_items(&self, device_uuid: &str, incoming: Vec<Item>) -> Result<SyncReport> {
        let _guard = self.locks.lock(device_uuid).await;
        let device_key = self.keystore.ensure(device_uuid).await?;

        let mut by_vault: Vec<(String, Vec<Item>)> = Vec::new();
        for item in incoming {
            let vault_id = item.meta().vault_id.clone();
            match by_vault.iter_mut().find(|(id, _)| *id == vault_id) {
                Some((_, items)) => items.push(item),
                None => by_vault.push((vault_id, vec![item])),
            }
        }

        let mut report = SyncReport::default();
        for (vault_id, items) in by_vault {
            // A pull can return an item before its vault was ever synced.
            let mut vault = self
                .read_vault(device_uuid, &vault_id, &device_key)
                .await?
                .unwrap_or_else(|| Vault::placeholder(vault_id.clone()));
            let current = std::mem::take(&mut vault.items);
            let merged = merge_items(current.clone(), items);
            let (next, partial) = self.reconcile(device_uuid, &vault_id, current, merged).await?;
            vault.items = next;
            self.write_vault(device_uuid, &device_key, vault).await?;

            report.stored += partial.stored;
            report.rejected.extend(partial.rejected);
        }
        Ok(report)
    }

    async fn reconcile(
        &self,
        device_uuid: &str,
        vault_id: &str,
        current: Vec<Item>,
        incoming: Vec<Item>,
    ) -> Result<(Vec<Item>, SyncReport)> {
        let mut previous: HashMap<String, Item> = current
            .into_iter()
            .map(|item| (item.id().to_string(), item))
            .collect();

        let mut report = SyncReport::default();
        let mut next = Vec::with_capacity(incoming.len());
        for mut item in incoming {
            let stored = previous.remove(item.id());
            // A peer never supplies a sealed value.
            item.meta_mut().sealed_secret = None;

            let valid = item.validate().and_then(|()| {
                if item.meta().vault_id == vault_id {
                    Ok(())
                } else {
                    Err(Error::Validation(format!(
                        "item filed under vault {}",
                        item.meta().vault_id
                    )))
                }
            });
            if let Err(e) = valid {
                tracing::warn!(item_id = %item.id(), error = %e, "refusing invalid item");
                report.rejected.push(item.id().to_string());
                next.extend(stored);
                continue;
            }

            if let Some(stored) = stored {
                if stored.tier() != item.tier() {
                    let err = CacheError::TierChanged {
                        item_id: item.id().to_string(),
                        stored: stored.tier(),
                        incoming: item.tier(),
                    };
                    tracing::warn!(error = %err, "refusing tier change");
                    report.rejected.push(item.id().to_string());
                    next.push(stored);
                    continue;
                }
                let unchanged = stored.updated_at() == item.updated_at();
                if item.tier() == SecurityTier::HighlySecret && unchanged {
                    item.meta_mut().sealed_secret = stored.meta().sealed_secret.clone();
                } else if stored.meta().sealed_secret.is_some() {
                    self.drop_cached(device_uuid, stored.id()).await?;
                }
            }
            next.push(item);
        }

        for removed in previous.values() {
            if removed.meta().sealed_secret.is_some() {
                self.drop_cached(device_uuid, removed.id()).await?;
            }
        }

        report.stored = next.len();
        Ok((next, report))
    }

    /// Stored vaults as persisted: no TOP_SECRET secrets and no plaintext
    /// HIGHLY_SECRET secrets.
    pub async fn vaults(&self, device_uuid: &str) -> Result<Vec<Vault>> {
        let _guard = self.locks.lock(device_uuid).await;
        let Some(device_key) = self.keystore.load(device_uuid).await? else {
            return Ok(Vec::new());
        };
        self.read_vaults(device_uuid, &device_key).await
    }

    pub async fn vault(&self, device_uuid: &str, vault_id: &str) -> Result<Option<Vault>> {
        let _guard = self.locks.lock(device_uuid).await;
        let Some(device_key) = self.keystore.load(device_uuid).await? else {
            return Ok(None);
        };
        self.read_vault(device_uuid, vault_id, &device_key).await
    }

    /// One vault with any still-cached HIGHLY_SECRET values opened.
    pub async fn decrypted_vault(&self, device_uuid: &str, vault_id: &str) -> Result<Option<Vault>> {
        let _guard = self.locks.lock(device_uuid).await;
        let Some(device_key) = self.keystore.load(device_uuid).await? else {
            return Ok(None);
        };
        let Some(mut vault) = self.read_vault(device_uuid, vault_id, &device_key).await? else {
            return Ok(None);
        };
        self.open_cached(device_uuid, &mut vault.items).await?;
        Ok(Some(vault))
    }

    /// Items of every stored vault, as persisted.
    pub async fn items(&self, device_uuid: &str) -> Result<Vec<Item>> {
        Ok(self
            .vaults(device_uuid)
            .await?
            .into_iter()
            .flat_map(|vault| vault.items)
            .collect())
    }

    /// Items of every stored vault with cached HIGHLY_SECRET values opened.
    pub async fn decrypted_items(&self, device_uuid: &str) -> Result<Vec<Item>> {
        let _guard = self.locks.lock(device_uuid).await;
        let Some(device_key) = self.keystore.load(device_uuid).await? else {
            return Ok(Vec::new());
        };
        let mut items: Vec<Item> = self
            .read_vaults(device_uuid, &device_key)
            .await?
            .into_iter()
            .flat_map(|vault| vault.items)
            .collect();
        self.open_cached(device_uuid, &mut items).await?;
        Ok(items)
    }

    /// Keep a revealed secret according to the item's tier.
    pub async fn keep_password(&self, state: KeepPasswordState) -> Result<()> {
        let KeepPasswordState {
            device_uuid,
            item_id,
            secrets,
        } = state;
        let _guard = self.locks.lock(&device_uuid).await;
        let device_key = self.keystore.ensure(&device_uuid).await?;

        let not_found = || CacheError::ItemNotFound {
            device_id: device_uuid.clone(),
            item_id: item_id.clone(),
        };
        let mut vault = self
            .read_vaults(&device_uuid, &device_key)
            .await?
            .into_iter()
            .find(|vault| vault.item(&item_id).is_some())
            .ok_or_else(not_found)?;
        let item = vault
            .items
            .iter_mut()
            .find(|item| item.id() == item_id)
            .ok_or_else(not_found)?;

        match item.tier() {
            SecurityTier::TopSecret => Err(CacheError::TopSecretNotCached(item_id).into()),
            SecurityTier::Secret => {
                item.apply_secrets(&secrets);
                self.write_vault(&device_uuid, &device_key, vault).await
            }
            SecurityTier::HighlySecret => {
                let material = ExtractableKey::generate()?;
                let item_key = derive_item_key(material.as_bytes(), &device_uuid, &item_id)?;
                let plaintext = Zeroizing::new(serde_json::to_vec(&secrets)?);
                item.meta_mut().sealed_secret = Some(base64_encode(&item_key.seal(&plaintext)?));

                let session_key = item_key_key(&device_uuid, &item_id);
                self.storage
                    .set(StorageArea::Session, &session_key, item_key.to_base64().into())
                    .await?;
                if let Err(e) = self.write_vault(&device_uuid, &device_key, vault).await {
                    tracing::error!(item_id = %item_id, error = %e, "persisting cached secret failed, rolling back");
                    if let Err(e) = self.storage.remove(StorageArea::Session, &session_key).await {
                        tracing::warn!(error = %e, "rollback of item key failed");
                    }
                    return Err(e);
                }

                self.schedule_forget(&device_uuid, &item_id, self.retention);
                tracing::debug!(item_id = %item_id, retention = ?self.retention, "cached secret");
                Ok(())
            }
        }
    }

    /// Forget a cached HIGHLY_SECRET value now and cancel its alarm. If the
    /// forget cannot be persisted the alarm stays armed.
    pub async fn password_reset(&self, device_uuid: &str, item_id: &str) -> Result<()> {
        let _guard = self.locks.lock(device_uuid).await;
        self.forget_locked(device_uuid, item_id).await
    }

    /// Handle a fired alarm. Returns the item it forgot, if the alarm was
    /// still current. A forget that fails is retried on a new alarm.
    pub async fn on_alarm(&self, alarm: &str) -> Result<Option<(String, String)>> {
        if !alarm.starts_with(ALARM_PREFIX) {
            return Ok(None);
        }
        let Some((device_uuid, item_id)) = self.pending.lock().by_alarm.get(alarm).cloned() else {
            tracing::debug!(alarm = %alarm, "stale alarm");
            return Ok(None);
        };

        let _guard = self.locks.lock(&device_uuid).await;
        // Cancelled or re-armed while waiting for the lock.
        let current = self.pending.lock().by_alarm.get(alarm).cloned();
        if current.as_ref() != Some(&(device_uuid.clone(), item_id.clone())) {
            return Ok(None);
        }
        if let Err(e) = self.forget_locked(&device_uuid, &item_id).await {
            tracing::warn!(uuid = %device_uuid, item_id = %item_id, error = %e, "auto-forget failed, retrying");
            self.schedule_forget(&device_uuid, &item_id, FORGET_RETRY_DELAY);
            return Err(e);
        }
        tracing::info!(uuid = %device_uuid, item_id = %item_id, "auto-forgot cached secret");
        Ok(Some((device_uuid, item_id)))
    }

    /// Consume fired alarm names until the channel closes.
    pub async fn run_alarms(self: Arc<Self>, mut fired: mpsc::UnboundedReceiver<String>) {
        while let Some(alarm) = fired.recv().await {
            if let Err(e) = self.on_alarm(&alarm).await {
                tracing::warn!(alarm = %alarm, error = %e, "alarm handling failed");
            }
        }
    }

    /// Forget every cached value of a device that has no live alarm.
    ///
    /// Run at startup. Session storage and alarms do not outlive the
    /// browser, so a sealed value found without an alarm has either lost
    /// its key or lost its expiry. Returns how many values were dropped.
    pub async fn sweep(&self, device_uuid: &str) -> Result<usize> {
        let _guard = self.locks.lock(device_uuid).await;
        let Some(device_key) = self.keystore.load(device_uuid).await? else {
            return Ok(0);
        };

        let mut forgotten = 0;
        for mut vault in self.read_vaults(device_uuid, &device_key).await? {
            let mut changed = false;
            for item in &mut vault.items {
                if item.meta().sealed_secret.is_none() {
                    continue;
                }
                let tracked = self
                    .pending
                    .lock()
                    .by_item
                    .contains_key(&(device_uuid.to_string(), item.id().to_string()));
                if tracked {
                    continue;
                }
                self.storage
                    .remove(StorageArea::Session, &item_key_key(device_uuid, item.id()))
                    .await?;
                item.meta_mut().sealed_secret = None;
                changed = true;
                forgotten += 1;
            }
            if changed {
                self.write_vault(device_uuid, &device_key, vault).await?;
            }
        }

        if forgotten > 0 {
            tracing::info!(uuid = %device_uuid, forgotten, "swept unscheduled cached secrets");
        }
        Ok(forgotten)
    }

    /// Drop everything cached for a device, on unpair or logout.
    pub async fn forget_device(&self, device_uuid: &str) -> Result<()> {
        let _guard = self.locks.lock(device_uuid).await;

        let mut session_keys: Vec<String> = Vec::new();
        let tracked = self.pending.lock().for_device(device_uuid);
        for item in tracked {
            if let Some(alarm) = self.pending.lock().remove_item(&item) {
                self.alarms.clear(&alarm);
            }
            session_keys.push(item_key_key(device_uuid, &item.1));
        }

        let vault_ids = self.read_index(device_uuid).await.unwrap_or_else(|e| {
            tracing::warn!(uuid = %device_uuid, error = %e, "vault index unreadable during forget");
            Vec::new()
        });
        if let Some(device_key) = self.keystore.load(device_uuid).await.unwrap_or_else(|e| {
            tracing::warn!(uuid = %device_uuid, error = %e, "device key unreadable during forget");
            None
        }) {
            if let Ok(vaults) = self.read_vaults(device_uuid, &device_key).await {
                session_keys.extend(
                    vaults
                        .iter()
                        .flat_map(|vault| &vault.items)
                        .map(|item| item_key_key(device_uuid, item.id())),
                );
            }
        }
        session_keys.sort();
        session_keys.dedup();

        let mut local_keys: Vec<String> = vault_ids
            .iter()
            .map(|vault_id| vault_key(device_uuid, vault_id))
            .collect();
        local_keys.push(vault_index_key(device_uuid));

        self.storage
            .remove_many(StorageArea::Session, &session_keys)
            .await?;
        self.storage
            .remove_many(StorageArea::Local, &local_keys)
            .await?;
        self.keystore.forget(device_uuid).await?;
        tracing::info!(uuid = %device_uuid, "forgot device cache");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals. Callers hold the device lock.
    // ------------------------------------------------------------------------

    fn schedule_forget(&self, device_uuid: &str, item_id: &str, delay: Duration) {
        let alarm = format!("{ALARM_PREFIX}{}", uuid::Uuid::new_v4());
        let previous = self
            .pending
            .lock()
            .insert(alarm.clone(), (device_uuid.to_string(), item_id.to_string()));
        if let Some(previous) = previous {
            self.alarms.clear(&previous);
        }
        self.alarms.create(&alarm, delay);
    }

    fn cancel_forget(&self, device_uuid: &str, item_id: &str) {
        let item = (device_uuid.to_string(), item_id.to_string());
        if let Some(alarm) = self.pending.lock().remove_item(&item) {
            self.alarms.clear(&alarm);
        }
    }

    /// Erase the item key first: without it the sealed value can't be
    /// opened even if stripping it from the vault fails. The alarm is only
    /// cancelled once both steps succeeded.
    async fn forget_locked(&self, device_uuid: &str, item_id: &str) -> Result<()> {
        self.storage
            .remove(StorageArea::Session, &item_key_key(device_uuid, item_id))
            .await?;

        if let Some(device_key) = self.keystore.load(device_uuid).await? {
            let holder = self
                .read_vaults(device_uuid, &device_key)
                .await?
                .into_iter()
                .find(|vault| vault.item(item_id).is_some());
            if let Some(mut vault) = holder {
                let stripped = vault
                    .items
                    .iter_mut()
                    .find(|item| item.id() == item_id)
                    .map(|item| item.meta_mut().sealed_secret.take().is_some())
                    .unwrap_or(false);
                if stripped {
                    self.write_vault(device_uuid, &device_key, vault).await?;
                }
            }
        }

        self.cancel_forget(device_uuid, item_id);
        Ok(())
    }

    /// Forget the cached value for an item whose stored entry is being
    /// replaced.
    async fn drop_cached(&self, device_uuid: &str, item_id: &str) -> Result<()> {
        self.storage
            .remove(StorageArea::Session, &item_key_key(device_uuid, item_id))
            .await?;
        self.cancel_forget(device_uuid, item_id);
        Ok(())
    }

    async fn open_cached(&self, device_uuid: &str, items: &mut [Item]) -> Result<()> {
        for item in items {
            let Some(sealed) = item.meta_mut().sealed_secret.take() else {
                continue;
            };
            let Some(item_key) = self.read_item_key(device_uuid, item.id()).await? else {
                // Session storage was cleared; the value is gone.
                continue;
            };
            let plaintext = Zeroizing::new(item_key.open(&base64_decode(&sealed)?)?);
            let secrets: ItemSecrets = serde_json::from_slice(&plaintext)?;
            item.apply_secrets(&secrets);
        }
        Ok(())
    }

    async fn read_item_key(&self, device_uuid: &str, item_id: &str) -> Result<Option<ExtractableKey>> {
        let key = item_key_key(device_uuid, item_id);
        let Some(value) = self.storage.get(StorageArea::Session, &key).await? else {
            return Ok(None);
        };
        let encoded = value.as_str().ok_or_else(|| StorageError::Corrupt {
            key,
            reason: "expected base64 string".to_string(),
        })?;
        Ok(Some(ExtractableKey::from_base64(encoded)?))
    }

    async fn read_index(&self, device_uuid: &str) -> Result<Vec<String>> {
        Ok(
            storage::load(self.storage.as_ref(), StorageArea::Local, &vault_index_key(device_uuid))
                .await?
                .unwrap_or_default(),
        )
    }

    async fn read_vaults(&self, device_uuid: &str, device_key: &ExtractableKey) -> Result<Vec<Vault>> {
        let mut vaults = Vec::new();
        for vault_id in self.read_index(device_uuid).await? {
            match self.read_vault(device_uuid, &vault_id, device_key).await? {
                Some(vault) => vaults.push(vault),
                None => tracing::warn!(uuid = %device_uuid, vault_id = %vault_id, "indexed vault missing"),
            }
        }
        Ok(vaults)
    }

    async fn read_vault(
        &self,
        device_uuid: &str,
        vault_id: &str,
        device_key: &ExtractableKey,
    ) -> Result<Option<Vault>> {
        let key = vault_key(device_uuid, vault_id);
        let Some(value) = self.storage.get(StorageArea::Local, &key).await? else {
            return Ok(None);
        };
        let encoded = value.as_str().ok_or_else(|| StorageError::Corrupt {
            key: key.clone(),
            reason: "expected base64 string".to_string(),
        })?;
        let compressed = Zeroizing::new(device_key.open(&base64_decode(encoded)?)?);
        let json = Zeroizing::new(decompress(&compressed, MAX_DECOMPRESSED_SIZE)?);
        serde_json::from_slice(&json).map(Some).map_err(|e| {
            StorageError::Corrupt {
                key,
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn write_vault(
        &self,
        device_uuid: &str,
        device_key: &ExtractableKey,
        mut vault: Vault,
    ) -> Result<()> {
        vault.items.iter_mut().for_each(sanitize);
        let json = Zeroizing::new(serde_json::to_vec(&vault)?);
        let compressed = Zeroizing::new(compress(&json)?);
        let sealed = device_key.seal(&compressed)?;
        self.storage
            .set(
                StorageArea::Local,
                &vault_key(device_uuid, &vault.id),
                base64_encode(&sealed).into(),
            )
            .await?;

        let mut index = self.read_index(device_uuid).await?;
        if !index.contains(&vault.id) {
            index.push(vault.id);
            storage::save(
                self.storage.as_ref(),
                StorageArea::Local,
                &vault_index_key(device_uuid),
                &index,
            )
            .await?;
        }
        Ok(())
    }
}

/// Strip whatever the item's tier forbids from being persisted.
fn sanitize(item: &mut Item) {
    match item.tier() {
        SecurityTier::TopSecret => {
            item.strip_secrets();
            item.meta_mut().sealed_secret = None;
        }
        SecurityTier::HighlySecret => item.strip_secrets(),
        SecurityTier::Secret => item.meta_mut().sealed_secret = None,
    }
}
