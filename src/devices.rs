//! Paired device registry, persisted as one list under `devices`.

use std::sync::Arc;

use tokio::sync::Mutex;

use passlink_protocol::{HelloPayload, VaultRef};

use crate::config::IdCollisionPolicy;
use crate::error::{Error, Result};
use crate::model::Device;
use crate::storage::{self, Storage, StorageArea, DEVICES_KEY};

pub struct DeviceRegistry {
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
    policy: IdCollisionPolicy,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<dyn Storage>, policy: IdCollisionPolicy) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> IdCollisionPolicy {
        self.policy
    }

    /// All paired devices. A missing or unreadable list reads as empty.
    pub async fn list(&self) -> Vec<Device> {
        match self.load().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(error = %e, "device list unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Option<Device> {
        self.list().await.into_iter().find(|d| d.uuid == uuid)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Device> {
        self.list().await.into_iter().find(|d| d.id == id)
    }

    /// Create or refresh the record for `uuid` from a peer `HELLO`.
    ///
    /// Records are merged by `uuid`. If another device already holds the
    /// peer's `deviceId`, the configured policy decides: `Reject` fails with
    /// `DeviceCollision`, `Overwrite` purges the other record.
    pub async fn device_update(&self, uuid: &str, hello: &HelloPayload) -> Result<Device> {
        let _guard = self.lock.lock().await;
        let mut devices = self.load().await?;

        let holder = devices
            .iter()
            .find(|d| d.id == hello.device_id && d.uuid != uuid)
            .map(|d| d.uuid.clone());
        if let Some(existing_uuid) = holder {
            match self.policy {
                IdCollisionPolicy::Reject => {
                    return Err(Error::DeviceCollision {
                        id: hello.device_id.clone(),
                        existing_uuid,
                    });
                }
                IdCollisionPolicy::Overwrite => {
                    tracing::warn!(
                        device_id = %hello.device_id,
                        replaced_uuid = %existing_uuid,
                        uuid = %uuid,
                        "device id reassigned, purging previous holder"
                    );
                    devices.retain(|d| d.id != hello.device_id || d.uuid == uuid);
                }
            }
        }

        let device = match devices.iter_mut().find(|d| d.uuid == uuid) {
            Some(existing) => {
                if existing.id != hello.device_id {
                    tracing::info!(uuid = %uuid, from = %existing.id, to = %hello.device_id, "peer device id changed");
                }
                existing.apply_hello(hello);
                existing.clone()
            }
            None => {
                let device = Device::from_hello(uuid, hello);
                tracing::info!(uuid = %uuid, device_id = %device.id, "paired new device");
                devices.push(device.clone());
                device
            }
        };

        self.store(&devices).await?;
        Ok(device)
    }

    pub async fn update_vaults(&self, uuid: &str, vaults: Vec<VaultRef>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut devices = self.load().await?;
        let Some(device) = devices.iter_mut().find(|d| d.uuid == uuid) else {
            return Ok(());
        };
        device.vaults = vaults;
        device.updated_at = chrono::Utc::now().timestamp_millis();
        self.store(&devices).await
    }

    /// Unpair. Returns whether a record was removed.
    pub async fn remove(&self, uuid: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut devices = self.load().await?;
        let before = devices.len();
        devices.retain(|d| d.uuid != uuid);
        if devices.len() == before {
            return Ok(false);
        }
        self.store(&devices).await?;
        Ok(true)
    }

    async fn load(&self) -> Result<Vec<Device>> {
        Ok(storage::load(self.storage.as_ref(), StorageArea::Local, DEVICES_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn store(&self, devices: &[Device]) -> Result<()> {
        storage::save(self.storage.as_ref(), StorageArea::Local, DEVICES_KEY, devices).await
    }
}
