//! Process root: builds the shared services from a [`PasslinkConfig`] and
//! starts drivers for new connections.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use passlink_crypto::StoredIdentity;
use passlink_protocol::{Session, SessionConfig};

use crate::alarms::TokioAlarms;
use crate::bus::EventBus;
use crate::config::{PasslinkConfig, TransferSettings};
use crate::devices::DeviceRegistry;
use crate::error::{Error, Result};
use crate::keystore::DeviceKeyStore;
use crate::messaging::Messenger;
use crate::secret_cache::SecretCache;
use crate::storage::Storage;
use crate::sync::{DriverContext, DriverHandle, FrameTransport, SessionDriver};

pub struct Passlink {
    ctx: DriverContext,
    identity: StoredIdentity,
    alarms: Arc<TokioAlarms>,
    fired: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    transfer: TransferSettings,
}

impl Passlink {
    pub fn new(
        config: &PasslinkConfig,
        identity: StoredIdentity,
        storage: Arc<dyn Storage>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let keystore = Arc::new(DeviceKeyStore::new(storage.clone()));
        let (alarms, fired) = TokioAlarms::new();
        let alarms = Arc::new(alarms);
        let cache = Arc::new(SecretCache::new(
            storage.clone(),
            keystore.clone(),
            alarms.clone(),
            config.cache.retention(),
        ));
        let ctx = DriverContext {
            devices: Arc::new(DeviceRegistry::new(
                storage,
                config.devices.id_collision_policy,
            )),
            keystore,
            cache,
            bus: EventBus::new(),
            messenger,
            settings: config.session.clone(),
        };
        Self {
            ctx,
            identity,
            alarms,
            fired: Mutex::new(Some(fired)),
            transfer: config.transfer.clone(),
        }
    }

    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    pub fn alarms(&self) -> &Arc<TokioAlarms> {
        &self.alarms
    }

    /// Sweep cached secrets left over from a previous run, then start
    /// handling auto-forget alarms. Call once after construction.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let fired = self
            .fired
            .lock()
            .take()
            .ok_or_else(|| Error::Validation("already started".to_string()))?;

        let mut swept = 0;
        for device in self.ctx.devices.list().await {
            swept += self.ctx.cache.sweep(&device.uuid).await?;
        }
        tracing::info!(swept, "passlink started");
        Ok(tokio::spawn(self.ctx.cache.clone().run_alarms(fired)))
    }

    /// Session parameters for `device_uuid` with the configured chunk size.
    pub fn session_config(
        &self,
        device_uuid: impl Into<String>,
        local_hello: passlink_protocol::HelloPayload,
    ) -> SessionConfig {
        SessionConfig::new(device_uuid, local_hello)
            .with_max_chunk_size(self.transfer.max_chunk_size)
    }

    /// A driver for one connection. The session's chunk size is capped at
    /// the configured value.
    pub fn connect<T: FrameTransport>(
        &self,
        mut config: SessionConfig,
        transport: T,
    ) -> (SessionDriver<T>, DriverHandle) {
        config.max_chunk_size = config.max_chunk_size.min(self.transfer.max_chunk_size);
        let session = Session::new(self.identity.clone(), config);
        SessionDriver::new(session, transport, self.ctx.clone())
    }

    /// Forget a paired device and everything cached for it.
    pub async fn unpair(&self, device_uuid: &str) -> Result<bool> {
        self.ctx.cache.forget_device(device_uuid).await?;
        self.ctx.devices.remove(device_uuid).await
    }
}
