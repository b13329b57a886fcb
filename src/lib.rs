//! Browser-side pairing with a companion mobile app.
//!
//! The protocol itself lives in `passlink-protocol` and its primitives in
//! `passlink-crypto`. This crate adds what a running client needs around
//! them: the vault data model, host capabilities (storage, alarms,
//! messaging), the device registry, the tiered secret cache, an async
//! driver that runs a session over a socket and the [`Passlink`] root that
//! wires them from configuration.

pub mod alarms;
pub mod bus;
pub mod config;
pub mod devices;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod popup_state;
pub mod runtime;
pub mod secret_cache;
pub mod storage;
pub mod sync;

pub use alarms::{Alarms, TokioAlarms};
pub use bus::{EventBus, SessionEvent};
pub use config::{IdCollisionPolicy, LogFormat, PasslinkConfig};
pub use devices::DeviceRegistry;
pub use error::{CacheError, Error, Result, StorageError, TransportError, UserStatus};
pub use keystore::DeviceKeyStore;
pub use logging::init_logging;
pub use messaging::{ChannelMessenger, Messenger, RuntimeAction, RuntimeMessage, Target};
pub use model::{Device, Item, ItemSecrets, SecurityTier, Vault};
pub use popup_state::PopupStateStore;
pub use runtime::Passlink;
pub use secret_cache::{KeepPasswordState, SecretCache, SyncReport};
pub use storage::{MemoryStorage, Storage, StorageArea};
pub use sync::{ChannelTransport, DriverContext, DriverHandle, FrameTransport, SessionDriver};

pub use passlink_crypto as crypto;
pub use passlink_protocol as protocol;
