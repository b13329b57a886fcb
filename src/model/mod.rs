//! Vault data model: devices, vaults, tagged items and security tiers.

pub mod device;
pub mod item;
pub mod vault;

pub use device::Device;
pub use item::{
    Item, ItemMeta, ItemSecrets, Login, LoginContent, PaymentCard, PaymentCardContent,
    SecureNote, SecureNoteContent, SecurityTier,
};
pub use passlink_protocol::VaultRef;
pub use vault::{merge_items, Tag, Vault};
