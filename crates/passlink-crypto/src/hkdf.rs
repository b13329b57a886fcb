//! HKDF-SHA256 key derivation chain.
//!
//! Every purpose extracts with its own namespaced salt, then expands to a
//! 256-bit AES-GCM key:
//!
//! session      salt = "passlink:session:v1\0" || hkdfSalt
//! device       salt = "passlink:device-storage:v1\0" || deviceId
//! item cache   salt = "passlink:item-cache:v1\0" || deviceId || "\0" || itemId
//!              (input keying material is fresh random bytes per reveal)

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{ExtractableKey, SymmetricKey};
use crate::types::AES_KEY_LENGTH;

const SESSION_SALT_PREFIX: &[u8] = b"passlink:session:v1\0";
const DEVICE_STORAGE_SALT_PREFIX: &[u8] = b"passlink:device-storage:v1\0";
const ITEM_CACHE_SALT_PREFIX: &[u8] = b"passlink:item-cache:v1\0";
const AES_GCM_KEY_INFO: &[u8] = b"passlink:aes-256-gcm:v1";

/// Derive a 256-bit key using HKDF-SHA256.
///
/// # Arguments
/// * `ikm` - Input keying material
/// * `salt` - Salt for domain separation
/// * `info` - Context and application-specific info
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// What a derived key is for. Each purpose maps to a distinct salt namespace.
#[derive(Debug, Clone, Copy)]
pub enum KeyPurpose<'a> {
    /// Transport key for one connection, salted with the peer's HKDF salt.
    Session { hkdf_salt: &'a [u8] },
    /// Long-lived key for the item list persisted for one device.
    DeviceStorage { device_id: &'a str },
    /// Short-lived key protecting one item's revealed secret.
    ItemCache { device_id: &'a str, item_id: &'a str },
}

impl KeyPurpose<'_> {
    pub fn salt(&self) -> Vec<u8> {
        match self {
            KeyPurpose::Session { hkdf_salt } => [SESSION_SALT_PREFIX, *hkdf_salt].concat(),
            KeyPurpose::DeviceStorage { device_id } => {
                [DEVICE_STORAGE_SALT_PREFIX, device_id.as_bytes()].concat()
            }
            KeyPurpose::ItemCache { device_id, item_id } => [
                ITEM_CACHE_SALT_PREFIX,
                device_id.as_bytes(),
                &[0u8][..],
                item_id.as_bytes(),
            ]
            .concat(),
        }
    }
}

/// Whether the derived key may later be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractable {
    Yes,
    No,
}

/// Output of [`derive`].
#[derive(Debug)]
pub enum DerivedKey {
    Opaque(SymmetricKey),
    Extractable(ExtractableKey),
}

impl DerivedKey {
    pub fn into_opaque(self) -> SymmetricKey {
        match self {
            DerivedKey::Opaque(key) => key,
            DerivedKey::Extractable(key) => key.into_opaque(),
        }
    }

    /// The extractable key, or `None` if it was derived opaque.
    pub fn into_extractable(self) -> Option<ExtractableKey> {
        match self {
            DerivedKey::Opaque(_) => None,
            DerivedKey::Extractable(key) => Some(key),
        }
    }
}

/// Extract-then-expand `shared_secret` into an AES-256-GCM key bound to `purpose`.
pub fn derive(
    purpose: &KeyPurpose<'_>,
    shared_secret: &[u8],
    extractable: Extractable,
) -> Result<DerivedKey, CryptoError> {
    if shared_secret.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "empty input keying material".to_string(),
        ));
    }
    let mut okm = hkdf_derive(shared_secret, &purpose.salt(), AES_GCM_KEY_INFO)?;
    let key = match extractable {
        Extractable::No => DerivedKey::Opaque(SymmetricKey::from_array(okm)),
        Extractable::Yes => DerivedKey::Extractable(ExtractableKey::from_bytes(&okm)?),
    };
    okm.zeroize();
    Ok(key)
}

/// Session transport key. Never extractable.
pub fn derive_session_key(
    hkdf_salt: &[u8],
    shared_secret: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    Ok(derive(&KeyPurpose::Session { hkdf_salt }, shared_secret, Extractable::No)?.into_opaque())
}

/// Device-bound storage key. Extractable so it can be wrapped and persisted.
pub fn derive_device_storage_key(
    device_id: &str,
    shared_secret: &[u8],
) -> Result<ExtractableKey, CryptoError> {
    derive(
        &KeyPurpose::DeviceStorage { device_id },
        shared_secret,
        Extractable::Yes,
    )?
    .into_extractable()
    .ok_or_else(|| CryptoError::KeyDerivation("expected extractable key".to_string()))
}

/// Per-item cache key.
///
/// `ikm` must be fresh random material generated for this reveal. Nothing
/// persisted can reproduce the key, so erasing it revokes the cached value.
pub fn derive_item_key(
    ikm: &[u8],
    device_id: &str,
    item_id: &str,
) -> Result<ExtractableKey, CryptoError> {
    derive(
        &KeyPurpose::ItemCache { device_id, item_id },
        ikm,
        Extractable::Yes,
    )?
    .into_extractable()
    .ok_or_else(|| CryptoError::KeyDerivation("expected extractable key".to_string()))
}
