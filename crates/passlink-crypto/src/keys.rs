//! Symmetric key handles.
//!
//! `SymmetricKey` never hands out its bytes; it can only seal and open.
//! `ExtractableKey` additionally exposes its bytes so it can be wrapped or
//! written to session storage. Both are zeroized on drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{base64_decode, base64_encode, open, seal};
use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

fn to_array(bytes: &[u8]) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: AES_KEY_LENGTH,
        got: bytes.len(),
    })
}

/// Non-extractable AES-256-GCM key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; AES_KEY_LENGTH],
}

impl SymmetricKey {
    pub(crate) fn from_array(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Encrypt into the sealed layout.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.bytes, plaintext)
    }

    /// Decrypt a sealed blob.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.bytes, sealed)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// AES-256-GCM key whose raw bytes may be exported for wrapping or storage.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ExtractableKey {
    bytes: [u8; AES_KEY_LENGTH],
}

impl ExtractableKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            bytes: to_array(bytes)?,
        })
    }

    /// Generate a random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; AES_KEY_LENGTH];
        getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        base64_encode(&self.bytes)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let mut raw = base64_decode(s)?;
        let key = Self::from_bytes(&raw);
        raw.zeroize();
        key
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.bytes, plaintext)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.bytes, sealed)
    }

    /// Drop the ability to export the bytes.
    pub fn into_opaque(self) -> SymmetricKey {
        SymmetricKey::from_array(self.bytes)
    }
}

impl fmt::Debug for ExtractableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtractableKey(..)")
    }
}
