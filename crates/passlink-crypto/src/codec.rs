//! Byte codec: base64 / hex / UTF-8 conversions and the sealed AES-GCM layout.
//!
//! Sealed layout, shared by transport payloads, stored item secrets and
//! popup-state snapshots:
//! [12 bytes: nonce][N bytes: ciphertext + tag]

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64ct::{Base64, Encoding};

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, MIN_SEALED_LENGTH, NONCE_LENGTH};

/// Standard (padded) base64, used for storage and wire values.
pub fn base64_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Decode standard (padded) base64.
pub fn base64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Base64::decode_vec(s).map_err(|e| CryptoError::Base64Decode(e.to_string()))
}

/// Lowercase hex.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode hex (either case).
pub fn hex_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(hex::decode(s)?)
}

pub fn utf8_encode(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

pub fn utf8_decode(bytes: Vec<u8>) -> Result<String, CryptoError> {
    Ok(String::from_utf8(bytes)?)
}

/// Generate a random 12-byte AES-GCM nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; NONCE_LENGTH];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(nonce)
}

/// A sealed blob split into its nonce and ciphertext halves.
#[derive(Debug, Clone, Copy)]
pub struct SealedBytes<'a> {
    pub nonce: &'a [u8],
    pub ciphertext: &'a [u8],
}

impl<'a> SealedBytes<'a> {
    /// Slice a sealed blob: first 12 bytes are the nonce, the rest is
    /// ciphertext + tag.
    pub fn parse(blob: &'a [u8]) -> Result<Self, CryptoError> {
        if blob.len() < MIN_SEALED_LENGTH {
            return Err(CryptoError::DataTooShort {
                min: MIN_SEALED_LENGTH,
                got: blob.len(),
            });
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LENGTH);
        Ok(Self { nonce, ciphertext })
    }

    /// Concatenate back into the sealed layout.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.nonce.len() + self.ciphertext.len());
        out.extend_from_slice(self.nonce);
        out.extend_from_slice(self.ciphertext);
        out
    }
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Encrypt with an explicit nonce. Callers outside tests should use [`seal`].
pub fn seal_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(SealedBytes {
        nonce,
        ciphertext: &ciphertext,
    }
    .to_vec())
}

/// Encrypt `plaintext` under a 32-byte key with a fresh random nonce.
///
/// Returns: [nonce:12B][ciphertext+tag]
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce()?;
    seal_with_nonce(key, &nonce, plaintext)
}

/// Decrypt a sealed blob. Fails closed on a wrong key, truncation or tampering.
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let parts = SealedBytes::parse(sealed)?;
    cipher(key)?
        .decrypt(Nonce::from_slice(parts.nonce), parts.ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
