//! AES-KW (RFC 3394) wrapping of extractable keys.
//!
//! Device storage keys are derived extractable and immediately wrapped
//! under the local wrapping key before they touch durable storage.
//!
//! Wrapped key format: AES-KW(KEK, key) = 40 bytes

use aes_kw::Kek;

use crate::error::CryptoError;
use crate::keys::ExtractableKey;
use crate::types::AES_KEY_LENGTH;

/// AES-KW output size for a 32-byte key: 32 + 8 = 40 bytes.
pub const WRAPPED_KEY_SIZE: usize = 40;

/// Wrap `key` under `kek`.
pub fn wrap_key(
    key: &ExtractableKey,
    kek: &ExtractableKey,
) -> Result<[u8; WRAPPED_KEY_SIZE], CryptoError> {
    let kek = Kek::from(*kek.as_bytes());
    let mut wrapped = [0u8; WRAPPED_KEY_SIZE];
    kek.wrap(key.as_bytes(), &mut wrapped)
        .map_err(|e| CryptoError::WrapFailed(format!("{:?}", e)))?;
    Ok(wrapped)
}

/// Unwrap a 40-byte AES-KW blob. A wrong KEK fails the integrity check.
pub fn unwrap_key(wrapped: &[u8], kek: &ExtractableKey) -> Result<ExtractableKey, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(CryptoError::UnwrapFailed(format!(
            "expected {} bytes, got {}",
            WRAPPED_KEY_SIZE,
            wrapped.len()
        )));
    }
    let kek = Kek::from(*kek.as_bytes());
    let mut key = [0u8; AES_KEY_LENGTH];
    kek.unwrap(wrapped, &mut key)
        .map_err(|e| CryptoError::UnwrapFailed(format!("{:?}", e)))?;
    let result = ExtractableKey::from_bytes(&key);
    zeroize::Zeroize::zeroize(&mut key);
    result
}
