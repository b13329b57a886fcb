//! Cryptographic primitives for device pairing: the sealed AES-GCM byte
//! layout, the HKDF key chain, P-256 device identity and session
//! signatures, ephemeral ECDH and AES-KW key wrapping.

pub mod base64url;
pub mod codec;
pub mod ecdh;
pub mod error;
pub mod hkdf;
pub mod keys;
pub mod signing;
pub mod types;
pub mod wrap;

pub use base64url::{base64url_decode, base64url_encode};
pub use codec::{
    base64_decode, base64_encode, hex_decode, hex_encode, open, seal, seal_with_nonce,
    utf8_decode, utf8_encode, SealedBytes,
};
pub use ecdh::{parse_public_key, EphemeralKeyPair, SharedSecretMaterial};
pub use error::CryptoError;
pub use hkdf::{
    derive, derive_device_storage_key, derive_item_key, derive_session_key, hkdf_derive,
    DerivedKey, Extractable, KeyPurpose,
};
pub use keys::{ExtractableKey, SymmetricKey};
pub use signing::{
    compress_public_key, export_private_key_jwk, export_public_key_jwk, generate_p256_keypair,
    import_private_key_jwk, import_public_key_jwk, session_signing_message, sign, sign_session,
    verify, verify_session, StoredIdentity,
};
pub use types::*;
pub use wrap::{unwrap_key, wrap_key, WRAPPED_KEY_SIZE};
