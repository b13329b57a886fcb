use thiserror::Error;

/// Cryptographic failures.
///
/// Identity failures are split by sub-step (public key, private key import,
/// signing) so a broken stored identity can be diagnosed without the error
/// ever carrying key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Sealed data too short: need at least {min} bytes, got {got}")]
    DataTooShort { min: usize, got: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Public key error: {0}")]
    PublicKey(String),

    #[error("Private key import failed: {0}")]
    PrivateKeyImport(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AES-KW wrap failed: {0}")]
    WrapFailed(String),

    #[error("AES-KW unwrap failed: {0}")]
    UnwrapFailed(String),

    #[error("JWK missing {0}")]
    MissingJwkField(&'static str),

    #[error("Invalid JWK: {0}")]
    InvalidJwk(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
