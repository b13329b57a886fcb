//! ECDSA P-256 device identity and session signatures.
//!
//! Produces IEEE P1363 format signatures (raw r||s, 64 bytes).
//!
//! Session signature message:
//! lowercase(sessionId || hex(compressed persistent public key) || hex(ephemeral public key))

use std::fmt;

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base64url::{base64url_decode, base64url_encode};
use crate::codec::hex_encode;
use crate::error::CryptoError;
use crate::types::{COMPRESSED_POINT_LENGTH, SIGNATURE_LENGTH};

/// Sign a message with ECDSA P-256 + SHA-256.
///
/// # Returns
/// 64-byte IEEE P1363 signature (r||s)
pub fn sign(private_key: &SigningKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signature: Signature = private_key
        .try_sign(message)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(signature.to_bytes().to_vec())
}

/// Verify an ECDSA P-256 + SHA-256 signature.
///
/// Returns false for a malformed key or signature; never errors.
pub fn verify(public_key_jwk: &Value, message: &[u8], signature_bytes: &[u8]) -> bool {
    (|| -> Result<bool, CryptoError> {
        let verifying_key = import_public_key_jwk(public_key_jwk)?;
        let signature = Signature::from_slice(signature_bytes)
            .map_err(|e| CryptoError::InvalidJwk(e.to_string()))?;
        Ok(verifying_key.verify(message, &signature).is_ok())
    })()
    .unwrap_or(false)
}

/// Decode a base64url JWK coordinate and left-pad it to 32 bytes.
fn jwk_coordinate(jwk: &Value, field: &'static str) -> Result<Vec<u8>, CryptoError> {
    let encoded = jwk
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or(CryptoError::MissingJwkField(field))?;
    let mut bytes = base64url_decode(encoded)
        .map_err(|e| CryptoError::InvalidJwk(format!("{}: {}", field, e)))?;
    if bytes.len() > 32 {
        return Err(CryptoError::InvalidJwk(format!("{}: coordinate too long", field)));
    }
    if bytes.len() < 32 {
        let mut padded = vec![0u8; 32 - bytes.len()];
        padded.append(&mut bytes);
        bytes = padded;
    }
    Ok(bytes)
}

/// Import a P-256 public key from JWK format.
pub fn import_public_key_jwk(jwk: &Value) -> Result<VerifyingKey, CryptoError> {
    let x = jwk_coordinate(jwk, "x")?;
    let y = jwk_coordinate(jwk, "y")?;

    // SEC1 uncompressed point: 0x04 || x || y
    let mut uncompressed = Vec::with_capacity(1 + 32 + 32);
    uncompressed.push(0x04);
    uncompressed.extend_from_slice(&x);
    uncompressed.extend_from_slice(&y);

    VerifyingKey::from_sec1_bytes(&uncompressed)
        .map_err(|e| CryptoError::InvalidJwk(format!("P-256 point: {}", e)))
}

/// Export a P-256 verifying key to JWK format.
pub fn export_public_key_jwk(key: &VerifyingKey) -> Value {
    let point = key.to_encoded_point(false);
    let x = point.x().map(|x| base64url_encode(x)).unwrap_or_default();
    let y = point.y().map(|y| base64url_encode(y)).unwrap_or_default();

    serde_json::json!({
        "kty": "EC",
        "crv": "P-256",
        "x": x,
        "y": y,
    })
}

/// Export a P-256 signing key (private) to JWK format.
pub fn export_private_key_jwk(key: &SigningKey) -> Value {
    let mut jwk = export_public_key_jwk(key.verifying_key());
    let mut scalar_bytes = key.to_bytes().to_vec();
    let d = base64url_encode(&scalar_bytes);
    zeroize::Zeroize::zeroize(&mut scalar_bytes);
    jwk["d"] = Value::String(d);
    jwk
}

/// Import a P-256 private key from JWK format.
pub fn import_private_key_jwk(jwk: &Value) -> Result<SigningKey, CryptoError> {
    let mut d = jwk_coordinate(jwk, "d")?;
    let key = SigningKey::from_bytes(d.as_slice().into())
        .map_err(|e| CryptoError::InvalidJwk(format!("P-256 scalar: {}", e)));
    zeroize::Zeroize::zeroize(&mut d);
    key
}

/// Generate a new P-256 signing key pair.
pub fn generate_p256_keypair() -> SigningKey {
    SigningKey::random(&mut p256::elliptic_curve::rand_core::OsRng)
}

/// 33-byte SEC1 compressed encoding of a public key.
pub fn compress_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// The persistent device keypair, in the JWK form it is stored in.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub public_key_jwk: Value,
    pub private_key_jwk: Value,
}

impl StoredIdentity {
    /// Create a fresh persistent identity.
    pub fn generate() -> Self {
        let key = generate_p256_keypair();
        Self {
            public_key_jwk: export_public_key_jwk(key.verifying_key()),
            private_key_jwk: export_private_key_jwk(&key),
        }
    }

    /// Compressed persistent public key, as advertised to the peer.
    pub fn compressed_public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let key = import_public_key_jwk(&self.public_key_jwk)
            .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
        Ok(compress_public_key(&key))
    }
}

impl fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("public_key_jwk", &self.public_key_jwk)
            .field("private_key_jwk", &"<redacted>")
            .finish()
    }
}

/// Build the message bound by a session signature.
pub fn session_signing_message(
    session_id: &str,
    compressed_public_key: &[u8],
    ephemeral_public_key: &[u8],
) -> Vec<u8> {
    format!(
        "{}{}{}",
        session_id,
        hex_encode(compressed_public_key),
        hex_encode(ephemeral_public_key)
    )
    .to_lowercase()
    .into_bytes()
}

/// Sign `(session_id, ephemeral_public_key)` with the persistent identity.
///
/// Each sub-step fails with its own error: the stored public key
/// (`PublicKey`), the stored private key (`PrivateKeyImport`), and the
/// signature itself (`SigningFailed`).
pub fn sign_session(
    identity: &StoredIdentity,
    ephemeral_public_key: &[u8],
    session_id: &str,
) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
    let public_key = import_public_key_jwk(&identity.public_key_jwk)
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
    let compressed = compress_public_key(&public_key);
    if compressed.len() != COMPRESSED_POINT_LENGTH {
        return Err(CryptoError::PublicKey(format!(
            "compressed point is {} bytes",
            compressed.len()
        )));
    }

    let private_key = import_private_key_jwk(&identity.private_key_jwk)
        .map_err(|e| CryptoError::PrivateKeyImport(e.to_string()))?;
    if private_key.verifying_key() != &public_key {
        return Err(CryptoError::PrivateKeyImport(
            "private key does not match stored public key".to_string(),
        ));
    }

    let message = session_signing_message(session_id, &compressed, ephemeral_public_key);
    let signature = sign(&private_key, &message)?;
    signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::SigningFailed("unexpected signature length".to_string()))
}

/// Verify a session signature against a JWK public key.
pub fn verify_session(
    public_key_jwk: &Value,
    ephemeral_public_key: &[u8],
    session_id: &str,
    signature: &[u8],
) -> bool {
    let Ok(public_key) = import_public_key_jwk(public_key_jwk) else {
        return false;
    };
    let message =
        session_signing_message(session_id, &compress_public_key(&public_key), ephemeral_public_key);
    verify(public_key_jwk, &message, signature)
}
