//! Ephemeral P-256 ECDH for session key agreement.
//!
//! One keypair is generated per session. Its public half travels as a
//! 65-byte uncompressed SEC1 point; the shared secret is the raw x-coordinate.

use std::fmt;

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::types::UNCOMPRESSED_POINT_LENGTH;

/// Raw ECDH output. Wiped when dropped.
pub type SharedSecretMaterial = Zeroizing<Vec<u8>>;

/// Parse a peer public key (compressed or uncompressed SEC1).
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| CryptoError::KeyAgreement("invalid P-256 public key".to_string()))
}

pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// 65-byte uncompressed encoding of the public half.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let bytes = self.public.to_encoded_point(false).as_bytes().to_vec();
        debug_assert_eq!(bytes.len(), UNCOMPRESSED_POINT_LENGTH);
        bytes
    }

    /// Agree on a shared secret with the peer's encoded public key.
    pub fn agree(&self, peer_public_key: &[u8]) -> Result<SharedSecretMaterial, CryptoError> {
        let peer = parse_public_key(peer_public_key)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &crate::codec::hex_encode(&self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}
