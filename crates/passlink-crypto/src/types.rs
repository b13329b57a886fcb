/// AES-GCM nonce length in bytes (96 bits per NIST recommendation).
pub const NONCE_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Smallest valid sealed blob: nonce plus tag over an empty plaintext.
pub const MIN_SEALED_LENGTH: usize = NONCE_LENGTH + AES_GCM_TAG_LENGTH;

/// ECDSA P-256 signature length in IEEE P1363 form (r||s).
pub const SIGNATURE_LENGTH: usize = 64;

/// SEC1 compressed P-256 point length.
pub const COMPRESSED_POINT_LENGTH: usize = 33;

/// SEC1 uncompressed P-256 point length.
pub const UNCOMPRESSED_POINT_LENGTH: usize = 65;
