//! Chunked transfer engine.
//!
//! Pipeline (both directions):
//! 1. Serialize the payload to JSON
//! 2. gzip
//! 3. Seal with the session key: [nonce:12][ciphertext+tag]
//! 4. Split into fixed-size chunks, base64 on the wire
//!
//! Delivery is stop-and-wait: every chunk except the last is acknowledged
//! with its index before the sender moves on.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use passlink_crypto::{base64_encode, SymmetricKey};

use crate::error::ProtocolError;
use crate::frame::{InitTransferPayload, TransferChunkPayload};

/// Default chunk size (32KB).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 32 * 1024;

/// Upper bound on a decompressed payload.
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Upper bound on the chunk count a peer may announce.
pub const MAX_TOTAL_CHUNKS: u32 = 16 * 1024;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gunzip, refusing output larger than `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(ProtocolError::PayloadTooLarge { max: limit });
    }
    Ok(out)
}

/// JSON → gzip → seal.
pub fn seal_payload<T: Serialize + ?Sized>(
    value: &T,
    key: &SymmetricKey,
) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(value)?;
    Ok(key.seal(&compress(&json)?)?)
}

/// Open → gunzip → parse. Any failure aborts the whole payload.
pub fn open_payload<T: DeserializeOwned>(
    sealed: &[u8],
    key: &SymmetricKey,
) -> Result<T, ProtocolError> {
    let compressed = key.open(sealed)?;
    let json = decompress(&compressed, MAX_DECOMPRESSED_SIZE)?;
    serde_json::from_slice(&json).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

/// Lowercase hex SHA-256.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Split into chunks of at most `max_chunk_size` bytes. Always yields at
/// least one chunk.
pub fn split_chunks(data: &[u8], max_chunk_size: usize) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return vec![Vec::new()];
    }
    data.chunks(max_chunk_size.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}

// ============================================================================
// Sending
// ============================================================================

/// A sealed payload being streamed to the peer.
#[derive(Debug)]
pub struct OutboundTransfer {
    chunks: Vec<Vec<u8>>,
    checksum: String,
    request_id: Option<String>,
    /// Index of the last chunk handed out.
    sent: Option<u32>,
}

impl OutboundTransfer {
    pub fn new(sealed: &[u8], max_chunk_size: usize, request_id: Option<String>) -> Self {
        Self {
            chunks: split_chunks(sealed, max_chunk_size),
            checksum: checksum(sealed),
            request_id,
            sent: None,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn init_payload(&self) -> InitTransferPayload {
        InitTransferPayload {
            total_chunks: self.total_chunks(),
            sha256: Some(self.checksum.clone()),
            request_id: self.request_id.clone(),
        }
    }

    /// True once the final chunk has been handed out.
    pub fn all_sent(&self) -> bool {
        self.sent == Some(self.total_chunks() - 1)
    }

    fn chunk(&mut self, index: u32) -> TransferChunkPayload {
        self.sent = Some(index);
        TransferChunkPayload {
            chunk_index: index,
            data: base64_encode(&self.chunks[index as usize]),
        }
    }

    /// Chunk 0, sent once the receiver confirms `INIT_TRANSFER`.
    pub fn start(&mut self) -> Result<TransferChunkPayload, ProtocolError> {
        if let Some(sent) = self.sent {
            return Err(ProtocolError::DuplicateChunk(sent));
        }
        Ok(self.chunk(0))
    }

    /// Next chunk after the receiver acknowledged `index`.
    pub fn on_confirmed(&mut self, index: u32) -> Result<TransferChunkPayload, ProtocolError> {
        let total = self.total_chunks();
        match self.sent {
            Some(sent) if sent == index && index + 1 < total => Ok(self.chunk(index + 1)),
            Some(sent) if sent == index => Err(ProtocolError::ChunkOutOfRange { index, total }),
            Some(sent) => Err(ProtocolError::OutOfOrderChunk {
                expected: sent,
                got: index,
            }),
            None => Err(ProtocolError::OutOfOrderChunk {
                expected: 0,
                got: index,
            }),
        }
    }
}

// ============================================================================
// Receiving
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Non-final chunk buffered; confirm this index.
    Acknowledge(u32),
    /// Final chunk; the reassembled sealed payload.
    Complete(Vec<u8>),
}

/// Reassembly buffer for one inbound transfer. Indices must arrive
/// contiguously from 0; a rejected chunk leaves the buffer untouched.
#[derive(Debug)]
pub struct InboundTransfer {
    total_chunks: u32,
    checksum: Option<String>,
    request_id: Option<String>,
    chunks: Vec<Vec<u8>>,
}

impl InboundTransfer {
    pub fn new(init: &InitTransferPayload) -> Result<Self, ProtocolError> {
        if init.total_chunks == 0 || init.total_chunks > MAX_TOTAL_CHUNKS {
            return Err(ProtocolError::InvalidChunkCount(init.total_chunks));
        }
        Ok(Self {
            total_chunks: init.total_chunks,
            checksum: init.sha256.as_ref().map(|s| s.to_lowercase()),
            request_id: init.request_id.clone(),
            chunks: Vec::with_capacity(init.total_chunks as usize),
        })
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn next_expected_index(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn accept(&mut self, index: u32, bytes: Vec<u8>) -> Result<ChunkOutcome, ProtocolError> {
        let expected = self.next_expected_index();
        if index >= self.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        if index < expected {
            return Err(ProtocolError::DuplicateChunk(index));
        }
        if index > expected {
            return Err(ProtocolError::OutOfOrderChunk {
                expected,
                got: index,
            });
        }

        if index + 1 < self.total_chunks {
            self.chunks.push(bytes);
            return Ok(ChunkOutcome::Acknowledge(index));
        }

        let buffered: usize = self.chunks.iter().map(Vec::len).sum();
        let mut assembled = Vec::with_capacity(buffered + bytes.len());
        for chunk in &self.chunks {
            assembled.extend_from_slice(chunk);
        }
        assembled.extend_from_slice(&bytes);

        if let Some(expected) = &self.checksum {
            if &checksum(&assembled) != expected {
                return Err(ProtocolError::ChecksumMismatch);
            }
        }
        self.chunks.clear();
        Ok(ChunkOutcome::Complete(assembled))
    }
}
