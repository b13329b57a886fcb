//! Pairing protocol: wire frames, the chunked transfer engine, pull-request
//! tracking and the per-connection session state machine.

pub mod chunk;
pub mod error;
pub mod frame;
pub mod pull;
pub mod session;

pub use chunk::{
    checksum, compress, decompress, open_payload, seal_payload, split_chunks, ChunkOutcome,
    InboundTransfer, OutboundTransfer, DEFAULT_MAX_CHUNK_SIZE, MAX_DECOMPRESSED_SIZE,
    MAX_TOTAL_CHUNKS,
};
pub use error::ProtocolError;
pub use frame::{
    ChallengePayload, ChallengeReply, ChunkConfirmedPayload, ClosePayload, Empty, Frame,
    HelloPayload, InitTransferPayload, SocketAction, TransferChunkPayload, VaultRef,
};
pub use pull::{
    PullOutcome, PullRequest, PullRequestAction, PullRequestCompleted, PullRequestKind,
    PullRequestTracker, PullStatus,
};
pub use session::{
    CloseReason, Direction, Effect, Event, Session, SessionConfig, SessionState,
};
