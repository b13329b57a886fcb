//! Transport session state machine.
//!
//! ```text
//! Connecting --Opened--> AwaitingHello --HELLO--> AwaitingChallenge
//!     --CHALLENGE--> Ready <--> Transferring(Inbound | Outbound)
//! any state --close / disconnect / timeout--> Closed
//! ```
//!
//! [`Session::handle`] is the single transition function. It returns the
//! effects the caller must apply in order (frames to send, device upserts,
//! received payloads). On `Err` from a peer frame the session has already
//! moved to `Closed` and dropped its keys and buffers; the caller reports the
//! failure to the peer with [`Frame::close_with_error`]. A rejected local
//! command (`BeginSend`, `PullRequest`) leaves the session untouched: the
//! error goes back to whoever issued it.

use std::fmt;

use passlink_crypto::{
    base64_decode, base64_encode, derive_session_key, hex_encode, sign_session,
    EphemeralKeyPair, StoredIdentity, SymmetricKey,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::chunk::{
    open_payload, seal_payload, ChunkOutcome, InboundTransfer, OutboundTransfer,
    DEFAULT_MAX_CHUNK_SIZE,
};
use crate::error::ProtocolError;
use crate::frame::{
    ChallengePayload, ChallengeReply, ChunkConfirmedPayload, ClosePayload, Empty, Frame,
    HelloPayload, InitTransferPayload, SocketAction, TransferChunkPayload,
};
use crate::pull::{
    PullOutcome, PullRequest, PullRequestAction, PullRequestCompleted, PullRequestTracker,
    PullStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingHello,
    AwaitingChallenge,
    Ready,
    Transferring(Direction),
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => f.write_str("Connecting"),
            SessionState::AwaitingHello => f.write_str("AwaitingHello"),
            SessionState::AwaitingChallenge => f.write_str("AwaitingChallenge"),
            SessionState::Ready => f.write_str("Ready"),
            SessionState::Transferring(Direction::Inbound) => f.write_str("Transferring(Inbound)"),
            SessionState::Transferring(Direction::Outbound) => {
                f.write_str("Transferring(Outbound)")
            }
            SessionState::Closed => f.write_str("Closed"),
        }
    }
}

/// Per-connection parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stable local identity of the device record this connection updates.
    pub device_uuid: String,
    /// Peer device id from prior pairing. `None` accepts any id.
    pub expected_device_id: Option<String>,
    /// Session id the pairing invite was issued for, if any.
    pub expected_session_id: Option<String>,
    /// Metadata sent in our `HELLO` reply.
    pub local_hello: HelloPayload,
    pub max_chunk_size: usize,
}

impl SessionConfig {
    pub fn new(device_uuid: impl Into<String>, local_hello: HelloPayload) -> Self {
        Self {
            device_uuid: device_uuid.into(),
            expected_device_id: None,
            expected_session_id: None,
            local_hello,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    pub fn expect_device(mut self, device_id: impl Into<String>) -> Self {
        self.expected_device_id = Some(device_id.into());
        self
    }

    pub fn expect_session(mut self, session_id: impl Into<String>) -> Self {
        self.expected_session_id = Some(session_id.into());
        self
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }
}

#[derive(Debug)]
pub enum Event {
    /// The underlying socket opened.
    Opened,
    Frame(Frame),
    /// Stream a payload to the peer.
    BeginSend(Value),
    PullRequest(PullRequest),
    /// Local close; `success` selects the close frame.
    Close { success: bool },
    Disconnected,
    TimedOut,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Opened => "open",
            Event::Frame(_) => "frame",
            Event::BeginSend(_) => "begin_send",
            Event::PullRequest(_) => "pull_request",
            Event::Close { .. } => "close",
            Event::Disconnected => "disconnect",
            Event::TimedOut => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `CLOSE_WITH_SUCCESS`, from either side.
    Completed,
    /// Local close with an error.
    Aborted,
    PeerError { error_code: Option<String> },
    Disconnected,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Frame),
    /// Create or update the device record for the peer.
    UpsertDevice { uuid: String, hello: HelloPayload },
    /// A full inbound transfer, decrypted and parsed.
    PayloadReceived(Value),
    /// The peer confirmed our outbound transfer.
    TransferSent,
    PullRequestResolved {
        request: PullRequest,
        outcome: PullOutcome,
    },
    Closed(CloseReason),
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKeys {
    key: SymmetricKey,
    hkdf_salt: Vec<u8>,
}

pub struct Session {
    state: SessionState,
    identity: StoredIdentity,
    config: SessionConfig,
    keys: Option<SessionKeys>,
    session_id: Option<String>,
    peer_device_id: Option<String>,
    inbound: Option<InboundTransfer>,
    outbound: Option<OutboundTransfer>,
    pulls: PullRequestTracker,
}

impl Session {
    pub fn new(identity: StoredIdentity, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Connecting,
            identity,
            config,
            keys: None,
            session_id: None,
            peer_device_id: None,
            inbound: None,
            outbound: None,
            pulls: PullRequestTracker::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn peer_device_id(&self) -> Option<&str> {
        self.peer_device_id.as_deref()
    }

    pub fn device_uuid(&self) -> &str {
        &self.config.device_uuid
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn has_session_keys(&self) -> bool {
        self.keys.is_some()
    }

    pub fn hkdf_salt(&self) -> Option<&[u8]> {
        self.keys.as_ref().map(|k| k.hkdf_salt.as_slice())
    }

    pub fn pending_pull_requests(&self) -> usize {
        self.pulls.len()
    }

    /// `(next expected index, total)` of the inbound transfer in flight.
    pub fn inbound_progress(&self) -> Option<(u32, u32)> {
        self.inbound
            .as_ref()
            .map(|t| (t.next_expected_index(), t.total_chunks()))
    }

    /// Apply one event. Events on a closed session are ignored.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>, ProtocolError> {
        if self.is_closed() {
            debug!(event = event.name(), "ignoring event on closed session");
            return Ok(Vec::new());
        }

        let before = self.state;
        let local = matches!(event, Event::BeginSend(_) | Event::PullRequest(_));
        let result = self.transition(event);
        match &result {
            Err(e) if local => {
                warn!(state = %before, code = e.error_code(), "local command rejected: {}", e);
            }
            Err(e) => {
                warn!(state = %before, code = e.error_code(), "session failed: {}", e);
                self.teardown();
            }
            Ok(_) if self.state != before => {
                info!(from = %before, to = %self.state, "session state changed");
            }
            Ok(_) => {}
        }
        result
    }

    fn transition(&mut self, event: Event) -> Result<Vec<Effect>, ProtocolError> {
        match (self.state, event) {
            (_, Event::Disconnected) => Ok(self.close(CloseReason::Disconnected, None)),
            (_, Event::TimedOut) => {
                let frame = Frame::new(
                    SocketAction::CloseWithError,
                    &ClosePayload {
                        error_code: Some("TIMEOUT".to_string()),
                    },
                )?;
                Ok(self.close(CloseReason::TimedOut, Some(frame)))
            }
            (_, Event::Close { success }) => {
                let (action, reason) = if success {
                    (SocketAction::CloseWithSuccess, CloseReason::Completed)
                } else {
                    (SocketAction::CloseWithError, CloseReason::Aborted)
                };
                let frame = Frame::new(action, &Empty {})?;
                Ok(self.close(reason, Some(frame)))
            }
            (SessionState::Connecting, Event::Opened) => {
                self.state = SessionState::AwaitingHello;
                Ok(Vec::new())
            }
            (_, Event::Frame(frame)) => self.on_frame(frame),
            (SessionState::Ready, Event::BeginSend(payload)) => self.begin_send(&payload),
            (SessionState::Transferring(_), Event::BeginSend(_)) => {
                Err(ProtocolError::TransferActive)
            }
            (SessionState::Ready, Event::PullRequest(request)) => self.begin_pull(request),
            (state, event) => Err(ProtocolError::UnexpectedEvent {
                event: event.name(),
                state,
            }),
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Result<Vec<Effect>, ProtocolError> {
        use SessionState::*;
        debug!(id = %frame.id, action = %frame.action, state = %self.state, "inbound frame");

        match (self.state, frame.action) {
            (_, SocketAction::CloseWithSuccess) => Ok(self.close(CloseReason::Completed, None)),
            (_, SocketAction::CloseWithError) => {
                let payload: ClosePayload = frame.parse_payload().unwrap_or_default();
                Ok(self.close(
                    CloseReason::PeerError {
                        error_code: payload.error_code,
                    },
                    None,
                ))
            }
            (AwaitingHello, SocketAction::Hello) => self.on_hello(&frame),
            (AwaitingChallenge, SocketAction::Challenge) => self.on_challenge(&frame),
            (Ready, SocketAction::InitTransfer) => self.on_init_transfer(&frame),
            (Transferring(_), SocketAction::InitTransfer) => Err(ProtocolError::TransferActive),
            (Transferring(Direction::Inbound), SocketAction::TransferChunk) => {
                self.on_chunk(&frame)
            }
            (Transferring(Direction::Outbound), SocketAction::InitTransferConfirmed) => {
                let chunk = self.outbound_mut()?.start()?;
                Ok(vec![Effect::Send(frame.reply(SocketAction::TransferChunk, &chunk)?)])
            }
            (Transferring(Direction::Outbound), SocketAction::TransferChunkConfirmed) => {
                let confirmed: ChunkConfirmedPayload = frame.parse_payload()?;
                let chunk = self.outbound_mut()?.on_confirmed(confirmed.chunk_index)?;
                Ok(vec![Effect::Send(frame.reply(SocketAction::TransferChunk, &chunk)?)])
            }
            (Transferring(Direction::Outbound), SocketAction::TransferCompleted) => {
                if !self.outbound_mut()?.all_sent() {
                    return Err(ProtocolError::UnexpectedFrame {
                        action: frame.action,
                        state: self.state,
                    });
                }
                self.outbound = None;
                self.state = Ready;
                info!("outbound transfer completed");
                Ok(vec![Effect::TransferSent])
            }
            (Ready | Transferring(_), SocketAction::PullRequestAction) => {
                self.on_pull_action(&frame)
            }
            (Ready | Transferring(_), SocketAction::PullRequestCompleted) => {
                let completed: PullRequestCompleted = frame.parse_payload()?;
                let request = self.pulls.resolve(&completed.request_id)?;
                Ok(vec![Effect::PullRequestResolved {
                    request,
                    outcome: PullOutcome::Completed,
                }])
            }
            (state, action) => Err(ProtocolError::UnexpectedFrame { action, state }),
        }
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    fn on_hello(&mut self, frame: &Frame) -> Result<Vec<Effect>, ProtocolError> {
        let hello: HelloPayload = frame.parse_payload()?;
        if let Some(expected) = &self.config.expected_device_id {
            if expected != &hello.device_id {
                return Err(ProtocolError::DeviceMismatch {
                    expected: expected.clone(),
                    declared: hello.device_id,
                });
            }
        }

        let reply = frame.reply(SocketAction::Hello, &self.config.local_hello)?;
        self.peer_device_id = Some(hello.device_id.clone());
        self.state = SessionState::AwaitingChallenge;
        Ok(vec![
            Effect::UpsertDevice {
                uuid: self.config.device_uuid.clone(),
                hello,
            },
            Effect::Send(reply),
        ])
    }

    fn on_challenge(&mut self, frame: &Frame) -> Result<Vec<Effect>, ProtocolError> {
        let challenge: ChallengePayload = frame.parse_payload()?;
        if let Some(expected) = &self.config.expected_session_id {
            if expected != &challenge.session_id {
                return Err(ProtocolError::SessionMismatch {
                    expected: expected.clone(),
                    declared: challenge.session_id,
                });
            }
        }

        let peer_public_key = base64_decode(&challenge.public_key)?;
        let hkdf_salt = base64_decode(&challenge.hkdf_salt)?;
        let signature = sign_session(&self.identity, &peer_public_key, &challenge.session_id)?;

        let ephemeral = EphemeralKeyPair::generate();
        let shared = ephemeral.agree(&peer_public_key)?;
        let key = derive_session_key(&hkdf_salt, &shared)?;

        let reply = frame.reply(
            SocketAction::Challenge,
            &ChallengeReply {
                signature: hex_encode(&signature),
                public_key: base64_encode(&ephemeral.public_key_bytes()),
            },
        )?;

        self.keys = Some(SessionKeys { key, hkdf_salt });
        self.session_id = Some(challenge.session_id);
        self.state = SessionState::Ready;
        Ok(vec![Effect::Send(reply)])
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    fn session_key(&self) -> Result<&SymmetricKey, ProtocolError> {
        self.keys
            .as_ref()
            .map(|k| &k.key)
            .ok_or(ProtocolError::NoSessionKeys)
    }

    fn outbound_mut(&mut self) -> Result<&mut OutboundTransfer, ProtocolError> {
        let state = self.state;
        self.outbound
            .as_mut()
            .ok_or(ProtocolError::UnexpectedEvent {
                event: "outbound transfer frame",
                state,
            })
    }

    fn on_init_transfer(&mut self, frame: &Frame) -> Result<Vec<Effect>, ProtocolError> {
        let init: InitTransferPayload = frame.parse_payload()?;
        if let Some(request_id) = &init.request_id {
            if !self.pulls.is_awaiting_transfer(request_id) {
                return Err(ProtocolError::UnknownPullRequest(request_id.clone()));
            }
        }

        self.inbound = Some(InboundTransfer::new(&init)?);
        self.state = SessionState::Transferring(Direction::Inbound);
        info!(
            total_chunks = init.total_chunks,
            request_id = init.request_id.as_deref().unwrap_or("-"),
            "inbound transfer started"
        );
        Ok(vec![Effect::Send(
            frame.reply(SocketAction::InitTransferConfirmed, &Empty {})?,
        )])
    }

    fn on_chunk(&mut self, frame: &Frame) -> Result<Vec<Effect>, ProtocolError> {
        let chunk: TransferChunkPayload = frame.parse_payload()?;
        let bytes = base64_decode(&chunk.data)?;
        let state = self.state;
        let inbound = self
            .inbound
            .as_mut()
            .ok_or(ProtocolError::UnexpectedFrame {
                action: frame.action,
                state,
            })?;

        let request_id = inbound.request_id().map(str::to_string);
        let sealed = match inbound.accept(chunk.chunk_index, bytes)? {
            ChunkOutcome::Acknowledge(index) => {
                debug!(chunk_index = index, "chunk buffered");
                return Ok(vec![Effect::Send(frame.reply(
                    SocketAction::TransferChunkConfirmed,
                    &ChunkConfirmedPayload { chunk_index: index },
                )?)]);
            }
            ChunkOutcome::Complete(sealed) => sealed,
        };

        let payload: Value = open_payload(&sealed, self.session_key()?)?;
        self.inbound = None;
        self.state = SessionState::Ready;
        info!(bytes = sealed.len(), "inbound transfer completed");

        let completed = Effect::Send(frame.reply(SocketAction::TransferCompleted, &Empty {})?);
        match request_id {
            Some(request_id) => {
                let request = self.pulls.resolve(&request_id)?;
                Ok(vec![
                    Effect::PullRequestResolved {
                        request,
                        outcome: PullOutcome::Data(payload),
                    },
                    completed,
                    Effect::Send(Frame::new(
                        SocketAction::PullRequestCompleted,
                        &PullRequestCompleted { request_id },
                    )?),
                ])
            }
            None => Ok(vec![Effect::PayloadReceived(payload), completed]),
        }
    }

    fn begin_send(&mut self, payload: &Value) -> Result<Vec<Effect>, ProtocolError> {
        let sealed = seal_payload(payload, self.session_key()?)?;
        let outbound = OutboundTransfer::new(&sealed, self.config.max_chunk_size, None);
        let frame = Frame::new(SocketAction::InitTransfer, &outbound.init_payload())?;
        info!(total_chunks = outbound.total_chunks(), "outbound transfer started");
        self.outbound = Some(outbound);
        self.state = SessionState::Transferring(Direction::Outbound);
        Ok(vec![Effect::Send(frame)])
    }

    // ========================================================================
    // Pull requests
    // ========================================================================

    fn begin_pull(&mut self, request: PullRequest) -> Result<Vec<Effect>, ProtocolError> {
        let frame = Frame::with_id(
            request.request_id.clone(),
            SocketAction::PullRequest,
            &request,
        )?;
        self.pulls.begin(request)?;
        Ok(vec![Effect::Send(frame)])
    }

    fn on_pull_action(&mut self, frame: &Frame) -> Result<Vec<Effect>, ProtocolError> {
        let action: PullRequestAction = frame.parse_payload()?;
        if self.pulls.get(&action.request_id).is_none() {
            return Err(ProtocolError::UnknownPullRequest(action.request_id));
        }

        let outcome = match (action.status, &action.data) {
            (PullStatus::Cancel, _) => PullOutcome::Cancelled,
            (PullStatus::Accept, Some(data)) => {
                let sealed = base64_decode(data)?;
                PullOutcome::Data(open_payload(&sealed, self.session_key()?)?)
            }
            (PullStatus::Accept, None) => {
                self.pulls.await_transfer(&action.request_id)?;
                debug!(request_id = %action.request_id, "pull response follows as transfer");
                return Ok(Vec::new());
            }
        };

        let request = self.pulls.resolve(&action.request_id)?;
        let reply = frame.reply(
            SocketAction::PullRequestCompleted,
            &PullRequestCompleted {
                request_id: action.request_id,
            },
        )?;
        Ok(vec![
            Effect::PullRequestResolved { request, outcome },
            Effect::Send(reply),
        ])
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn close(&mut self, reason: CloseReason, frame: Option<Frame>) -> Vec<Effect> {
        self.teardown();
        info!(reason = ?reason, "session closed");
        let mut effects = Vec::with_capacity(2);
        if let Some(frame) = frame {
            effects.push(Effect::Send(frame));
        }
        effects.push(Effect::Closed(reason));
        effects
    }

    /// Release keys and buffers. Safe to call more than once.
    fn teardown(&mut self) {
        self.state = SessionState::Closed;
        self.keys = None;
        self.inbound = None;
        self.outbound = None;
        let abandoned = self.pulls.drain();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "dropping outstanding pull requests");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("peer_device_id", &self.peer_device_id)
            .field("has_keys", &self.keys.is_some())
            .field("pending_pull_requests", &self.pulls.len())
            .finish()
    }
}
