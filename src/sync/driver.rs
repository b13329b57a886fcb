//! Drives one `Session` over a `FrameTransport`.
//!
//! The driver owns the session and processes one input at a time: an
//! inbound frame, a local command, or a deadline. Effects the session asks
//! for are applied in order before the next input is read.
//!
//! Sends and pulls issued while the session is not `Ready` wait in a queue
//! and run once it is. A command the session rejects is answered to its
//! issuer and never closes the connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use passlink_protocol::{
    CloseReason, Effect, Event, Frame, ProtocolError, PullOutcome, PullRequest, PullRequestKind,
    Session, SessionState,
};

use super::transport::FrameTransport;
use crate::bus::{EventBus, SessionEvent};
use crate::config::SessionSettings;
use crate::devices::DeviceRegistry;
use crate::error::{Error, Result, TransportError, UserStatus};
use crate::keystore::DeviceKeyStore;
use crate::messaging::{Messenger, RuntimeAction, RuntimeMessage, Target};
use crate::model::{Item, Vault};
use crate::secret_cache::SecretCache;

/// Shared services a driver applies effects against.
#[derive(Clone)]
pub struct DriverContext {
    pub devices: Arc<DeviceRegistry>,
    pub keystore: Arc<DeviceKeyStore>,
    pub cache: Arc<SecretCache>,
    pub bus: EventBus,
    pub messenger: Arc<dyn Messenger>,
    pub settings: SessionSettings,
}

enum Command {
    Send(Value),
    Pull(PullRequest, PullWaiter),
    Close { success: bool },
}

type PullWaiter = oneshot::Sender<Result<PullOutcome>>;

/// Cloneable handle for issuing commands to a running driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send(_) => f.write_str("Send(..)"),
            Command::Pull(request, _) => write!(f, "Pull({})", request.request_id),
            Command::Close { success } => write!(f, "Close {{ success: {success} }}"),
        }
    }
}

impl DriverHandle {
    /// Stream `payload` to the peer as an outbound transfer.
    pub fn send_payload(&self, payload: Value) -> Result<()> {
        self.command(Command::Send(payload))
    }

    /// Issue a pull request and wait for its outcome. Resolves to
    /// `Aborted` if the session ends first. Fails without affecting the
    /// session if the request id is already pending or the session refuses
    /// the request.
    pub async fn pull(&self, request: PullRequest) -> Result<PullOutcome> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Pull(request, tx))?;
        rx.await.unwrap_or(Ok(PullOutcome::Aborted))
    }

    pub fn close(&self, success: bool) -> Result<()> {
        self.command(Command::Close { success })
    }

    fn command(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| TransportError::Closed.into())
    }
}

enum Input {
    Frame(Result<Option<Frame>>),
    Command(Command),
    Deadline,
}

pub struct SessionDriver<T: FrameTransport> {
    session: Session,
    transport: T,
    ctx: DriverContext,
    commands: mpsc::UnboundedReceiver<Command>,
    deferred: VecDeque<Command>,
    waiters: HashMap<String, PullWaiter>,
}

impl<T: FrameTransport> SessionDriver<T> {
    pub fn new(session: Session, transport: T, ctx: DriverContext) -> (Self, DriverHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        (
            Self {
                session,
                transport,
                ctx,
                commands,
                deferred: VecDeque::new(),
                waiters: HashMap::new(),
            },
            DriverHandle { tx },
        )
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the session closes.
    ///
    /// Returns the close reason on an orderly close. Protocol violations,
    /// failures applying an effect and timeouts end the session and come
    /// back as errors.
    pub async fn run(mut self) -> Result<CloseReason> {
        let handshake_deadline = Instant::now() + self.ctx.settings.handshake_timeout();
        if let Some(reason) = self.step(Event::Opened, None).await? {
            return Ok(reason);
        }

        loop {
            if let Some(reason) = self.drain_deferred().await? {
                return Ok(reason);
            }
            let in_handshake = matches!(
                self.session.state(),
                SessionState::Connecting
                    | SessionState::AwaitingHello
                    | SessionState::AwaitingChallenge
            );
            let deadline = if in_handshake {
                handshake_deadline
            } else {
                Instant::now() + self.ctx.settings.idle_timeout()
            };

            let input = tokio::select! {
                frame = self.transport.recv() => Input::Frame(frame),
                Some(command) = self.commands.recv() => Input::Command(command),
                _ = tokio::time::sleep_until(deadline) => Input::Deadline,
            };

            let (event, reply_to) = match input {
                Input::Frame(Ok(Some(frame))) => {
                    let id = frame.id.clone();
                    (Event::Frame(frame), Some(id))
                }
                Input::Frame(Ok(None)) => (Event::Disconnected, None),
                Input::Frame(Err(Error::Protocol(e))) => {
                    // Unparseable frame: tear the session down, then report.
                    let _ = self.session.handle(Event::Disconnected);
                    return Err(self.fail(None, e).await);
                }
                Input::Frame(Err(e)) => {
                    tracing::warn!(error = %e, "transport failed");
                    (Event::Disconnected, None)
                }
                Input::Command(command) => {
                    if let Some(reason) = self.on_command(command).await? {
                        return Ok(reason);
                    }
                    continue;
                }
                Input::Deadline => {
                    let phase = if in_handshake { "handshake" } else { "idle" };
                    tracing::warn!(phase, "session timed out");
                    self.step(Event::TimedOut, None).await?;
                    return Err(Error::Timeout(phase));
                }
            };

            if let Some(reason) = self.step(event, reply_to).await? {
                return Ok(reason);
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<Option<CloseReason>> {
        match command {
            Command::Pull(request, waiter) if self.pull_pending(&request.request_id) => {
                tracing::warn!(request_id = %request.request_id, "duplicate pull request id");
                let _ = waiter.send(Err(Error::Validation(format!(
                    "pull request {} is already pending",
                    request.request_id
                ))));
                Ok(None)
            }
            Command::Close { success } => self.step(Event::Close { success }, None).await,
            command if self.session.state() == SessionState::Ready => self.local(command).await,
            command => {
                tracing::debug!(?command, state = %self.session.state(), "deferring command");
                self.deferred.push_back(command);
                Ok(None)
            }
        }
    }

    fn pull_pending(&self, request_id: &str) -> bool {
        self.waiters.contains_key(request_id)
            || self.deferred.iter().any(
                |command| matches!(command, Command::Pull(request, _) if request.request_id == request_id),
            )
    }

    /// Run queued commands while the session stays `Ready`.
    async fn drain_deferred(&mut self) -> Result<Option<CloseReason>> {
        while self.session.state() == SessionState::Ready {
            let Some(command) = self.deferred.pop_front() else {
                break;
            };
            if let Some(reason) = self.local(command).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Feed a local send or pull. A rejection is answered to the issuer and
    /// the session carries on.
    async fn local(&mut self, command: Command) -> Result<Option<CloseReason>> {
        let before = self.session.state();
        let (event, waiter) = match command {
            Command::Send(payload) => (Event::BeginSend(payload), None),
            Command::Pull(request, waiter) => {
                let request_id = request.request_id.clone();
                (Event::PullRequest(request), Some((request_id, waiter)))
            }
            Command::Close { success } => return self.step(Event::Close { success }, None).await,
        };
        match self.session.handle(event) {
            Ok(effects) => {
                if let Some((request_id, waiter)) = waiter {
                    self.waiters.insert(request_id, waiter);
                }
                self.apply_all(before, effects).await
            }
            Err(e) => {
                if let Some((_, waiter)) = waiter {
                    let _ = waiter.send(Err(Error::Protocol(e)));
                }
                Ok(None)
            }
        }
    }

    /// Feed one event and apply its effects. Returns the close reason once
    /// the session has closed.
    async fn step(&mut self, event: Event, reply_to: Option<String>) -> Result<Option<CloseReason>> {
        let before = self.session.state();
        let effects = match self.session.handle(event) {
            Ok(effects) => effects,
            Err(e) => return Err(self.fail(reply_to.as_deref(), e).await),
        };
        self.apply_all(before, effects).await
    }

    async fn apply_all(
        &mut self,
        before: SessionState,
        effects: Vec<Effect>,
    ) -> Result<Option<CloseReason>> {
        if self.session.state() != before {
            self.ctx.bus.publish(SessionEvent::StateChanged {
                device_uuid: self.session.device_uuid().to_string(),
                state: self.session.state(),
            });
        }

        for effect in effects {
            match self.apply(effect).await {
                Ok(Some(reason)) => return Ok(Some(reason)),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "applying session effect failed, aborting");
                    self.abort().await;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    async fn apply(&mut self, effect: Effect) -> Result<Option<CloseReason>> {
        match effect {
            Effect::Send(frame) => {
                tracing::debug!(id = %frame.id, action = %frame.action, "outbound frame");
                self.transport.send(frame).await?;
            }
            Effect::UpsertDevice { uuid, hello } => {
                self.ctx.devices.device_update(&uuid, &hello).await?;
                self.ctx.keystore.ensure(&uuid).await?;
            }
            Effect::PayloadReceived(payload) => self.apply_vault(payload).await?,
            Effect::TransferSent => {
                tracing::debug!("peer confirmed outbound transfer");
            }
            Effect::PullRequestResolved { request, outcome } => {
                self.apply_pull(request, outcome).await?;
            }
            Effect::Closed(reason) => {
                self.finish(&reason).await;
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    async fn apply_vault(&self, payload: Value) -> Result<()> {
        let vault: Vault = serde_json::from_value(payload)?;
        let vault_id = vault.id.clone();
        let uuid = self.session.device_uuid();
        let report = self.ctx.cache.replace_vault(uuid, vault).await?;
        self.ctx.bus.publish(SessionEvent::VaultSynced {
            device_uuid: uuid.to_string(),
            vault_id: vault_id.clone(),
            item_count: report.stored,
        });
        self.notify(
            RuntimeAction::VaultSynced,
            json!({
                "deviceUuid": uuid,
                "vaultId": vault_id,
                "itemCount": report.stored,
                "rejected": report.rejected,
            }),
        )
        .await;
        Ok(())
    }

    async fn apply_pull(&mut self, request: PullRequest, outcome: PullOutcome) -> Result<()> {
        if let PullOutcome::Data(data) = &outcome {
            let uuid = self.session.device_uuid();
            match request.kind {
                PullRequestKind::Vault => {
                    let vault: Vault = serde_json::from_value(data.clone())?;
                    self.ctx.cache.replace_vault(uuid, vault).await?;
                }
                PullRequestKind::Item => {
                    let item: Item = serde_json::from_value(data.clone())?;
                    self.ctx.cache.merge_items(uuid, vec![item]).await?;
                }
                // Revealed secrets go to the requester only.
                PullRequestKind::ItemSecret => {}
            }
        }

        self.ctx.bus.publish(SessionEvent::PullRequestCompleted {
            request_id: request.request_id.clone(),
            outcome: outcome.clone(),
        });
        let status = match &outcome {
            PullOutcome::Data(_) => "DATA",
            PullOutcome::Cancelled => "CANCELLED",
            PullOutcome::Completed => "COMPLETED",
            PullOutcome::Aborted => "ABORTED",
        };
        self.notify(
            RuntimeAction::PullRequestResult,
            json!({ "requestId": request.request_id, "status": status }),
        )
        .await;
        if let Some(waiter) = self.waiters.remove(&request.request_id) {
            let _ = waiter.send(Ok(outcome));
        }
        Ok(())
    }

    /// The session rejected an event and has already torn itself down.
    async fn fail(&mut self, reply_to: Option<&str>, error: ProtocolError) -> Error {
        let frame = Frame::close_with_error(reply_to, &error);
        if let Err(e) = self.transport.send(frame).await {
            tracing::debug!(error = %e, "could not deliver close frame");
        }
        self.ctx.bus.publish(SessionEvent::Closed {
            device_uuid: self.session.device_uuid().to_string(),
            error_code: Some(error.error_code().to_string()),
        });
        let error = Error::Protocol(error);
        self.notify_status(error.user_status()).await;
        self.release_waiters();
        error
    }

    /// Close after a local failure applying an effect.
    async fn abort(&mut self) {
        let effects = match self.session.handle(Event::Close { success: false }) {
            Ok(effects) => effects,
            Err(_) => Vec::new(),
        };
        for effect in effects {
            if let Effect::Send(frame) = effect {
                let _ = self.transport.send(frame).await;
            }
        }
        self.ctx.bus.publish(SessionEvent::Closed {
            device_uuid: self.session.device_uuid().to_string(),
            error_code: None,
        });
        self.notify_status(UserStatus::ConnectionError).await;
        self.release_waiters();
    }

    async fn finish(&mut self, reason: &CloseReason) {
        let error_code = match reason {
            CloseReason::PeerError { error_code } => {
                Some(error_code.clone().unwrap_or_else(|| "UNKNOWN".to_string()))
            }
            CloseReason::TimedOut => Some("TIMEOUT".to_string()),
            _ => None,
        };
        self.ctx.bus.publish(SessionEvent::Closed {
            device_uuid: self.session.device_uuid().to_string(),
            error_code,
        });
        match reason {
            CloseReason::TimedOut => self.notify_status(UserStatus::Timeout).await,
            CloseReason::PeerError { .. } | CloseReason::Disconnected | CloseReason::Aborted => {
                self.notify_status(UserStatus::ConnectionError).await
            }
            CloseReason::Completed => {}
        }
        self.release_waiters();
    }

    fn release_waiters(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Ok(PullOutcome::Aborted));
        }
        for command in self.deferred.drain(..) {
            if let Command::Pull(_, waiter) = command {
                let _ = waiter.send(Ok(PullOutcome::Aborted));
            }
        }
    }

    async fn notify_status(&self, status: UserStatus) {
        self.notify(RuntimeAction::ConnectionStatus, json!(status)).await;
    }

    async fn notify(&self, action: RuntimeAction, payload: Value) {
        let message = RuntimeMessage {
            action,
            target: Target::Popup,
            payload,
        };
        if let Err(e) = self.ctx.messenger.send(message).await {
            tracing::warn!(error = %e, "popup notification failed");
        }
    }
}
