use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use passlink::config::SessionSettings;
use passlink::{
    ChannelMessenger, ChannelTransport, DeviceKeyStore, DeviceRegistry, DriverContext,
    DriverHandle, EventBus, FrameTransport, IdCollisionPolicy, MemoryStorage, RuntimeMessage,
    SecretCache, SessionDriver, TokioAlarms,
};
use passlink_crypto::{
    base64_decode, base64_encode, derive_session_key, EphemeralKeyPair, StoredIdentity,
    SymmetricKey,
};
use passlink_protocol::{
    ChallengeReply, CloseReason, Frame, HelloPayload, Session, SessionConfig, SocketAction,
};

pub const RETENTION: Duration = Duration::from_secs(180);

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub ctx: DriverContext,
    pub alarms: Arc<TokioAlarms>,
    pub identity: StoredIdentity,
    pub messages: mpsc::UnboundedReceiver<RuntimeMessage>,
    pub fired: Option<mpsc::UnboundedReceiver<String>>,
}

impl Harness {
    pub fn new(policy: IdCollisionPolicy) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let keystore = Arc::new(DeviceKeyStore::new(storage.clone()));
        let (alarms, fired) = TokioAlarms::new();
        let alarms = Arc::new(alarms);
        let cache = Arc::new(SecretCache::new(
            storage.clone(),
            keystore.clone(),
            alarms.clone(),
            RETENTION,
        ));
        let (messenger, messages) = ChannelMessenger::new();
        let ctx = DriverContext {
            devices: Arc::new(DeviceRegistry::new(storage.clone(), policy)),
            keystore,
            cache,
            bus: EventBus::new(),
            messenger: Arc::new(messenger),
            settings: SessionSettings::default(),
        };
        Self {
            storage,
            ctx,
            alarms,
            identity: StoredIdentity::generate(),
            messages,
            fired: Some(fired),
        }
    }

    pub fn cache(&self) -> Arc<SecretCache> {
        self.ctx.cache.clone()
    }

    /// Start a driver for `config` and return the mobile end of its socket.
    pub fn spawn(
        &self,
        config: SessionConfig,
    ) -> (JoinHandle<passlink::Result<CloseReason>>, DriverHandle, MobilePeer) {
        let (ours, theirs) = ChannelTransport::pair();
        let session = Session::new(self.identity.clone(), config);
        let (driver, handle) = SessionDriver::new(session, ours, self.ctx.clone());
        (tokio::spawn(driver.run()), handle, MobilePeer::new(theirs))
    }

    pub fn drain_messages(&mut self) -> Vec<RuntimeMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            out.push(message);
        }
        out
    }
}

pub fn local_hello() -> HelloPayload {
    HelloPayload {
        device_id: "browser-1".into(),
        name: "Firefox".into(),
        platform: "browser".into(),
        os_name: None,
        os_version: None,
        app_name: None,
        app_version: None,
        vaults: Vec::new(),
    }
}

pub fn peer_hello(device_id: &str) -> Value {
    json!({
        "deviceId": device_id,
        "name": "Pixel 9",
        "platform": "android",
        "osName": "Android",
        "osVersion": "15",
        "vaults": [{"id": "v1", "name": "Personal"}]
    })
}

/// The mobile app's side of the socket.
pub struct MobilePeer {
    transport: ChannelTransport,
    pub ephemeral: EphemeralKeyPair,
    pub salt: Vec<u8>,
    key: Option<SymmetricKey>,
    next_id: u32,
}

impl MobilePeer {
    fn new(transport: ChannelTransport) -> Self {
        Self {
            transport,
            ephemeral: EphemeralKeyPair::generate(),
            salt: b"mobile-hkdf-salt".to_vec(),
            key: None,
            next_id: 0,
        }
    }

    pub async fn send(&mut self, action: SocketAction, payload: Value) -> String {
        self.next_id += 1;
        let id = format!("m-{}", self.next_id);
        self.send_with_id(&id, action, payload).await;
        id
    }

    pub async fn send_with_id(&mut self, id: &str, action: SocketAction, payload: Value) {
        let frame = Frame::with_id(id, action, &payload).unwrap();
        self.transport.send(frame).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.transport.recv())
            .await
            .expect("no frame from driver")
            .unwrap()
    }

    pub async fn expect(&mut self, action: SocketAction) -> Frame {
        let frame = self.recv().await.expect("driver hung up");
        assert_eq!(frame.action, action, "unexpected frame {frame:?}");
        frame
    }

    pub fn challenge_payload(&self, session_id: &str) -> Value {
        json!({
            "publicKey": base64_encode(&self.ephemeral.public_key_bytes()),
            "sessionId": session_id,
            "hkdfSalt": base64_encode(&self.salt),
        })
    }

    /// Derive the session key from the driver's `CHALLENGE` reply.
    pub fn finish_handshake(&mut self, reply: &Frame) -> ChallengeReply {
        let reply: ChallengeReply = reply.parse_payload().unwrap();
        let ours = base64_decode(&reply.public_key).unwrap();
        let shared = self.ephemeral.agree(&ours).unwrap();
        self.key = Some(derive_session_key(&self.salt, &shared).unwrap());
        reply
    }

    pub fn key(&self) -> &SymmetricKey {
        self.key.as_ref().expect("handshake not finished")
    }

    /// Run HELLO and CHALLENGE through to `Ready`.
    pub async fn pair(&mut self, device_id: &str, session_id: &str) -> ChallengeReply {
        self.send(SocketAction::Hello, peer_hello(device_id)).await;
        self.expect(SocketAction::Hello).await;
        self.send(SocketAction::Challenge, self.challenge_payload(session_id))
            .await;
        let reply = self.expect(SocketAction::Challenge).await;
        self.finish_handshake(&reply)
    }
}

pub fn login(id: &str, tier: u8, updated_at: i64, password: &str) -> Value {
    json!({
        "contentType": "login",
        "contentVersion": 1,
        "id": id,
        "vaultId": "v1",
        "deviceId": "D1",
        "securityType": tier,
        "createdAt": 1700000000000i64,
        "updatedAt": updated_at,
        "tags": [],
        "content": {
            "name": format!("Login {id}"),
            "username": "alice",
            "password": password,
            "uris": ["https://example.com/login"]
        }
    })
}

/// Let spawned tasks run to quiescence on the current-thread runtime.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
