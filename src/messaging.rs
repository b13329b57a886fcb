//! Runtime messaging between the background context and the extension's
//! other surfaces (popup, content scripts).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Background,
    Popup,
    ContentScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeAction {
    ConnectionStatus,
    VaultSynced,
    PullRequestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMessage {
    pub action: RuntimeAction,
    pub target: Target,
    #[serde(default)]
    pub payload: Value,
}

impl RuntimeMessage {
    pub fn new<P: Serialize>(action: RuntimeAction, target: Target, payload: &P) -> Result<Self> {
        Ok(Self {
            action,
            target,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// User-implemented messaging layer.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `message`. Returns the receiver's response, if any.
    async fn send(&self, message: RuntimeMessage) -> Result<Option<Value>>;
}

/// Messenger that forwards into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<RuntimeMessage>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RuntimeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Messenger for ChannelMessenger {
    async fn send(&self, message: RuntimeMessage) -> Result<Option<Value>> {
        self.tx
            .send(message)
            .map_err(|_| Error::Messaging("receiver dropped".to_string()))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UserStatus;

    #[tokio::test]
    async fn channel_delivers() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let message =
            RuntimeMessage::new(RuntimeAction::ConnectionStatus, Target::Popup, &UserStatus::Timeout)
                .unwrap();
        messenger.send(message.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), message);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["action"], "CONNECTION_STATUS");
        assert_eq!(json["payload"], "TIMEOUT");
    }

    #[tokio::test]
    async fn closed_channel_errors() {
        let (messenger, rx) = ChannelMessenger::new();
        drop(rx);
        let message = RuntimeMessage::new(
            RuntimeAction::VaultSynced,
            Target::Popup,
            &serde_json::json!({}),
        )
        .unwrap();
        assert!(matches!(messenger.send(message).await, Err(Error::Messaging(_))));
    }
}
