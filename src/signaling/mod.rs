//! Signaling channel between the two participants
//!
//! The channel only relays negotiation metadata. Delivery is at most once
//! per send and ordered per sender; nothing is ordered across senders.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::peer::types::{IceCandidate, SessionDescription};

pub use memory::{MemoryRelay, MemorySignaling};
pub use websocket::WsSignaling;

/// Сообщение signaling канала
///
/// Wire form: `{"event": "offer" | "answer" | "ice-candidate" | "server-full", "data": ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    #[serde(rename = "offer")]
    Offer(SessionDescription),
    #[serde(rename = "answer")]
    Answer(SessionDescription),
    #[serde(rename = "ice-candidate")]
    Candidate(IceCandidate),
    #[serde(rename = "server-full")]
    RoomFull(String),
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::Candidate(_) => "ice-candidate",
            SignalingMessage::RoomFull(_) => "server-full",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

pub type Inbox = mpsc::UnboundedReceiver<SignalingMessage>;

/// Relay connection shared by every session of one client
///
/// Only one subscriber may be registered at a time; a second `subscribe`
/// without `unsubscribe` in between is an error.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn emit(&self, message: SignalingMessage) -> Result<()>;

    async fn subscribe(&self) -> Result<Inbox>;

    async fn unsubscribe(&self);
}
