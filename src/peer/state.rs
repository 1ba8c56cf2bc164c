use serde::{Deserialize, Serialize};

/// ========== NEGOTIATION STATE ==========

/// Стадия обмена offer/answer для одного соединения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    /// Fresh connection, nothing exchanged yet
    New,
    /// Our offer is out, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer being produced
    HaveRemoteOffer,
    /// Both descriptions applied
    Connected,
    /// Connection released; a new engine is required
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }
}

/// ========== CALL STATE ==========

/// Жизненный цикл звонка, видимый пользователю
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Calling,
    Active,
}

impl CallState {
    /// Whether the "start call" control should be offered
    pub fn can_start(self) -> bool {
        self == CallState::Idle
    }

    /// Whether the "end call" control should be offered
    pub fn can_end(self) -> bool {
        matches!(self, CallState::Calling | CallState::Active)
    }
}

/// ========== CONSTANTS ==========

/// STUN серверы по умолчанию
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Message sent to a participant that cannot join a full room
pub const ROOM_FULL_REASON: &str = "Room is full";
