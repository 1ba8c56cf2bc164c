use serde::Serialize;

use crate::media::Facing;
use crate::peer::state::CallState;

/// Уведомления для слоя отрисовки
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SessionEvent {
    CallStateChanged(CallState),
    /// The relay refused this participant; nothing else changed
    CapacityRejected(String),
    MediaError(String),
    /// The session was torn down and replaced with a fresh one
    NegotiationFailed(String),
    /// Nobody answered within the calling timeout
    CallExpired,
    SourceSwitched(Facing),
    RemoteMedia(String),
    GlareResolved { abandoned_local_offer: bool },
}
