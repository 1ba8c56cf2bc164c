pub mod controller;
pub mod events;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tracing::debug;

use crate::peer::negotiation::NegotiationEngine;
use crate::peer::state::CallState;

pub use controller::SessionController;
pub use events::SessionEvent;

/// Один звонок: состояние и движок согласования
///
/// Never reused: ending a call replaces the whole session with one of the
/// next epoch.
pub struct Session {
    id: String,
    epoch: u64,
    state: CallState,
    engine: NegotiationEngine,
    calling_since: Option<Instant>,
    created_at: DateTime<Local>,
}

impl Session {
    pub fn new(epoch: u64, engine: NegotiationEngine) -> Self {
        let id = engine.session_id().to_string();
        debug!("New session {} (epoch {})", id, epoch);
        Self {
            id,
            epoch,
            state: CallState::Idle,
            engine,
            calling_since: None,
            created_at: Local::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut NegotiationEngine {
        &mut self.engine
    }

    pub fn calling_since(&self) -> Option<Instant> {
        self.calling_since
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Returns the previous state
    pub(crate) fn set_state(&mut self, next: CallState) -> CallState {
        let previous = self.state;
        if previous != next {
            debug!("Session {} call state {:?} -> {:?}", self.id, previous, next);
        }
        self.calling_since = match next {
            CallState::Calling => Some(Instant::now()),
            _ => None,
        };
        self.state = next;
        previous
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .field("negotiation", &self.engine.state())
            .field("created_at", &self.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .finish()
    }
}
