//! In-process relay: one two-seat room

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::peer::state::ROOM_FULL_REASON;
use crate::signaling::{Inbox, SignalingChannel, SignalingMessage};

const ROOM_CAPACITY: usize = 2;

#[derive(Default)]
struct Participant {
    seated: bool,
    inbox: Option<mpsc::UnboundedSender<SignalingMessage>>,
    notice: Option<String>,
}

#[derive(Default)]
struct Room {
    participants: HashMap<u64, Participant>,
}

impl Room {
    fn seated(&self) -> usize {
        self.participants.values().filter(|p| p.seated).count()
    }
}

/// Relay server stand-in shared by the participants of one room
#[derive(Clone, Default)]
pub struct MemoryRelay {
    room: Arc<Mutex<Room>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, not yet connected client of this relay
    pub fn channel(&self) -> MemorySignaling {
        MemorySignaling {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            room: self.room.clone(),
        }
    }

    pub async fn occupants(&self) -> usize {
        self.room.lock().await.seated()
    }
}

/// One participant's connection to a [`MemoryRelay`]
pub struct MemorySignaling {
    id: u64,
    room: Arc<Mutex<Room>>,
}

impl MemorySignaling {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn connect(&self) -> Result<()> {
        let mut room = self.room.lock().await;
        if room.participants.contains_key(&self.id) {
            return Ok(());
        }

        let seated = room.seated() < ROOM_CAPACITY;
        let mut participant = Participant {
            seated,
            ..Default::default()
        };
        if seated {
            info!("Participant {} joined the room", self.id);
        } else {
            warn!("Participant {} rejected: room is full", self.id);
            participant.notice = Some(ROOM_FULL_REASON.to_string());
        }
        room.participants.insert(self.id, participant);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.room.lock().await.participants.remove(&self.id).is_some() {
            info!("Participant {} left the room", self.id);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.room.lock().await.participants.contains_key(&self.id)
    }

    async fn emit(&self, message: SignalingMessage) -> Result<()> {
        let room = self.room.lock().await;
        let me = room
            .participants
            .get(&self.id)
            .ok_or_else(|| CallError::Signaling("not connected".into()))?;
        if !me.seated {
            return Err(CallError::CapacityRejected(ROOM_FULL_REASON.into()));
        }

        let event = message.event_name();
        let mut delivered = false;
        for (id, peer) in room.participants.iter() {
            if *id == self.id || !peer.seated {
                continue;
            }
            if let Some(inbox) = &peer.inbox {
                delivered |= inbox.send(message.clone()).is_ok();
            }
        }
        if delivered {
            debug!("Relayed {} from participant {}", event, self.id);
        } else {
            debug!("No listener for {} from participant {}, dropped", event, self.id);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<Inbox> {
        let mut room = self.room.lock().await;
        let me = room
            .participants
            .get_mut(&self.id)
            .ok_or_else(|| CallError::Signaling("not connected".into()))?;
        if me.inbox.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(CallError::Signaling("already subscribed".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(reason) = me.notice.take() {
            let _ = tx.send(SignalingMessage::RoomFull(reason));
        }
        me.inbox = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(me) = self.room.lock().await.participants.get_mut(&self.id) {
            me.inbox = None;
        }
    }
}
