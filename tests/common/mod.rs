#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use peercall::media::{LocalTrack, StaticCaptureDevice, TrackKind};
use peercall::peer::{
    ConnectionEvent, ConnectionEventKind, ConnectionEvents, ConnectionFactory, IceCandidate,
    PeerConnection, SessionDescription,
};
use peercall::signaling::{MemoryRelay, SignalingChannel};
use peercall::{CallConfig, CallError, Result, SessionController};

/// Connection double that records every call made on it
pub struct FakeConnection {
    pub name: String,
    pub epoch: u64,
    ops: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    rejected: Mutex<Vec<String>>,
    senders: Mutex<HashMap<TrackKind, String>>,
    offers: AtomicU32,
    answers: AtomicU32,
    closed: AtomicBool,
    pub fail_offer: AtomicBool,
    pub fail_remote: AtomicBool,
    pub fail_replace: AtomicBool,
}

impl FakeConnection {
    pub fn new(name: &str, epoch: u64) -> Self {
        Self {
            name: name.to_string(),
            epoch,
            ops: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
            offers: AtomicU32::new(0),
            answers: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            fail_offer: AtomicBool::new(false),
            fail_remote: AtomicBool::new(false),
            fail_replace: AtomicBool::new(false),
        }
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    /// Candidate strings applied so far, in order
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    /// Makes `add_ice_candidate` fail for this candidate string
    pub fn reject_candidate(&self, candidate: &str) {
        self.rejected.lock().unwrap().push(candidate.to_string());
    }

    pub fn sender_track(&self, kind: TrackKind) -> Option<String> {
        self.senders.lock().unwrap().get(&kind).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailure("offer refused".into()));
        }
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("offer-{}-{}", self.name, n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::answer(format!("answer-{}-{}", self.name, n)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", desc.sdp));
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailure("bad remote description".into()));
        }
        Ok(())
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        self.record("rollback");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        if self.rejected.lock().unwrap().contains(&candidate.candidate) {
            return Err(CallError::NegotiationFailure("candidate rejected".into()));
        }
        self.applied.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    async fn has_sender(&self, kind: TrackKind) -> bool {
        self.senders.lock().unwrap().contains_key(&kind)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("add_track:{:?}", track.kind()));
        self.senders
            .lock()
            .unwrap()
            .insert(track.kind(), track.id().to_string());
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("replace_track:{:?}", track.kind()));
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailure("replace refused".into()));
        }
        self.senders
            .lock()
            .unwrap()
            .insert(track.kind(), track.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`FakeConnection`]s and keeps them for inspection
pub struct FakeFactory {
    name: String,
    created: Mutex<Vec<Arc<FakeConnection>>>,
    events: Mutex<Vec<(u64, ConnectionEvents)>>,
    pub fail_next_offer: AtomicBool,
    pub fail_create: AtomicBool,
}

impl FakeFactory {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            created: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail_next_offer: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
        })
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Arc<FakeConnection> {
        self.created.lock().unwrap().last().unwrap().clone()
    }

    /// Simulates a callback of the connection created for `epoch`
    pub fn fire(&self, epoch: u64, kind: ConnectionEventKind) {
        let events = self.events.lock().unwrap();
        let (_, tx) = events.iter().find(|(e, _)| *e == epoch).unwrap();
        tx.send(ConnectionEvent { epoch, kind }).unwrap();
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(&self, epoch: u64, events: ConnectionEvents) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::NegotiationFailure("no more connections".into()));
        }
        let connection = Arc::new(FakeConnection::new(&self.name, epoch));
        if self.fail_next_offer.swap(false, Ordering::SeqCst) {
            connection.fail_offer.store(true, Ordering::SeqCst);
        }
        self.created.lock().unwrap().push(connection.clone());
        self.events.lock().unwrap().push((epoch, events));
        Ok(connection)
    }
}

pub struct Client {
    pub controller: SessionController,
    pub factory: Arc<FakeFactory>,
    pub device: Arc<StaticCaptureDevice>,
}

pub async fn mount(name: &str, relay: &MemoryRelay, config: CallConfig) -> Client {
    let factory = FakeFactory::new(name);
    let device = Arc::new(StaticCaptureDevice::new());
    let signaling: Arc<dyn SignalingChannel> = Arc::new(relay.channel());
    let controller = SessionController::mount(config, signaling, factory.clone(), device.clone())
        .await
        .unwrap();
    Client {
        controller,
        factory,
        device,
    }
}

/// Pumps both controllers until neither has anything left to handle
pub async fn settle(a: &mut SessionController, b: &mut SessionController) {
    loop {
        let handled = a.pump().await + b.pump().await;
        if handled == 0 {
            break;
        }
    }
}
