use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::logger::describe_candidate;
use crate::media::{CaptureDevice, Facing, MediaSourceController, VideoSink};
use crate::peer::connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEvents, ConnectionFactory,
    RtcConnectionFactory,
};
use crate::peer::negotiation::{NegotiationEngine, OfferOutcome};
use crate::peer::state::{CallState, NegotiationState};
use crate::session::{Session, SessionEvent};
use crate::signaling::{Inbox, SignalingChannel, SignalingMessage, WsSignaling};

const EVENT_CAPACITY: usize = 64;

enum Next {
    Connection(ConnectionEvent),
    Signal(SignalingMessage),
    Expired,
    Closed,
}

/// Жизненный цикл звонка одного клиента
///
/// All inputs (user actions, relay messages, connection callbacks) are
/// handled one at a time through `&mut self`.
pub struct SessionController {
    config: CallConfig,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn ConnectionFactory>,
    media: MediaSourceController,
    session: Session,
    inbox: Option<Inbox>,
    conn_tx: ConnectionEvents,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    remote: VideoSink,
    events: broadcast::Sender<SessionEvent>,
    shut_down: bool,
}

async fn build_session(
    config: &CallConfig,
    signaling: &Arc<dyn SignalingChannel>,
    factory: &Arc<dyn ConnectionFactory>,
    conn_tx: &ConnectionEvents,
    epoch: u64,
) -> Result<Session> {
    let connection = factory.create(epoch, conn_tx.clone()).await?;
    let engine = NegotiationEngine::with_policy(connection, signaling.clone(), config.glare_policy);
    Ok(Session::new(epoch, engine))
}

async fn next_signal(inbox: &mut Option<Inbox>) -> Option<SignalingMessage> {
    match inbox {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionController {
    /// Подключается к signaling и готовит первую сессию
    ///
    /// The channel is subscribed here and nowhere else. A capture failure
    /// does not abort mounting; it is reported as a media error and the
    /// controller starts without local media.
    pub async fn mount(
        config: CallConfig,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn ConnectionFactory>,
        device: Arc<dyn CaptureDevice>,
    ) -> Result<Self> {
        config.validate()?;
        signaling.connect().await?;
        let inbox = signaling.subscribe().await?;

        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let session = build_session(&config, &signaling, &factory, &conn_tx, 0).await?;
        let media = MediaSourceController::new(device, config.default_facing, config.audio);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut controller = Self {
            config,
            signaling,
            factory,
            media,
            session,
            inbox: Some(inbox),
            conn_tx,
            conn_rx,
            remote: VideoSink::new("remote"),
            events,
            shut_down: false,
        };
        controller.prepare_media().await;
        info!("Session controller mounted (session {})", controller.session.id());
        Ok(controller)
    }

    /// Mounts with the WebSocket relay and webrtc-rs connections named in
    /// `config`
    pub async fn from_config(config: CallConfig, device: Arc<dyn CaptureDevice>) -> Result<Self> {
        config.validate()?;
        let signaling: Arc<dyn SignalingChannel> = Arc::new(WsSignaling::from_config(&config)?);
        let factory: Arc<dyn ConnectionFactory> =
            Arc::new(RtcConnectionFactory::from_config(&config));
        Self::mount(config, signaling, factory, device).await
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn call_state(&self) -> CallState {
        self.session.state()
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.session.engine().state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn media(&self) -> &MediaSourceController {
        &self.media
    }

    pub fn facing(&self) -> Facing {
        self.media.facing()
    }

    pub fn local_sink(&self) -> &VideoSink {
        self.media.preview()
    }

    pub fn remote_sink(&self) -> &VideoSink {
        &self.remote
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn notify(&self, event: SessionEvent) {
        debug!("Session event: {:?}", event);
        let _ = self.events.send(event);
    }

    fn set_call_state(&mut self, next: CallState) {
        if self.session.set_state(next) != next {
            self.notify(SessionEvent::CallStateChanged(next));
        }
    }

    fn ensure_running(&self, op: &str) -> Result<()> {
        if self.shut_down {
            return Err(CallError::Signaling(format!("Cannot {} after shutdown", op)));
        }
        Ok(())
    }

    /// Acquires local media for the current session and attaches it
    async fn prepare_media(&mut self) {
        if let Err(e) = self.media.acquire(self.media.facing()).await {
            warn!("Local media unavailable: {}", e);
            self.notify(SessionEvent::MediaError(e.to_string()));
            return;
        }
        let connection = self.session.engine().connection().clone();
        if let Err(e) = self.media.attach_to(connection.as_ref()).await {
            warn!("Failed to attach local media: {}", e);
            self.notify(SessionEvent::MediaError(e.to_string()));
        }
    }

    /// Reports an error the way its kind requires and hands it back
    async fn settle(&mut self, err: CallError) -> CallError {
        match &err {
            CallError::NegotiationFailure(reason) => {
                let reason = reason.clone();
                self.fail_session(reason).await;
            }
            CallError::MediaAcquisition(e) => {
                warn!("Media acquisition failed: {}", e);
                self.notify(SessionEvent::MediaError(e.to_string()));
            }
            CallError::CapacityRejected(reason) => {
                warn!("Rejected by relay: {}", reason);
                self.notify(SessionEvent::CapacityRejected(reason.clone()));
            }
            CallError::ProtocolViolation(what) => warn!("Protocol violation, dropped: {}", what),
            other => warn!("{}", other),
        }
        err
    }

    async fn fail_session(&mut self, reason: String) {
        error!("Session {} failed: {}", self.session.id(), reason);
        self.notify(SessionEvent::NegotiationFailed(reason));
        if let Err(e) = self.reset_session().await {
            error!("Failed to build a fresh session: {}", e);
        }
    }

    /// Tears the current session down and replaces it with a fresh one
    async fn reset_session(&mut self) -> Result<()> {
        self.media.release();
        self.session.engine_mut().close().await;
        self.remote.clear();

        let epoch = self.session.epoch() + 1;
        let fresh = build_session(
            &self.config,
            &self.signaling,
            &self.factory,
            &self.conn_tx,
            epoch,
        )
        .await;
        // старая сессия уже закрыта, звонка больше нет
        self.set_call_state(CallState::Idle);
        self.session = fresh?;
        self.prepare_media().await;
        Ok(())
    }

    pub async fn start_call(&mut self) -> Result<()> {
        self.ensure_running("start call")?;
        let state = self.call_state();
        if !state.can_start() {
            return Err(CallError::InvalidCallState {
                op: "start call",
                state,
            });
        }

        info!("Starting call in session {}", self.session.id());
        if let Err(e) = self.session.engine_mut().create_offer().await {
            return Err(self.settle(e).await);
        }
        self.set_call_state(CallState::Calling);
        Ok(())
    }

    pub async fn end_call(&mut self) -> Result<()> {
        self.ensure_running("end call")?;
        let state = self.call_state();
        if !state.can_end() {
            return Err(CallError::InvalidCallState {
                op: "end call",
                state,
            });
        }

        info!("Ending call in session {}", self.session.id());
        self.reset_session().await
    }

    /// Останавливает всё и отключается от signaling
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        self.media.release();
        self.session.engine_mut().close().await;
        self.remote.clear();
        self.set_call_state(CallState::Idle);

        self.signaling.unsubscribe().await;
        self.inbox = None;
        self.signaling.disconnect().await?;
        info!("Session controller shut down");
        Ok(())
    }

    /// Flips the camera mid-call; the negotiation is left alone
    pub async fn switch_source(&mut self) -> Result<Facing> {
        self.ensure_running("switch source")?;
        let connection = self.session.engine().connection().clone();
        match self.media.switch_source(Some(connection.as_ref())).await {
            Ok(facing) => {
                self.notify(SessionEvent::SourceSwitched(facing));
                Ok(facing)
            }
            Err(CallError::MediaAcquisition(e)) => {
                warn!("Camera switch rejected: {}", e);
                self.notify(SessionEvent::MediaError(e.to_string()));
                Err(CallError::MediaAcquisition(e))
            }
            Err(e) => {
                warn!("Camera switch failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn handle_signal(&mut self, message: SignalingMessage) -> Result<()> {
        if self.shut_down {
            debug!("Ignoring {} after shutdown", message.event_name());
            return Ok(());
        }
        debug!("Inbound {} in {:?}", message.event_name(), self.call_state());
        match self.apply_signal(message).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.settle(e).await),
        }
    }

    async fn apply_signal(&mut self, message: SignalingMessage) -> Result<()> {
        match message {
            SignalingMessage::Offer(offer) => {
                if self.call_state() == CallState::Active {
                    return Err(CallError::ProtocolViolation(
                        "offer received during an active call".into(),
                    ));
                }
                match self.session.engine_mut().receive_offer(offer).await? {
                    OfferOutcome::Answered {
                        abandoned_local_offer,
                        ..
                    } => {
                        if abandoned_local_offer {
                            self.notify(SessionEvent::GlareResolved {
                                abandoned_local_offer: true,
                            });
                        }
                        self.set_call_state(CallState::Active);
                    }
                    OfferOutcome::KeptLocalOffer => {
                        self.notify(SessionEvent::GlareResolved {
                            abandoned_local_offer: false,
                        });
                    }
                }
            }
            SignalingMessage::Answer(answer) => {
                if self.call_state() != CallState::Calling {
                    return Err(CallError::ProtocolViolation(format!(
                        "answer received while call is {:?}",
                        self.call_state()
                    )));
                }
                self.session.engine_mut().receive_answer(answer).await?;
                self.set_call_state(CallState::Active);
            }
            SignalingMessage::Candidate(candidate) => {
                describe_candidate("remote", &candidate);
                let disposition = self.session.engine_mut().receive_candidate(candidate).await;
                debug!("Remote candidate {:?}", disposition);
            }
            SignalingMessage::RoomFull(reason) => {
                return Err(CallError::CapacityRejected(reason));
            }
        }
        Ok(())
    }

    /// Returns false when the event belongs to an older session
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) -> Result<bool> {
        if self.shut_down || event.epoch != self.session.epoch() {
            debug!(
                "Discarding stale connection event from epoch {} (current {})",
                event.epoch,
                self.session.epoch()
            );
            return Ok(false);
        }

        match event.kind {
            ConnectionEventKind::LocalCandidate(candidate) => {
                if let Err(e) = self
                    .session
                    .engine_mut()
                    .local_candidate_generated(candidate)
                    .await
                {
                    return Err(self.settle(e).await);
                }
            }
            ConnectionEventKind::RemoteStream(stream_id) => {
                info!("Remote media on stream {}", stream_id);
                self.remote.bind(stream_id.clone());
                self.notify(SessionEvent::RemoteMedia(stream_id));
            }
            ConnectionEventKind::Failed(reason) => {
                let err = CallError::NegotiationFailure(reason);
                return Err(self.settle(err).await);
            }
        }
        Ok(true)
    }

    fn calling_deadline(&self) -> Option<Instant> {
        let timeout = self.config.calling_timeout_secs?;
        if self.call_state() != CallState::Calling {
            return None;
        }
        self.session
            .calling_since()
            .map(|since| since + Duration::from_secs(timeout))
    }

    async fn expire_call(&mut self) {
        warn!("Call in session {} was not answered in time", self.session.id());
        self.notify(SessionEvent::CallExpired);
        if let Err(e) = self.reset_session().await {
            error!("Failed to build a fresh session: {}", e);
        }
    }

    async fn check_calling_timeout(&mut self) -> bool {
        match self.calling_deadline() {
            Some(deadline) if deadline <= Instant::now() => {
                self.expire_call().await;
                true
            }
            _ => false,
        }
    }

    async fn dispatch(&mut self, next: Next) -> bool {
        match next {
            Next::Connection(event) => {
                let _ = self.handle_connection_event(event).await;
            }
            Next::Signal(message) => {
                let _ = self.handle_signal(message).await;
            }
            Next::Expired => self.expire_call().await,
            Next::Closed => return false,
        }
        true
    }

    /// Обрабатывает всё, что уже пришло, не блокируясь
    ///
    /// Returns how many inputs were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if self.shut_down {
                break;
            }
            if self.check_calling_timeout().await {
                handled += 1;
                continue;
            }
            if let Ok(event) = self.conn_rx.try_recv() {
                self.dispatch(Next::Connection(event)).await;
                handled += 1;
                continue;
            }
            let message = match self.inbox.as_mut() {
                Some(inbox) => inbox.try_recv().ok(),
                None => None,
            };
            match message {
                Some(message) => {
                    self.dispatch(Next::Signal(message)).await;
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }

    /// Waits for the next input and handles it
    ///
    /// Returns false once no more input can arrive (shut down, or the relay
    /// dropped the subscription).
    pub async fn process_next(&mut self) -> bool {
        if self.shut_down {
            return false;
        }
        let deadline = self.calling_deadline();
        let next = {
            let conn_rx = &mut self.conn_rx;
            let inbox = &mut self.inbox;
            tokio::select! {
                Some(event) = conn_rx.recv() => Next::Connection(event),
                message = next_signal(inbox) => match message {
                    Some(message) => Next::Signal(message),
                    None => Next::Closed,
                },
                _ = wait_for(deadline) => Next::Expired,
            }
        };
        if matches!(next, Next::Closed) {
            info!("Signaling subscription ended");
            self.inbox = None;
        }
        self.dispatch(next).await
    }

    /// Runs until shutdown or until the relay goes away
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }
}
