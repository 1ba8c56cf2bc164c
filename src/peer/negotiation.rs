use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::peer::connection::PeerConnection;
use crate::peer::ice::CandidateBuffer;
use crate::peer::state::NegotiationState;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::signaling::{SignalingChannel, SignalingMessage};
use crate::utils::random_id;

/// Как разрешать встречные offer (glare)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GlarePolicy {
    /// The receiver always abandons its own offer and answers the incoming one
    AlwaysYield,
    /// Only the side whose offer sorts lower yields; the other keeps waiting
    /// for the answer to its own offer
    #[default]
    YieldToHigherOffer,
}

impl GlarePolicy {
    fn should_yield(self, local: Option<&SessionDescription>, remote: &SessionDescription) -> bool {
        match self {
            GlarePolicy::AlwaysYield => true,
            GlarePolicy::YieldToHigherOffer => match local {
                Some(local) => local.sdp <= remote.sdp,
                None => true,
            },
        }
    }
}

/// Итог обработки входящего offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    Answered {
        answer: SessionDescription,
        abandoned_local_offer: bool,
    },
    /// Glare lost by the remote side; its offer was ignored
    KeptLocalOffer,
}

/// What happened to an inbound remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Buffered,
    Rejected,
    Dropped,
}

/// Drives one connection through offer/answer/ICE
///
/// There is no retry path: a failure closes the engine and the owner is
/// expected to replace it with a fresh one.
pub struct NegotiationEngine {
    session_id: String,
    connection: Arc<dyn PeerConnection>,
    signaling: Arc<dyn SignalingChannel>,
    state: NegotiationState,
    buffer: CandidateBuffer,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    glare: GlarePolicy,
    offers_sent: u32,
    abandoned_offers: u32,
}

impl NegotiationEngine {
    pub fn new(connection: Arc<dyn PeerConnection>, signaling: Arc<dyn SignalingChannel>) -> Self {
        Self::with_policy(connection, signaling, GlarePolicy::default())
    }

    pub fn with_policy(
        connection: Arc<dyn PeerConnection>,
        signaling: Arc<dyn SignalingChannel>,
        glare: GlarePolicy,
    ) -> Self {
        Self {
            session_id: random_id(),
            connection,
            signaling,
            state: NegotiationState::New,
            buffer: CandidateBuffer::new(),
            local_description: None,
            remote_description: None,
            glare,
            offers_sent: 0,
            abandoned_offers: 0,
        }
    }

    /// Tag carried by our offers and echoed by the answers to them
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.buffer.len()
    }

    pub fn offers_sent(&self) -> u32 {
        self.offers_sent
    }

    pub fn abandoned_offers(&self) -> u32 {
        self.abandoned_offers
    }

    pub fn glare_policy(&self) -> GlarePolicy {
        self.glare
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!("Negotiation {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Closes the engine and turns the error into a session-fatal one
    async fn fail(&mut self, err: CallError) -> CallError {
        warn!("Negotiation failed in {:?}: {}", self.state, err);
        self.close().await;
        match err {
            CallError::NegotiationFailure(_) => err,
            other => CallError::NegotiationFailure(other.to_string()),
        }
    }

    /// Takes back an offer the relay refused to carry
    ///
    /// The engine returns to `New` so the caller may try again later.
    async fn withdraw_offer(&mut self, err: CallError) -> CallError {
        info!("Offer not delivered, withdrawing it: {}", err);
        if let Err(e) = self.connection.rollback_local_offer().await {
            return self.fail(e).await;
        }
        self.local_description = None;
        self.transition(NegotiationState::New);
        err
    }

    async fn flush_candidates(&mut self) {
        let connection = self.connection.clone();
        let applied = self
            .buffer
            .flush_on(|candidate| {
                let connection = connection.clone();
                async move { connection.add_ice_candidate(candidate).await }
            })
            .await;
        debug!("Flushed {} buffered candidates", applied);
    }

    /// Создает offer и отправляет его собеседнику
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.state != NegotiationState::New {
            return Err(CallError::ConnectionState {
                op: "create offer",
                state: self.state,
            });
        }

        let offer = match self.connection.create_offer().await {
            Ok(offer) => offer.tagged(self.session_id.clone()),
            Err(e) => return Err(self.fail(e).await),
        };
        self.local_description = Some(offer.clone());
        self.transition(NegotiationState::HaveLocalOffer);

        match self.signaling.emit(SignalingMessage::Offer(offer.clone())).await {
            Ok(()) => {}
            Err(e @ (CallError::CapacityRejected(_) | CallError::ProtocolViolation(_))) => {
                return Err(self.withdraw_offer(e).await)
            }
            Err(e) => return Err(self.fail(e).await),
        }
        self.offers_sent += 1;
        info!("Offer sent");
        Ok(offer)
    }

    /// Принимает offer собеседника и отвечает на него
    ///
    /// From `HaveLocalOffer` this is glare: depending on the policy the
    /// local offer is rolled back and the incoming one answered, or the
    /// incoming offer is ignored.
    pub async fn receive_offer(&mut self, offer: SessionDescription) -> Result<OfferOutcome> {
        let mut abandoned_local_offer = false;
        match self.state {
            NegotiationState::New => {}
            NegotiationState::HaveLocalOffer => {
                if !self.glare.should_yield(self.local_description.as_ref(), &offer) {
                    info!("Glare: keeping local offer, ignoring remote offer");
                    return Ok(OfferOutcome::KeptLocalOffer);
                }
                info!("Glare: abandoning local offer in favor of remote offer");
                if let Err(e) = self.connection.rollback_local_offer().await {
                    return Err(self.fail(e).await);
                }
                self.local_description = None;
                self.abandoned_offers += 1;
                abandoned_local_offer = true;
            }
            state => {
                return Err(CallError::ProtocolViolation(format!(
                    "offer received while negotiation is {:?}",
                    state
                )))
            }
        }

        self.transition(NegotiationState::HaveRemoteOffer);
        if let Err(e) = self.connection.set_remote_description(offer.clone()).await {
            return Err(self.fail(e).await);
        }
        let offered_by = offer.session.clone();
        self.remote_description = Some(offer);
        self.flush_candidates().await;

        let answer = match self.connection.create_answer().await {
            Ok(answer) => SessionDescription {
                session: offered_by,
                ..answer
            },
            Err(e) => return Err(self.fail(e).await),
        };
        self.local_description = Some(answer.clone());
        self.transition(NegotiationState::Connected);

        if let Err(e) = self.signaling.emit(SignalingMessage::Answer(answer.clone())).await {
            return Err(self.fail(e).await);
        }
        info!("Answer sent");
        Ok(OfferOutcome::Answered {
            answer,
            abandoned_local_offer,
        })
    }

    pub async fn receive_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Err(CallError::ProtocolViolation(format!(
                "answer received while negotiation is {:?}",
                self.state
            )));
        }
        if let Some(tag) = answer.session.as_deref() {
            if tag != self.session_id {
                return Err(CallError::ProtocolViolation(format!(
                    "answer belongs to session {}, not {}",
                    tag, self.session_id
                )));
            }
        }

        if let Err(e) = self.connection.set_remote_description(answer.clone()).await {
            return Err(self.fail(e).await);
        }
        self.remote_description = Some(answer);
        self.flush_candidates().await;
        self.transition(NegotiationState::Connected);
        info!("Answer applied");
        Ok(())
    }

    pub async fn receive_candidate(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        if self.state.is_closed() {
            debug!("Dropping remote candidate: negotiation closed");
            return CandidateDisposition::Dropped;
        }
        if !self.buffer.is_pass_through() {
            self.buffer.push(candidate);
            return CandidateDisposition::Buffered;
        }

        match self.connection.add_ice_candidate(candidate).await {
            Ok(()) => CandidateDisposition::Applied,
            Err(e) => {
                warn!("Failed to apply remote candidate: {}", e);
                CandidateDisposition::Rejected
            }
        }
    }

    /// Отправляет локальный кандидат собеседнику; false если движок закрыт
    pub async fn local_candidate_generated(&mut self, candidate: IceCandidate) -> Result<bool> {
        if self.state.is_closed() {
            debug!("Dropping local candidate: negotiation closed");
            return Ok(false);
        }
        self.signaling
            .emit(SignalingMessage::Candidate(candidate))
            .await?;
        Ok(true)
    }

    pub async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.transition(NegotiationState::Closed);
        if let Err(e) = self.connection.close().await {
            warn!("Error while closing connection: {}", e);
        }
    }
}
