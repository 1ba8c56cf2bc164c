use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::logger::describe_candidate;
use crate::media::{LocalTrack, TrackKind};
use crate::peer::state::DEFAULT_STUN_URLS;
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;

/// Что соединение сообщает наружу
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// Locally gathered candidate, to be trickled to the peer
    LocalCandidate(IceCandidate),
    /// Remote media arrived on the given stream id
    RemoteStream(String),
    /// Transport gave up; the session cannot continue
    Failed(String),
}

/// Connection callback tagged with the session epoch that created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub epoch: u64,
    pub kind: ConnectionEventKind,
}

pub type ConnectionEvents = mpsc::UnboundedSender<ConnectionEvent>;

/// The single underlying connection object driven by negotiation
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Creates an offer and installs it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Creates an answer to the applied remote offer and installs it locally
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Drops the outstanding local offer, back to a stable state
    async fn rollback_local_offer(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn has_sender(&self, kind: TrackKind) -> bool;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Swaps the track of the existing sender of the same kind
    async fn replace_track(&self, track: &LocalTrack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds a fresh connection for each session
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self, epoch: u64, events: ConnectionEvents) -> Result<Arc<dyn PeerConnection>>;
}

/// ========== webrtc-rs ==========

/// Creates webrtc-rs peer connections
#[derive(Debug, Clone, Default)]
pub struct RtcConnectionFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcConnectionFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }

    pub fn ice_servers(&self) -> &[ServerConfig] {
        &self.ice_servers
    }

    pub fn rtc_config(&self) -> RTCConfiguration {
        rtc_config(&self.ice_servers)
    }
}

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    async fn create(&self, epoch: u64, events: ConnectionEvents) -> Result<Arc<dyn PeerConnection>> {
        let peer = RtcPeer::new(epoch, &self.ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = if servers.is_empty() {
        vec![RTCIceServer {
            urls: DEFAULT_STUN_URLS.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }]
    } else {
        get_user_ice_servers(servers)
    };

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn rtc_err(what: &str, e: impl std::fmt::Display) -> CallError {
    CallError::NegotiationFailure(format!("{}: {}", what, e))
}

/// webrtc-rs peer connection behind the [`PeerConnection`] seam
pub struct RtcPeer {
    epoch: u64,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

impl RtcPeer {
    pub async fn new(epoch: u64, servers: &[ServerConfig], events: ConnectionEvents) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| rtc_err("Failed to register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| rtc_err("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(servers))
                .await
                .map_err(|e| rtc_err("Failed to create peer connection", e))?,
        );

        // Обработчик для локальных кандидатов
        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate::from(init);
                            describe_candidate("local", &candidate);
                            let event = ConnectionEvent {
                                epoch,
                                kind: ConnectionEventKind::LocalCandidate(candidate),
                            };
                            if tx.send(event).is_err() {
                                debug!("Session gone, local candidate dropped");
                            }
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    },
                    None => debug!("ICE candidate gathering completed"),
                }
            })
        }));

        let tx = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let stream_id = track.stream_id();
                    debug!("Remote {:?} track on stream {}", track.kind(), stream_id);
                    let _ = tx.send(ConnectionEvent {
                        epoch,
                        kind: ConnectionEventKind::RemoteStream(stream_id),
                    });
                })
            },
        ));

        let tx = events;
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!("Peer connection state changed to: {:?}", st);
                if st == RTCPeerConnectionState::Failed {
                    let _ = tx.send(ConnectionEvent {
                        epoch,
                        kind: ConnectionEventKind::Failed("peer connection failed".into()),
                    });
                }
            })
        }));

        info!("Created peer connection for epoch {}", epoch);

        Ok(Self {
            epoch,
            pc,
            senders: Mutex::new(HashMap::new()),
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn inner(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::NegotiationFailure("No local description".into()))?;
        SessionDescription::from_rtc(&desc)
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| rtc_err("Failed to create offer", e))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| rtc_err("Failed to set local description", e))?;
        self.local_description().await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| rtc_err("Failed to create answer", e))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| rtc_err("Failed to set local description", e))?;
        self.local_description().await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(|e| rtc_err("Failed to set remote description", e))
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        // rollback needs a non-empty body, reuse the pending offer
        let mut rollback = self
            .pc
            .pending_local_description()
            .await
            .ok_or_else(|| CallError::NegotiationFailure("No local offer to roll back".into()))?;
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| rtc_err("Failed to roll back local offer", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| rtc_err("Failed to add ICE candidate", e))
    }

    async fn has_sender(&self, kind: TrackKind) -> bool {
        self.senders.lock().await.contains_key(&kind)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.rtc())
            .await
            .map_err(|e| rtc_err("Failed to add track", e))?;

        // RTCP has to be drained for the interceptors to work
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().await.insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self
            .senders
            .lock()
            .await
            .get(&track.kind())
            .cloned()
            .ok_or_else(|| {
                CallError::NegotiationFailure(format!("No {:?} sender to replace", track.kind()))
            })?;
        sender
            .replace_track(Some(track.rtc()))
            .await
            .map_err(|e| rtc_err("Failed to replace track", e))
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().await.clear();
        self.pc
            .close()
            .await
            .map_err(|e| rtc_err("Failed to close peer connection", e))
    }
}
