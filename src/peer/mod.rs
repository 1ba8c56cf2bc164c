pub mod connection;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEvents, ConnectionFactory, PeerConnection,
    RtcConnectionFactory, RtcPeer,
};
pub use ice::{analyze_candidates, CandidateBuffer};
pub use negotiation::{CandidateDisposition, GlarePolicy, NegotiationEngine, OfferOutcome};
pub use state::{CallState, NegotiationState, DEFAULT_STUN_URLS, ROOM_FULL_REASON};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
