//! Two-party audio/video call sessions over WebRTC
//!
//! A [`SessionController`] owns one call at a time: it drives the
//! offer/answer/ICE exchange through a [`SignalingChannel`], keeps the local
//! capture stream attached to the connection and tears everything down when
//! the call ends.

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::CallConfig;
pub use error::{CallError, Result};
pub use media::{CaptureDevice, CaptureError, Facing, StaticCaptureDevice, VideoSink};
pub use peer::{
    CallState, ConnectionFactory, IceCandidate, NegotiationEngine, NegotiationState,
    PeerConnection, RtcConnectionFactory, SessionDescription,
};
pub use session::{Session, SessionController, SessionEvent};
pub use signaling::{MemoryRelay, SignalingChannel, SignalingMessage, WsSignaling};
