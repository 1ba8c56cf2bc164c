use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::media::track::{Constraints, Facing, LocalTrack, TrackKind};
use crate::utils::random_id;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Track ended: {0}")]
    TrackEnded(String),

    /// The stream was captured but the connection would not take it
    #[error("Failed to attach stream: {0}")]
    AttachFailed(String),
}

/// Stream handed out by a capture device
#[derive(Debug, Clone)]
pub struct CapturedStream {
    pub id: String,
    pub facing: Facing,
    pub tracks: Vec<LocalTrack>,
}

/// Capture hardware as seen by the session
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn request_stream(&self, constraints: Constraints) -> Result<CapturedStream, CaptureError>;
}

/// Capture device backed by webrtc-rs sample tracks
///
/// Frames are pushed by whoever owns the encoder through
/// [`LocalTrack::push_frame`]. Which cameras exist and whether permission is
/// granted can be changed at runtime, e.g. when a camera is unplugged.
pub struct StaticCaptureDevice {
    front: AtomicBool,
    back: AtomicBool,
    permitted: AtomicBool,
    requests: AtomicUsize,
}

impl StaticCaptureDevice {
    pub fn new() -> Self {
        Self {
            front: AtomicBool::new(true),
            back: AtomicBool::new(true),
            permitted: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }

    /// Device with a single front camera (typical laptop)
    pub fn front_only() -> Self {
        let device = Self::new();
        device.set_available(Facing::Back, false);
        device
    }

    pub fn set_available(&self, facing: Facing, available: bool) {
        match facing {
            Facing::Front => self.front.store(available, Ordering::SeqCst),
            Facing::Back => self.back.store(available, Ordering::SeqCst),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::SeqCst);
    }

    pub fn is_available(&self, facing: Facing) -> bool {
        match facing {
            Facing::Front => self.front.load(Ordering::SeqCst),
            Facing::Back => self.back.load(Ordering::SeqCst),
        }
    }

    /// Number of stream requests served or refused so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for StaticCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for StaticCaptureDevice {
    async fn request_stream(&self, constraints: Constraints) -> Result<CapturedStream, CaptureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if !self.permitted.load(Ordering::SeqCst) {
            warn!("Camera access denied");
            return Err(CaptureError::PermissionDenied("camera access denied".into()));
        }
        if !self.is_available(constraints.facing) {
            warn!("No {} camera present", constraints.facing);
            return Err(CaptureError::DeviceUnavailable(format!(
                "no {} camera",
                constraints.facing
            )));
        }

        let stream_id = random_id();
        let mut tracks = Vec::with_capacity(2);

        let video = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            format!("video-{}", stream_id),
            stream_id.clone(),
        );
        tracks.push(LocalTrack::new(TrackKind::Video, Arc::new(video)));

        if constraints.audio {
            let audio = TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                format!("audio-{}", stream_id),
                stream_id.clone(),
            );
            tracks.push(LocalTrack::new(TrackKind::Audio, Arc::new(audio)));
        }

        debug!(
            "Opened {} camera stream {} with {} tracks",
            constraints.facing,
            stream_id,
            tracks.len()
        );

        Ok(CapturedStream {
            id: stream_id,
            facing: constraints.facing,
            tracks,
        })
    }
}
