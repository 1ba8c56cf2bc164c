use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::media::CaptureError;

/// Which camera the capture stream comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Front,
    Back,
}

impl Facing {
    pub fn toggle(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// What to ask the capture device for. Audio is on unless disabled in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub facing: Facing,
    pub audio: bool,
}

/// Captured track owned by the local side
///
/// Cloning shares the same underlying track and live flag; stopping any
/// clone stops them all.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    live: Arc<AtomicBool>,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: rtc.id().to_string(),
            kind,
            live: Arc::new(AtomicBool::new(true)),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Releases the device handle; further frames are refused
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stopped {:?} track {}", self.kind, self.id);
        }
    }

    pub fn rtc(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtc.clone()
    }

    /// Writes one encoded frame to the outbound track
    pub async fn push_frame(&self, data: Bytes, duration: Duration) -> Result<(), CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::TrackEnded(self.id.clone()));
        }
        self.rtc
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| CaptureError::TrackEnded(format!("{}: {}", self.id, e)))
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("live", &self.is_live())
            .finish()
    }
}
