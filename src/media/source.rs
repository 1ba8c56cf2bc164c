use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::media::device::{CaptureDevice, CaptureError, CapturedStream};
use crate::media::sink::VideoSink;
use crate::media::track::{Constraints, Facing, LocalTrack, TrackKind};
use crate::peer::connection::PeerConnection;

/// The active local capture configuration
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub stream_id: String,
    pub facing: Facing,
    pub tracks: Vec<LocalTrack>,
}

impl MediaSource {
    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

async fn attach_source(source: &MediaSource, connection: &dyn PeerConnection) -> Result<()> {
    for track in &source.tracks {
        if connection.has_sender(track.kind()).await {
            debug!("Replacing {:?} sender track with {}", track.kind(), track.id());
            connection.replace_track(track).await?;
        } else {
            debug!("Adding {:?} track {}", track.kind(), track.id());
            connection.add_track(track).await?;
        }
    }
    Ok(())
}

impl From<CapturedStream> for MediaSource {
    fn from(stream: CapturedStream) -> Self {
        Self {
            stream_id: stream.id,
            facing: stream.facing,
            tracks: stream.tracks,
        }
    }
}

/// Owns the local capture stream and feeds it to the connection
pub struct MediaSourceController {
    device: Arc<dyn CaptureDevice>,
    selector: Facing,
    audio: bool,
    current: Option<MediaSource>,
    preview: VideoSink,
}

impl MediaSourceController {
    pub fn new(device: Arc<dyn CaptureDevice>, facing: Facing, audio: bool) -> Self {
        Self {
            device,
            selector: facing,
            audio,
            current: None,
            preview: VideoSink::new("local"),
        }
    }

    /// Facing of the source currently held, or the one that will be requested
    pub fn facing(&self) -> Facing {
        self.current
            .as_ref()
            .map(|source| source.facing)
            .unwrap_or(self.selector)
    }

    pub fn current(&self) -> Option<&MediaSource> {
        self.current.as_ref()
    }

    pub fn preview(&self) -> &VideoSink {
        &self.preview
    }

    async fn request(&self, selector: Facing) -> Result<MediaSource> {
        let stream = self
            .device
            .request_stream(Constraints {
                facing: selector,
                audio: self.audio,
            })
            .await?;
        Ok(MediaSource::from(stream))
    }

    /// Makes `source` current, stopping whatever was held before
    fn commit(&mut self, source: MediaSource) {
        if let Some(previous) = self.current.take() {
            debug!("Stopping tracks of stream {}", previous.stream_id);
            previous.stop();
        }
        info!(
            "Using {} camera stream {} ({} tracks)",
            source.facing,
            source.stream_id,
            source.tracks.len()
        );
        self.preview.bind(source.stream_id.clone());
        self.selector = source.facing;
        self.current = Some(source);
    }

    /// Requests a stream for `selector` and makes it the current source
    ///
    /// The previous tracks are stopped only once the new stream is in hand,
    /// so a failed request leaves the current source untouched.
    pub async fn acquire(&mut self, selector: Facing) -> Result<()> {
        let source = self.request(selector).await?;
        self.commit(source);
        Ok(())
    }

    /// Puts every current track on the connection
    ///
    /// A track whose kind already has a sender replaces that sender's track
    /// in place; otherwise a new sender is added.
    pub async fn attach_to(&self, connection: &dyn PeerConnection) -> Result<()> {
        match &self.current {
            Some(source) => attach_source(source, connection).await,
            None => {
                debug!("No local media to attach");
                Ok(())
            }
        }
    }

    /// Flips front/back camera without renegotiating
    ///
    /// The new stream becomes current only after the connection took it. If
    /// attaching fails, the new tracks are stopped and the previous ones are
    /// put back on the connection.
    pub async fn switch_source(&mut self, connection: Option<&dyn PeerConnection>) -> Result<Facing> {
        let next = self.facing().toggle();
        let source = match self.request(next).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Camera switch to {} failed: {}", next, e);
                return Err(e);
            }
        };

        if let Some(connection) = connection {
            if let Err(e) = attach_source(&source, connection).await {
                warn!("Connection refused {} camera stream: {}", next, e);
                source.stop();
                if let Some(previous) = &self.current {
                    if let Err(e) = attach_source(previous, connection).await {
                        warn!("Failed to restore stream {}: {}", previous.stream_id, e);
                    }
                }
                return Err(CaptureError::AttachFailed(e.to_string()).into());
            }
        }
        self.commit(source);
        Ok(next)
    }

    /// Stops every held track and blanks the preview
    pub fn release(&mut self) {
        if let Some(source) = self.current.take() {
            debug!("Releasing local stream {}", source.stream_id);
            source.stop();
        }
        self.preview.clear();
    }
}

impl Drop for MediaSourceController {
    fn drop(&mut self) {
        self.release();
    }
}
