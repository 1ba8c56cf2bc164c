pub mod device;
pub mod sink;
pub mod source;
pub mod track;

pub use device::{CaptureDevice, CaptureError, CapturedStream, StaticCaptureDevice};
pub use sink::VideoSink;
pub use source::{MediaSource, MediaSourceController};
pub use track::{Constraints, Facing, LocalTrack, TrackKind};
