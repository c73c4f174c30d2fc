pub mod convert;
pub mod frame;
pub mod latest;
pub mod v4l2;

use std::future::Future;

pub use frame::{Frame, PixelFormat, Resolution};
pub use latest::{FrameSource, LatestFrameStream};
pub use v4l2::{auto_detect_device, FoundDevice, V4l2Camera};

use crate::error::Result;

/// Platform camera access. Requesting a stream may wait indefinitely for
/// the user to grant permission; a denial or a missing device resolves to
/// `ScanError::CameraUnavailable`.
pub trait CameraCapability {
    type Stream: VideoStream + 'static;

    /// Request a video-only stream
    fn request_video_stream(&mut self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A live camera stream
pub trait VideoStream: Send {
    /// Reported video dimensions, zero until the metadata is known
    fn resolution(&self) -> Resolution;

    /// The current video image
    fn current_frame(&mut self) -> Result<Frame>;

    /// Stop every track of the stream. Calling it again is a no-op.
    fn stop_tracks(&mut self);
}
