use thiserror::Error;

/// Failures a scan can run into. A frame with no QR code is not one of
/// them: the decoder simply returns `None`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Permission denied, no device, or the stream could not be started
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// The off-screen rendering surface could not be created
    #[error("rendering surface unavailable ({width}x{height}): {reason}")]
    SurfaceUnavailable {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Static image could not be read or parsed
    #[error("image load failed: {0}")]
    ImageLoadFailed(String),

    /// Frame bytes could not be turned into RGBA pixels
    #[error("frame conversion failed: {0}")]
    Frame(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
