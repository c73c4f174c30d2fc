//! V4L2 camera access with memory-mapped streaming

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{Frame, FrameMetadata, PixelFormat, Resolution};
use super::latest::{FrameSource, LatestFrameStream};
use super::CameraCapability;
use crate::error::{Result, ScanError};
use crate::CameraConfig;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

fn fourcc_for(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Rgba32 => FourCC::new(b"AB24"),
        PixelFormat::Nv12 => FourCC::new(b"NV12"),
    }
}

fn format_for(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"AB24" => Some(PixelFormat::Rgba32),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> ScanError {
    ScanError::CameraUnavailable(format!("{context}: {e}"))
}

/// How long one dequeue may block before the capture thread rechecks
/// whether it should stop
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// Camera capability backed by a V4L2 device node
pub struct V4l2Camera {
    config: CameraConfig,
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

fn open(config: CameraConfig) -> Result<V4l2Source> {
    let path = &config.device.path;
    info!("Opening V4L2 camera: {}", path);

    let device = Device::with_path(path).map_err(|e| unavailable(path, e))?;

    let caps = device
        .query_caps()
        .map_err(|e| unavailable("query capabilities", e))?;
    info!("Device: {} ({})", caps.card, caps.driver);

    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(ScanError::CameraUnavailable(format!(
            "{path} doesn't support video capture"
        )));
    }

    let mut fmt = device.format().map_err(|e| unavailable("read format", e))?;
    fmt.width = config.width;
    fmt.height = config.height;
    fmt.fourcc = fourcc_for(config.format);

    // The driver may pick something else; trust what it reports back
    let fmt = device
        .set_format(&fmt)
        .map_err(|e| unavailable("set format", e))?;
    let format = format_for(fmt.fourcc).ok_or_else(|| {
        ScanError::CameraUnavailable(format!("unsupported pixel format {}", fmt.fourcc))
    })?;

    if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
        warn!("Could not set {} fps: {}", config.fps, e);
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
        .map_err(|e| unavailable("start stream", e))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    info!(
        "Capture stream started: {}x{} {:?} with {} buffers",
        fmt.width, fmt.height, format, config.buffer_count
    );

    Ok(V4l2Source {
        _device: device,
        stream,
        resolution: Resolution::new(fmt.width, fmt.height),
        stride: fmt.stride,
        format,
        sequence: 0,
    })
}

impl CameraCapability for V4l2Camera {
    type Stream = LatestFrameStream;

    async fn request_video_stream(&mut self) -> Result<LatestFrameStream> {
        // Opening the node and negotiating formats are blocking ioctls
        let config = self.config.clone();
        let source = tokio::task::spawn_blocking(move || open(config))
            .await
            .map_err(|e| unavailable("open task", e))??;

        let resolution = source.resolution;
        LatestFrameStream::spawn(source, resolution)
    }
}

/// Mmap stream drained by the capture thread
struct V4l2Source {
    _device: Device,
    stream: MmapStream<'static>,
    resolution: Resolution,
    stride: u32,
    format: PixelFormat,
    sequence: u64,
}

impl FrameSource for V4l2Source {
    #[instrument(level = "trace", skip(self))]
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (buf, meta) = match self.stream.next() {
            Ok(dequeued) => dequeued,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(ScanError::Frame(format!("dequeue: {e}"))),
        };
        let timestamp = Instant::now();

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;

        Ok(Some(Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.resolution.width,
                height: self.resolution.height,
                stride: self.stride,
                format: self.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            timestamp,
        }))
    }
}

/// Auto-detect the first capture device offering MJPEG or YUYV
pub async fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"MJPG") {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
            } else if fmt.fourcc == FourCC::new(b"YUYV") {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, PixelFormat::Yuyv4));
            }
        }
    }

    Err(ScanError::CameraUnavailable(
        "no suitable capture device found".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping_is_symmetric() {
        for format in [
            PixelFormat::Mjpeg,
            PixelFormat::Yuyv4,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba32,
            PixelFormat::Nv12,
        ] {
            assert_eq!(format_for(fourcc_for(format)), Some(format));
        }
        assert_eq!(format_for(FourCC::new(b"H264")), None);
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let mut config = CameraConfig::default();
        config.device.path = "/dev/qrscan-does-not-exist".into();

        let mut camera = V4l2Camera::new(config);
        let result = camera.request_video_stream().await;
        assert!(matches!(result, Err(ScanError::CameraUnavailable(_))));
    }
}
