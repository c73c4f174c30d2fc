//! Continuous capture into a single latest-frame slot
//!
//! Camera drivers hand buffers out oldest first. Sampling them once per
//! polling tick would decode frames that are several ticks old, so a
//! capture thread drains the source as fast as it produces and only the
//! newest frame is kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info};

use super::frame::{Frame, Resolution};
use super::VideoStream;
use crate::error::{Result, ScanError};

/// Pause after a failed read before trying again
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// A blocking frame producer, drained on the capture thread
pub trait FrameSource: Send + 'static {
    /// Next frame in delivery order. `Ok(None)` means nothing arrived
    /// within the source's own timeout.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// [`VideoStream`] that always samples the most recently captured frame
pub struct LatestFrameStream {
    resolution: Resolution,
    slot: Arc<ArcSwapOption<Frame>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LatestFrameStream {
    /// Start draining `source` on its own thread
    pub fn spawn<S: FrameSource>(source: S, resolution: Resolution) -> Result<Self> {
        let slot = Arc::new(ArcSwapOption::empty());
        let running = Arc::new(AtomicBool::new(true));

        let worker = thread::Builder::new()
            .name("qrscan-capture".into())
            .spawn({
                let slot = slot.clone();
                let running = running.clone();
                move || capture_loop(source, &slot, &running)
            })
            .map_err(|e| ScanError::CameraUnavailable(format!("capture thread: {e}")))?;

        Ok(Self {
            resolution,
            slot,
            running,
            worker: Some(worker),
        })
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    slot: &ArcSwapOption<Frame>,
    running: &AtomicBool,
) {
    let mut captured = 0u64;
    while running.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                captured += 1;
                slot.store(Some(Arc::new(frame)));
            }
            Ok(None) => {}
            Err(e) => {
                error!("Capture error: {}", e);
                thread::sleep(RETRY_DELAY);
            }
        }
    }
    // Dropping the source stops the device stream
    drop(source);
    info!("Capture stream stopped after {} frames", captured);
}

impl VideoStream for LatestFrameStream {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if self.worker.is_none() {
            return Err(ScanError::CameraUnavailable("stream stopped".into()));
        }
        self.slot
            .load_full()
            .map(|frame| Frame::clone(&frame))
            .ok_or_else(|| ScanError::Frame("no frame captured yet".into()))
    }

    /// Signals the capture thread and returns without waiting for it. The
    /// thread releases the device once its pending dequeue returns.
    fn stop_tracks(&mut self) {
        if self.worker.take().is_none() {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.slot.store(None);
        debug!("Capture stream stop requested");
    }
}

impl Drop for LatestFrameStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use bytes::Bytes;

    use super::*;
    use crate::capture::PixelFormat;

    /// Hands frames out oldest first, like a driver queue
    struct FifoSource {
        queued: VecDeque<Frame>,
        delivered: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl FifoSource {
        fn new(count: u64) -> Self {
            Self {
                queued: (1..=count)
                    .map(|seq| {
                        Frame::new(Bytes::from(vec![seq as u8; 4]), 1, 1, PixelFormat::Rgba32, seq)
                    })
                    .collect(),
                delivered: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for FifoSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            match self.queued.pop_front() {
                Some(frame) => {
                    self.delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(frame))
                }
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }

    impl Drop for FifoSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_samples_newest_of_queued_frames() {
        let source = FifoSource::new(4);
        let delivered = source.delivered.clone();
        let mut stream = LatestFrameStream::spawn(source, Resolution::new(1, 1)).unwrap();

        wait_for(|| delivered.load(Ordering::SeqCst) == 4);
        let frame = stream.current_frame().unwrap();
        assert_eq!(frame.meta.sequence, 4);
        assert_eq!(&frame.data[..], &[4, 4, 4, 4]);

        // sampling again does not dequeue anything older
        assert_eq!(stream.current_frame().unwrap().meta.sequence, 4);
    }

    #[test]
    fn test_no_frame_yet() {
        let mut stream = LatestFrameStream::spawn(FifoSource::new(0), Resolution::new(1, 1)).unwrap();
        assert!(matches!(stream.current_frame(), Err(ScanError::Frame(_))));
    }

    #[test]
    fn test_stop_releases_source() {
        let source = FifoSource::new(2);
        let dropped = source.dropped.clone();
        let mut stream = LatestFrameStream::spawn(source, Resolution::new(1, 1)).unwrap();

        stream.stop_tracks();
        wait_for(|| dropped.load(Ordering::SeqCst));
        assert!(matches!(
            stream.current_frame(),
            Err(ScanError::CameraUnavailable(_))
        ));

        stream.stop_tracks();
    }
}
