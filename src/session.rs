//! Camera scan session: open the camera, sample frames on a fixed interval
//! and stop at the first frame that decodes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{CameraCapability, VideoStream};
use crate::decoder::QrDecoder;
use crate::error::{Result, ScanError};
use crate::surface::{Surface, SurfaceFactory};
use crate::ScannerConfig;

/// Receives the decoded payload, at most once per session
pub type SuccessCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// Everything a running session owns. Only touched under the mutex, and
/// never across an await point.
struct State<S, V> {
    active: bool,
    stream: Option<S>,
    surface: Option<V>,
}

impl<S: VideoStream, V: Surface> State<S, V> {
    fn idle() -> Self {
        Self {
            active: false,
            stream: None,
            surface: None,
        }
    }

    /// Returns whether anything was still held
    fn release(&mut self) -> bool {
        let held = self.active || self.stream.is_some() || self.surface.is_some();
        self.active = false;
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        held
    }
}

fn lock<S, V>(state: &Mutex<State<S, V>>) -> MutexGuard<'_, State<S, V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a single polling tick ended with
#[derive(Debug, PartialEq, Eq)]
enum Tick {
    /// Session was stopped since the previous tick
    Stopped,
    /// Stream dimensions still unknown, nothing sampled
    Waiting,
    /// Frame sampled, no code in it
    NotFound,
    Decoded(String),
    /// Scanning cannot continue
    Aborted(ScanError),
}

fn poll_once<S, F, D>(state: &mut State<S, F::Surface>, surfaces: &F, decoder: &D) -> Tick
where
    S: VideoStream,
    F: SurfaceFactory,
    D: QrDecoder,
{
    if !state.active {
        return Tick::Stopped;
    }
    let Some(stream) = state.stream.as_mut() else {
        return Tick::Stopped;
    };

    let resolution = stream.resolution();
    if !resolution.is_known() {
        debug!("Video metadata not loaded yet, skipping tick");
        return Tick::Waiting;
    }

    if state.surface.is_none() {
        match surfaces.create(resolution) {
            Ok(surface) => state.surface = Some(surface),
            Err(e) => return Tick::Aborted(e),
        }
    }
    let Some(surface) = state.surface.as_mut() else {
        return Tick::Stopped;
    };

    counter!("qrscan_ticks_total").increment(1);

    let frame = match stream.current_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Could not grab frame: {}", e);
            return Tick::NotFound;
        }
    };
    if let Err(e) = surface.draw(&frame) {
        warn!("Could not draw frame {}: {}", frame.meta.sequence, e);
        return Tick::NotFound;
    }

    let sample = surface.pixels();
    match decoder.decode(sample.data, sample.width, sample.height) {
        Some(code) if !code.data.is_empty() => {
            // No later tick may act on this session
            state.active = false;
            counter!("qrscan_decodes_total").increment(1);
            Tick::Decoded(code.data)
        }
        _ => Tick::NotFound,
    }
}

async fn poll_loop<S, F, D>(
    state: Arc<Mutex<State<S, F::Surface>>>,
    surfaces: Arc<F>,
    decoder: Arc<D>,
    period: Duration,
    on_success: SuccessCallback,
) where
    S: VideoStream,
    F: SurfaceFactory,
    D: QrDecoder,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let outcome = {
            let mut guard = lock(&state);
            poll_once(&mut guard, &*surfaces, &*decoder)
        };

        match outcome {
            Tick::Stopped => {
                debug!("Session stopped, cancelling timer");
                break;
            }
            Tick::Waiting | Tick::NotFound => {}
            Tick::Decoded(data) => {
                info!("QR data: {}", data);
                on_success(data);
                lock(&state).release();
                break;
            }
            Tick::Aborted(e) => {
                error!("Scanning aborted: {}", e);
                counter!("qrscan_failures_total", "kind" => "surface").increment(1);
                lock(&state).release();
                break;
            }
        }
    }
}

/// One scan attempt on one camera
pub struct CameraScanSession<C, F, D>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
{
    camera: C,
    surfaces: Arc<F>,
    decoder: Arc<D>,
    poll_interval: Duration,
    state: Arc<Mutex<State<C::Stream, F::Surface>>>,
    poller: Option<JoinHandle<()>>,
}

impl<C, F, D> CameraScanSession<C, F, D>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
{
    pub fn new(camera: C, surfaces: F, decoder: D, config: &ScannerConfig) -> Self {
        Self {
            camera,
            surfaces: Arc::new(surfaces),
            decoder: Arc::new(decoder),
            poll_interval: config.poll_interval(),
            state: Arc::new(Mutex::new(State::idle())),
            poller: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// True between a successful `start` and the first decode or `stop`
    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// True while the polling timer is still scheduled
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Open the camera and start sampling.
    ///
    /// Waits for the platform to grant or deny the stream. On success the
    /// polling loop runs until `on_success` has been called once or the
    /// session is stopped. Calling `start` on an active session does nothing.
    #[instrument(skip_all)]
    pub async fn start<G>(&mut self, on_success: G) -> Result<()>
    where
        G: FnOnce(String) + Send + 'static,
        F: 'static,
        D: 'static,
    {
        if self.is_active() {
            warn!("Scan session already running");
            return Ok(());
        }
        // A previous run may have ended on its own; make sure nothing lingers
        self.stop();

        info!("Requesting camera stream");
        let mut stream = match self.camera.request_video_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Error opening camera: {}", e);
                counter!("qrscan_failures_total", "kind" => "camera").increment(1);
                return Err(e);
            }
        };

        let resolution = stream.resolution();
        let surface = if resolution.is_known() {
            match self.surfaces.create(resolution) {
                Ok(surface) => Some(surface),
                Err(e) => {
                    error!("Rendering surface unavailable: {}", e);
                    counter!("qrscan_failures_total", "kind" => "surface").increment(1);
                    stream.stop_tracks();
                    return Err(e);
                }
            }
        } else {
            debug!("Stream metadata pending, surface will be created on first tick");
            None
        };

        {
            let mut state = lock(&self.state);
            state.active = true;
            state.stream = Some(stream);
            state.surface = surface;
        }

        info!(
            "Scanning {} every {:?}",
            resolution, self.poll_interval
        );
        self.poller = Some(tokio::spawn(poll_loop(
            self.state.clone(),
            self.surfaces.clone(),
            self.decoder.clone(),
            self.poll_interval,
            Box::new(on_success),
        )));
        Ok(())
    }

    /// Stop the camera tracks, release the surface and cancel the timer.
    /// Safe to call any number of times, before or after `start`.
    pub fn stop(&mut self) {
        let held = lock(&self.state).release();
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        if held {
            info!("Camera stopped");
        }
    }
}

impl<C, F, D> Drop for CameraScanSession<C, F, D>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
{
    fn drop(&mut self) {
        lock(&self.state).release();
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
