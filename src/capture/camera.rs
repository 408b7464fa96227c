//! Camera producer
//!
//! Runs the camera on its own capture thread at the device's cadence. Every
//! frame goes into a [`FrameBox`] for the compositor and, when recording to
//! a separate file, into the camera's own [`Muxer`].
//!
//! Start and stop requests are coalesced: while one toggle is in flight, at
//! most one further intent is kept, and a newer request replaces it.

use super::frame_box::{FrameBox, FrameSource, TimedFrame};
use super::sample::{Sample, VideoFrame};
use super::traits::Resolution;
use crate::recorder::muxer::{Muxer, MuxerSummary};
use crate::recorder::pause::PauseClock;
use crate::utils::clock::Clock;
use crate::utils::error::{CameraError, WriterError};
use crate::writer::{TrackSpec, WriterFactory};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Consecutive read errors after which the device is considered lost
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Called on the capture thread once the device stops delivering frames
pub type DeviceLostHook = Arc<dyn Fn(CameraError) + Send + Sync>;

/// How long `start` waits for the device to report its format
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Negotiated camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraFormat {
    pub resolution: Resolution,
    pub fps: u32,
}

/// An opened camera
///
/// Lives on the capture thread only, so it does not need to be `Send`.
pub trait CameraDevice {
    fn format(&self) -> CameraFormat;

    /// Next RGBA frame; `Ok(None)` when nothing arrived within a short wait
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError>;

    fn close(&mut self) {}
}

/// Opens a [`CameraDevice`] on the calling thread
pub trait CameraDeviceOpener: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Where camera frames go besides the frame box
#[derive(Clone)]
pub enum CameraOutput {
    /// Frame box only (live preview, real-time composite)
    Preview,
    /// Also record to a separate container
    Record {
        writers: Arc<dyn WriterFactory>,
        path: PathBuf,
        pause: PauseClock,
    },
}

impl std::fmt::Debug for CameraOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraOutput::Preview => write!(f, "Preview"),
            CameraOutput::Record { path, .. } => f.debug_struct("Record").field("path", path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
enum Intent {
    Start(CameraOutput),
    Stop,
}

/// A finished separate-file camera recording
#[derive(Debug, Clone)]
pub struct CameraTake {
    pub path: PathBuf,
    pub summary: MuxerSummary,
}

struct Running {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    muxer: Option<Arc<Muxer>>,
    format: CameraFormat,
}

#[derive(Default)]
struct Control {
    running: Option<Running>,
    in_flight: bool,
    pending: Option<Intent>,
}

/// Independent camera capture loop feeding a [`FrameBox`]
pub struct CameraProducer {
    opener: Arc<dyn CameraDeviceOpener>,
    clock: Arc<dyn Clock>,
    frame_box: Arc<FrameBox>,
    control: Mutex<Control>,
    finished: Mutex<Option<Result<CameraTake, WriterError>>>,
    frames: Arc<AtomicU64>,
    open_timeout: Duration,
    on_lost: Mutex<Option<DeviceLostHook>>,
}

impl CameraProducer {
    pub fn new(opener: Arc<dyn CameraDeviceOpener>, clock: Arc<dyn Clock>) -> Self {
        Self {
            opener,
            clock,
            frame_box: Arc::new(FrameBox::new()),
            control: Mutex::new(Control::default()),
            finished: Mutex::new(None),
            frames: Arc::new(AtomicU64::new(0)),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            on_lost: Mutex::new(None),
        }
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Notify `hook` when a running device is lost; applies from the next start
    pub fn set_device_lost_hook(&self, hook: Option<DeviceLostHook>) {
        *self.on_lost.lock() = hook;
    }

    pub fn frame_box(&self) -> Arc<FrameBox> {
        self.frame_box.clone()
    }

    pub fn is_running(&self) -> bool {
        self.control.lock().running.is_some()
    }

    pub fn format(&self) -> Option<CameraFormat> {
        self.control.lock().running.as_ref().map(|r| r.format)
    }

    /// Frames captured since the producer was created
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Start feeding the frame box only
    pub fn start_preview(&self) -> Result<(), CameraError> {
        self.request(Intent::Start(CameraOutput::Preview))
    }

    /// Start feeding the frame box and recording to `path`
    pub fn start_recording(
        &self,
        writers: Arc<dyn WriterFactory>,
        path: PathBuf,
        pause: PauseClock,
    ) -> Result<(), CameraError> {
        self.request(Intent::Start(CameraOutput::Record {
            writers,
            path,
            pause,
        }))
    }

    pub fn start(&self, output: CameraOutput) -> Result<(), CameraError> {
        self.request(Intent::Start(output))
    }

    /// Stop capturing; a separate-file recording is finalized into
    /// [`CameraProducer::take_finished`]
    pub fn stop(&self) -> Result<(), CameraError> {
        self.request(Intent::Stop)
    }

    /// Result of the last separate-file recording, once
    pub fn take_finished(&self) -> Option<Result<CameraTake, WriterError>> {
        self.finished.lock().take()
    }

    /// Run `intent`, or park it behind the toggle already in flight
    ///
    /// Only the caller that runs a toggle sees its error; coalesced intents
    /// report failures through the log.
    fn request(&self, intent: Intent) -> Result<(), CameraError> {
        {
            let mut control = self.control.lock();
            if control.in_flight {
                if let Some(replaced) = control.pending.replace(intent) {
                    tracing::debug!("Coalesced camera intent {:?}", replaced);
                }
                return Ok(());
            }
            control.in_flight = true;
        }

        let result = self.execute(intent);

        loop {
            let next = {
                let mut control = self.control.lock();
                match control.pending.take() {
                    Some(next) => next,
                    None => {
                        control.in_flight = false;
                        break;
                    }
                }
            };
            if let Err(e) = self.execute(next) {
                tracing::warn!("Queued camera toggle failed: {}", e);
            }
        }

        result
    }

    fn execute(&self, intent: Intent) -> Result<(), CameraError> {
        match intent {
            Intent::Start(output) => {
                // A start while running restarts with the new output
                self.shutdown();
                let running = self.launch(output)?;
                self.control.lock().running = Some(running);
                Ok(())
            }
            Intent::Stop => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Stop the capture thread and finalize its recording, if any
    fn shutdown(&self) {
        let Some(running) = self.control.lock().running.take() else {
            return;
        };
        running.stop.store(true, Ordering::SeqCst);
        if running.thread.join().is_err() {
            tracing::error!("Camera capture thread panicked");
        }

        if let Some(muxer) = running.muxer {
            let path = muxer.output_path();
            let result = muxer.finalize().map(|summary| CameraTake { path, summary });
            if let Err(e) = &result {
                tracing::warn!("Camera recording discarded: {}", e);
            }
            *self.finished.lock() = Some(result);
        }
        tracing::info!("Camera stopped");
    }

    fn launch(&self, output: CameraOutput) -> Result<Running, CameraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (format_tx, format_rx) = mpsc::channel::<Result<CameraFormat, CameraError>>();
        let (go_tx, go_rx) = mpsc::channel::<Option<Arc<Muxer>>>();

        let worker = CaptureWorker {
            opener: self.opener.clone(),
            clock: self.clock.clone(),
            frame_box: self.frame_box.clone(),
            frames: self.frames.clone(),
            stop: stop.clone(),
            on_lost: self.on_lost.lock().clone(),
        };
        let thread = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || worker.run(format_tx, go_rx))
            .map_err(|e| CameraError::Open(e.to_string()))?;

        let abort = |error: CameraError| {
            stop.store(true, Ordering::SeqCst);
            let _ = go_tx.send(None);
            error
        };

        let format = match format_rx.recv_timeout(self.open_timeout) {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(abort(e));
            }
            Err(_) => {
                // The thread exits by itself once the device opens or fails
                tracing::warn!("Camera {} did not open in time", self.opener.name());
                return Err(abort(CameraError::OpenTimeout(self.open_timeout)));
            }
        };

        let muxer = match output {
            CameraOutput::Preview => None,
            CameraOutput::Record {
                writers,
                path,
                pause,
            } => {
                let muxer = writers
                    .create(&path)
                    .map(|writer| Arc::new(Muxer::new("camera", writer, pause)))
                    .and_then(|muxer| {
                        muxer
                            .add_track(TrackSpec::Video {
                                resolution: format.resolution,
                                frame_rate: format.fps,
                            })
                            .map(|_| muxer)
                    });
                match muxer {
                    Ok(muxer) => Some(muxer),
                    Err(e) => {
                        let error = abort(CameraError::Writer(e));
                        let _ = thread.join();
                        return Err(error);
                    }
                }
            }
        };

        if go_tx.send(muxer.clone()).is_err() {
            if let Some(muxer) = &muxer {
                muxer.cancel();
            }
            let _ = thread.join();
            return Err(CameraError::Open("capture thread exited".to_string()));
        }

        tracing::info!(
            "Camera {} started: {} @ {}fps{}",
            self.opener.name(),
            format.resolution,
            format.fps,
            if muxer.is_some() { ", recording" } else { "" }
        );

        Ok(Running {
            stop,
            thread,
            muxer,
            format,
        })
    }
}

impl FrameSource for CameraProducer {
    fn snapshot(&self) -> Option<TimedFrame> {
        self.frame_box.snapshot()
    }
}

impl Drop for CameraProducer {
    fn drop(&mut self) {
        if let Some(running) = self.control.get_mut().running.take() {
            running.stop.store(true, Ordering::SeqCst);
            let _ = running.thread.join();
            if let Some(muxer) = running.muxer {
                muxer.cancel();
            }
        }
    }
}

/// State moved onto the capture thread
struct CaptureWorker {
    opener: Arc<dyn CameraDeviceOpener>,
    clock: Arc<dyn Clock>,
    frame_box: Arc<FrameBox>,
    frames: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    on_lost: Option<DeviceLostHook>,
}

impl CaptureWorker {
    fn run(
        self,
        format_tx: mpsc::Sender<Result<CameraFormat, CameraError>>,
        go_rx: mpsc::Receiver<Option<Arc<Muxer>>>,
    ) {
        let mut device = match self.opener.open() {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Failed to open camera {}: {}", self.opener.name(), e);
                let _ = format_tx.send(Err(e));
                return;
            }
        };
        if format_tx.send(Ok(device.format())).is_err() {
            device.close();
            return;
        }

        // None: start was aborted after the device opened
        let muxer = match go_rx.recv() {
            Ok(Some(muxer)) => Some(muxer),
            Ok(None) if self.stop.load(Ordering::SeqCst) => {
                device.close();
                return;
            }
            Ok(None) => None,
            Err(_) => {
                device.close();
                return;
            }
        };

        let mut failures = 0u32;
        let mut lost = None;
        while !self.stop.load(Ordering::SeqCst) {
            match device.next_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    let at = self.clock.now();
                    let frame = Arc::new(frame);
                    self.frame_box.write(frame.clone(), at);
                    self.frames.fetch_add(1, Ordering::Relaxed);
                    if let Some(muxer) = &muxer {
                        muxer.append(Sample::camera(VideoFrame::clone(&frame), at));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    tracing::debug!("Failed to capture camera frame: {}", e);
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        let error = CameraError::Lost(format!(
                            "{failures} consecutive read errors, last: {e}"
                        ));
                        tracing::error!("{}", error);
                        lost = Some(error);
                        break;
                    }
                }
            }
        }

        device.close();
        self.frame_box.clear();
        if let (Some(error), Some(hook)) = (lost, &self.on_lost) {
            hook(error);
        }
        tracing::debug!("Camera capture thread stopped");
    }
}

/// Test-pattern camera at a fixed cadence
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    format: CameraFormat,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            format: CameraFormat {
                resolution: Resolution { width, height },
                fps: fps.max(1),
            },
        }
    }
}

impl CameraDeviceOpener for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic-camera"
    }

    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        Ok(Box::new(SyntheticCameraDevice {
            format: self.format,
            index: 0,
        }))
    }
}

struct SyntheticCameraDevice {
    format: CameraFormat,
    index: u64,
}

impl CameraDevice for SyntheticCameraDevice {
    fn format(&self) -> CameraFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        std::thread::sleep(Duration::from_secs_f64(1.0 / self.format.fps as f64));
        self.index += 1;
        let shade = (self.index % 200) as u8 + 40;
        let Resolution { width, height } = self.format.resolution;
        Ok(Some(VideoFrame::solid(width, height, [shade, 96, 160, 255])))
    }
}

/// Camera fed by the host through a [`ManualCameraFeed`]
#[derive(Clone)]
pub struct ManualCamera {
    format: CameraFormat,
    frames: Arc<Mutex<mpsc::Receiver<VideoFrame>>>,
    fail_open: Arc<AtomicBool>,
}

/// Sending half of a [`ManualCamera`]
#[derive(Clone)]
pub struct ManualCameraFeed {
    tx: mpsc::Sender<VideoFrame>,
    fail_open: Arc<AtomicBool>,
}

impl ManualCameraFeed {
    /// Queue a frame for the capture thread; false once the camera is gone
    pub fn push(&self, frame: VideoFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Make subsequent opens fail, as with an unplugged device
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_open.store(unavailable, Ordering::SeqCst);
    }
}

impl ManualCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> (Self, ManualCameraFeed) {
        let (tx, rx) = mpsc::channel();
        let fail_open = Arc::new(AtomicBool::new(false));
        let camera = Self {
            format: CameraFormat {
                resolution: Resolution { width, height },
                fps,
            },
            frames: Arc::new(Mutex::new(rx)),
            fail_open: fail_open.clone(),
        };
        (camera, ManualCameraFeed { tx, fail_open })
    }
}

impl CameraDeviceOpener for ManualCamera {
    fn name(&self) -> &str {
        "manual-camera"
    }

    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CameraError::NotFound("manual camera unavailable".to_string()));
        }
        Ok(Box::new(ManualCameraDevice {
            format: self.format,
            frames: self.frames.clone(),
        }))
    }
}

struct ManualCameraDevice {
    format: CameraFormat,
    frames: Arc<Mutex<mpsc::Receiver<VideoFrame>>>,
}

impl CameraDevice for ManualCameraDevice {
    fn format(&self) -> CameraFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        match self.frames.lock().recv_timeout(Duration::from_millis(10)) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(CameraError::Frame("feed closed".to_string()))
            }
        }
    }
}
