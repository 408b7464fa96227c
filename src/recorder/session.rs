//! Session controller
//!
//! Owns the platform capture session, the primary [`Muxer`] and the pause
//! clock. Capture callbacks run through [`SessionPipeline`], which filters
//! and optionally composites each sample before it reaches the muxer.

use super::muxer::{AppendOutcome, DropReason, Muxer, MuxerState, MuxerSummary};
use super::pause::PauseClock;
use super::state::{RecordingConfig, RecordingEvent, SessionState};
use crate::capture::permissions::PermissionCheck;
use crate::capture::sample::{Sample, SampleKind, TrackKind};
use crate::capture::traits::{CaptureBackend, SampleConsumer, SampleSink, StreamInfo};
use crate::processing::CompositeStage;
use crate::utils::clock::Clock;
use crate::utils::error::{remove_partial_file, RecordingError, RecordingResult, WriterError};
use crate::writer::{TrackSpec, WriterFactory};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Interval of the live duration ticker
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Counters for one sample kind
#[derive(Debug, Default)]
struct KindCounters {
    delivered: AtomicU64,
    appended: AtomicU64,
    dropped_incomplete: AtomicU64,
    dropped_paused: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_other: AtomicU64,
}

/// Snapshot of [`SessionStats`] for one sample kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
    pub delivered: u64,
    pub appended: u64,
    pub dropped_incomplete: u64,
    pub dropped_paused: u64,
    pub dropped_backpressure: u64,
    /// Before the session started, late, or rejected by the writer
    pub dropped_other: u64,
}

/// Live per-kind sample counters, readable while recording
#[derive(Debug, Default)]
pub struct SessionStats {
    kinds: [KindCounters; 4],
}

impl SessionStats {
    fn slot(&self, kind: SampleKind) -> &KindCounters {
        let index = match kind {
            SampleKind::Video => 0,
            SampleKind::SystemAudio => 1,
            SampleKind::MicAudio => 2,
            SampleKind::Camera => 3,
        };
        &self.kinds[index]
    }

    fn record(&self, kind: SampleKind, outcome: AppendOutcome) {
        let counters = self.slot(kind);
        let counter = match outcome {
            AppendOutcome::Appended => &counters.appended,
            AppendOutcome::Dropped(DropReason::Incomplete) => &counters.dropped_incomplete,
            AppendOutcome::Dropped(DropReason::Paused) => &counters.dropped_paused,
            AppendOutcome::Dropped(DropReason::NotReady) => &counters.dropped_backpressure,
            AppendOutcome::Dropped(_) => &counters.dropped_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, kind: SampleKind) -> KindStats {
        let c = self.slot(kind);
        KindStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            appended: c.appended.load(Ordering::Relaxed),
            dropped_incomplete: c.dropped_incomplete.load(Ordering::Relaxed),
            dropped_paused: c.dropped_paused.load(Ordering::Relaxed),
            dropped_backpressure: c.dropped_backpressure.load(Ordering::Relaxed),
            dropped_other: c.dropped_other.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for c in &self.kinds {
            c.delivered.store(0, Ordering::Relaxed);
            c.appended.store(0, Ordering::Relaxed);
            c.dropped_incomplete.store(0, Ordering::Relaxed);
            c.dropped_paused.store(0, Ordering::Relaxed);
            c.dropped_backpressure.store(0, Ordering::Relaxed);
            c.dropped_other.store(0, Ordering::Relaxed);
        }
    }
}

/// Capture-callback side of a session
struct SessionPipeline {
    muxer: Arc<Muxer>,
    accepting: AtomicBool,
    pause: PauseClock,
    composite: Option<CompositeStage>,
    stats: Arc<SessionStats>,
    events: broadcast::Sender<RecordingEvent>,
    failure_reported: AtomicBool,
    append_failure_reported: AtomicBool,
    zero: Arc<watch::Sender<Option<DateTime<Utc>>>>,
    zero_announced: AtomicBool,
}

impl SampleConsumer for SessionPipeline {
    fn consume(&self, sample: Sample) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        let kind = sample.kind;
        self.stats.slot(kind).delivered.fetch_add(1, Ordering::Relaxed);

        // Both checks run before the muxer lock is taken
        if kind.is_video() && !sample.is_complete() {
            self.stats
                .record(kind, AppendOutcome::Dropped(DropReason::Incomplete));
            return;
        }
        if self.pause.is_paused() {
            self.stats.record(kind, AppendOutcome::Dropped(DropReason::Paused));
            return;
        }

        let sample = match (&self.composite, kind) {
            (Some(stage), SampleKind::Video) => stage.apply(sample),
            _ => sample,
        };

        let outcome = self.muxer.submit(sample);
        self.stats.record(kind, outcome);

        if outcome == AppendOutcome::Appended
            && kind == SampleKind::Video
            && !self.zero_announced.swap(true, Ordering::AcqRel)
        {
            self.zero.send_replace(self.muxer.started_at());
        }
        if outcome == AppendOutcome::Dropped(DropReason::WriteFailed) {
            self.report_write_failure(kind);
        }
    }
}

impl SessionPipeline {
    /// A failed writer ends the session; a rejected sample only warns, once
    fn report_write_failure(&self, kind: SampleKind) {
        if self.muxer.state() == MuxerState::Failed {
            if !self.failure_reported.swap(true, Ordering::AcqRel) {
                let reason = self.muxer.failure().unwrap_or_default();
                let _ = self.events.send(RecordingEvent::WriterFailed(reason));
            }
            return;
        }
        if !self.append_failure_reported.swap(true, Ordering::AcqRel) {
            let cause = self
                .muxer
                .last_append_error()
                .unwrap_or_else(|| WriterError::Failed(format!("{} sample rejected", kind.track())));
            let error = RecordingError::WriterAppendFailed(cause);
            tracing::warn!("{}; later rejections are only counted", error);
            let _ = self.events.send(RecordingEvent::Warning(error.to_string()));
        }
    }
}

/// What a successful stop hands back
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub summary: MuxerSummary,
    /// Wall-clock time of the first accepted video frame, the output's zero
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

impl SessionOutput {
    pub fn path(&self) -> &Path {
        &self.summary.output_path
    }
}

async fn run_blocking<T, F>(f: F) -> RecordingResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RecordingError::Capture(format!("capture task failed: {e}")))
}

/// Primary capture manager
pub struct SessionController {
    backend: Arc<Mutex<Box<dyn CaptureBackend>>>,
    writers: Arc<dyn WriterFactory>,
    permissions: Arc<dyn PermissionCheck>,
    clock: Arc<dyn Clock>,

    state: Arc<RwLock<SessionState>>,
    pause: PauseClock,
    stats: Arc<SessionStats>,
    duration_ms: Arc<AtomicU64>,
    events: broadcast::Sender<RecordingEvent>,

    // Per-session resources; each is released at most once
    backend_running: bool,
    muxer: Option<Arc<Muxer>>,
    pipeline: Option<Arc<SessionPipeline>>,
    ticker: Option<JoinHandle<()>>,
    output_path: Option<PathBuf>,
    /// Wall-clock time of output zero, published once the first frame lands
    zero: Arc<watch::Sender<Option<DateTime<Utc>>>>,
}

impl SessionController {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        writers: Arc<dyn WriterFactory>,
        permissions: Arc<dyn PermissionCheck>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        let (zero, _) = watch::channel(None);
        Self {
            backend: Arc::new(Mutex::new(backend)),
            writers,
            permissions,
            clock,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            pause: PauseClock::new(),
            stats: Arc::new(SessionStats::default()),
            duration_ms: Arc::new(AtomicU64::new(0)),
            events,
            backend_running: false,
            muxer: None,
            pipeline: None,
            ticker: None,
            output_path: None,
            zero: Arc::new(zero),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }

    /// Sender for components that report on the same event stream
    pub fn event_sender(&self) -> broadcast::Sender<RecordingEvent> {
        self.events.clone()
    }

    /// Pause clock of the current session, shared with secondary muxers
    pub fn pause_clock(&self) -> PauseClock {
        self.pause.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Recorded duration in ms as of the last tick, paused time excluded
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the first accepted video frame
    ///
    /// `None` until that frame arrives; capture start is not the output's zero.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.muxer.as_ref().and_then(|m| m.started_at())
    }

    /// Follows [`SessionController::started_at`] for the current session
    pub fn zero_watch(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.zero.subscribe()
    }

    /// Host time of the first accepted video frame, once there is one
    pub fn source_zero(&self) -> Option<Duration> {
        self.muxer.as_ref().and_then(|m| m.source_zero())
    }

    pub fn muxer_state(&self) -> Option<MuxerState> {
        self.muxer.as_ref().map(|m| m.state())
    }

    /// Start capturing into `output_path`
    ///
    /// Flips to `Recording` only after the platform session started. Any
    /// failure rolls everything back and leaves the controller idle.
    pub async fn start(
        &mut self,
        config: &RecordingConfig,
        output_path: &Path,
        composite: Option<CompositeStage>,
    ) -> RecordingResult<()> {
        if self.state() != SessionState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }
        self.set_state(SessionState::Starting);
        tracing::info!("Starting recording to: {:?}", output_path);

        match self.try_start(config, output_path, composite).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!("Failed to start recording: {}", error);
                self.rollback().await;
                let error = match error {
                    RecordingError::PermissionDenied(_) => error,
                    // A failure is often the first sign of revoked consent
                    _ if !self.permissions.has_capture_permission() => {
                        RecordingError::PermissionDenied(format!(
                            "capture permission missing after failed start: {error}"
                        ))
                    }
                    _ => error,
                };
                let _ = self.events.send(RecordingEvent::Error(error.to_string()));
                Err(error)
            }
        }
    }

    async fn try_start(
        &mut self,
        config: &RecordingConfig,
        output_path: &Path,
        composite: Option<CompositeStage>,
    ) -> RecordingResult<()> {
        if !self.permissions.has_capture_permission()
            && !self.permissions.request_capture_permission()
        {
            return Err(RecordingError::PermissionDenied(
                "screen capture permission not granted".to_string(),
            ));
        }

        let request = config.capture_request();
        let backend = self.backend.clone();
        let info: StreamInfo = run_blocking(move || backend.lock().prepare(&request)).await??;

        let name = self.backend.lock().name().to_string();
        let video = info
            .video
            .ok_or_else(|| RecordingError::NoSourceAvailable(format!("{name} reported no video")))?;
        if config.capture_microphone && info.microphone.is_none() {
            return Err(RecordingError::NoSourceAvailable("microphone".to_string()));
        }

        self.output_path = Some(output_path.to_path_buf());
        let writer = self
            .writers
            .create(output_path)
            .map_err(RecordingError::WriterSetupFailed)?;

        self.pause = PauseClock::new();
        let muxer = Arc::new(Muxer::new("primary", writer, self.pause.clone()));
        self.muxer = Some(muxer.clone());

        muxer
            .add_track(TrackSpec::Video {
                resolution: video.resolution,
                frame_rate: video.frame_rate,
            })
            .map_err(RecordingError::WriterSetupFailed)?;
        match (config.capture_system_audio, info.system_audio) {
            (true, Some(format)) => {
                muxer
                    .add_track(TrackSpec::Audio {
                        kind: TrackKind::SystemAudio,
                        format,
                    })
                    .map_err(RecordingError::WriterSetupFailed)?;
            }
            (true, None) => {
                tracing::warn!("System audio unavailable, recording without it");
                let _ = self.events.send(RecordingEvent::Warning(
                    "system audio unavailable".to_string(),
                ));
            }
            _ => {}
        }
        if let (true, Some(format)) = (config.capture_microphone, info.microphone) {
            muxer
                .add_track(TrackSpec::Audio {
                    kind: TrackKind::MicAudio,
                    format,
                })
                .map_err(RecordingError::WriterSetupFailed)?;
        }

        self.stats.reset();
        self.duration_ms.store(0, Ordering::Relaxed);
        self.zero.send_replace(None);
        let pipeline = Arc::new(SessionPipeline {
            muxer: muxer.clone(),
            accepting: AtomicBool::new(true),
            pause: self.pause.clone(),
            composite,
            stats: self.stats.clone(),
            events: self.events.clone(),
            failure_reported: AtomicBool::new(false),
            append_failure_reported: AtomicBool::new(false),
            zero: self.zero.clone(),
            zero_announced: AtomicBool::new(false),
        });
        self.pipeline = Some(pipeline.clone());

        let sink = SampleSink::new(pipeline, self.clock.clone());
        let backend = self.backend.clone();
        // Set first: a start that fails halfway still needs a stop
        self.backend_running = true;
        run_blocking(move || backend.lock().start(sink)).await??;

        self.set_state(SessionState::Recording);
        self.ticker = Some(self.spawn_ticker(muxer));
        let _ = self.events.send(RecordingEvent::Started);

        tracing::info!(
            "Recording started: {} @ {}fps via {}",
            video.resolution,
            video.frame_rate,
            name
        );
        Ok(())
    }

    fn spawn_ticker(&self, muxer: Arc<Muxer>) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let duration_ms = self.duration_ms.clone();
        let events = self.events.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                interval.tick().await;
                let ms = muxer.live_duration(clock.now()).as_millis() as u64;
                duration_ms.store(ms, Ordering::Relaxed);
                if *state.read() == SessionState::Recording {
                    let _ = events.send(RecordingEvent::Progress(ms as f64));
                }
            }
        })
    }

    /// Undo a partial start; safe to call repeatedly
    async fn rollback(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.accepting.store(false, Ordering::Release);
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if std::mem::take(&mut self.backend_running) {
            let backend = self.backend.clone();
            match run_blocking(move || backend.lock().stop()).await {
                Ok(Err(e)) => tracing::warn!("Failed to stop capture during rollback: {}", e),
                Err(e) => tracing::warn!("Failed to stop capture during rollback: {}", e),
                Ok(Ok(())) => {}
            }
        }
        if let Some(muxer) = self.muxer.take() {
            muxer.cancel();
        }
        if let Some(path) = self.output_path.take() {
            remove_partial_file(&path);
        }
        self.zero.send_replace(None);
        self.set_state(SessionState::Idle);
    }

    /// Pause recording
    pub fn pause(&mut self) -> RecordingResult<()> {
        if self.state() != SessionState::Recording {
            return Err(RecordingError::NotRecording);
        }
        self.pause.pause(self.clock.now());
        self.set_state(SessionState::Paused);
        let _ = self.events.send(RecordingEvent::Paused);
        tracing::info!("Recording paused");
        Ok(())
    }

    /// Resume recording
    pub fn resume(&mut self) -> RecordingResult<()> {
        if self.state() != SessionState::Paused {
            return Err(RecordingError::NotRecording);
        }
        if let Some(span) = self.pause.resume(self.clock.now()) {
            tracing::info!("Recording resumed after {:.3}s pause", span.as_secs_f64());
        }
        self.set_state(SessionState::Recording);
        let _ = self.events.send(RecordingEvent::Resumed);
        Ok(())
    }

    /// Stop the capture session, then finalize the muxer
    ///
    /// With `discard` the file is removed and `Ok(None)` returned even if
    /// finalizing failed. Without it, a failed finalize removes the file and
    /// returns the error.
    pub async fn stop(&mut self, discard: bool) -> RecordingResult<Option<SessionOutput>> {
        match self.state() {
            SessionState::Recording | SessionState::Paused => {}
            SessionState::Starting => {
                self.rollback().await;
                return Ok(None);
            }
            SessionState::Idle | SessionState::Stopping => return Err(RecordingError::NotRecording),
        }
        self.set_state(SessionState::Stopping);
        tracing::info!("Stopping recording{}", if discard { " (discard)" } else { "" });

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.accepting.store(false, Ordering::Release);
        }
        if std::mem::take(&mut self.backend_running) {
            let backend = self.backend.clone();
            // Must complete before finalize so no sample races it
            match run_blocking(move || backend.lock().stop()).await {
                Ok(Err(e)) => tracing::warn!("Error stopping capture: {}", e),
                Err(e) => tracing::warn!("Error stopping capture: {}", e),
                Ok(Ok(())) => {}
            }
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        // Only now, with nothing left in flight, close a pause still open
        self.pause.resume(self.clock.now());

        let output_path = self.output_path.take();
        let Some(muxer) = self.muxer.take() else {
            self.set_state(SessionState::Idle);
            return Err(RecordingError::NotRecording);
        };
        let finalized = run_blocking(move || muxer.finalize()).await;
        let stopped_at = Utc::now();
        self.set_state(SessionState::Idle);

        let result = match finalized {
            Ok(Ok(summary)) if discard => {
                remove_partial_file(&summary.output_path);
                Ok(None)
            }
            Ok(Ok(summary)) => {
                self.duration_ms
                    .store(summary.duration.as_millis() as u64, Ordering::Relaxed);
                tracing::info!(
                    "Recording stopped. Duration: {}ms",
                    summary.duration.as_millis()
                );
                Ok(Some(SessionOutput {
                    started_at: summary.started_at,
                    summary,
                    stopped_at,
                }))
            }
            Ok(Err(e)) => {
                if let Some(path) = &output_path {
                    remove_partial_file(path);
                }
                if discard {
                    Ok(None)
                } else {
                    Err(match e {
                        WriterError::EmptySession => RecordingError::NoFramesCaptured,
                        other => RecordingError::WriterEnteredFailedState(other),
                    })
                }
            }
            Err(e) => {
                if let Some(path) = &output_path {
                    remove_partial_file(path);
                }
                Err(e)
            }
        };

        match &result {
            Ok(_) => {
                let _ = self.events.send(RecordingEvent::Stopped);
            }
            Err(e) => {
                let _ = self.events.send(RecordingEvent::Error(e.to_string()));
            }
        }
        result
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.accepting.store(false, Ordering::Release);
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if std::mem::take(&mut self.backend_running) {
            if let Err(e) = self.backend.lock().stop() {
                tracing::warn!("Failed to stop capture on drop: {}", e);
            }
        }
        if let Some(muxer) = self.muxer.take() {
            muxer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::manual::{ManualFeed, ManualSource};
    use crate::capture::permissions::StaticPermission;
    use crate::capture::sample::{AudioBuffer, AudioFormat, FrameStatus, VideoFrame};
    use crate::capture::traits::{Resolution, VideoStreamInfo};
    use crate::utils::clock::ManualClock;
    use crate::utils::error::CaptureError;
    use crate::writer::{FaultPlan, MemoryLog, MemoryWriterFactory};
    use tempfile::{tempdir, TempDir};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn info(mic: bool) -> StreamInfo {
        StreamInfo {
            video: Some(VideoStreamInfo {
                resolution: Resolution { width: 8, height: 8 },
                frame_rate: 30,
            }),
            system_audio: None,
            microphone: mic.then(AudioFormat::default),
        }
    }

    fn video(at: u64) -> Sample {
        Sample::video(VideoFrame::solid(8, 8, [5, 5, 5, 255]), ms(at), FrameStatus::Complete)
    }

    struct Fixture {
        dir: TempDir,
        log: MemoryLog,
        feed: ManualFeed,
        clock: Arc<ManualClock>,
        controller: SessionController,
    }

    fn fixture_with(stream: StreamInfo, permitted: bool, faults: FaultPlan) -> Fixture {
        let dir = tempdir().unwrap();
        let log = MemoryLog::new();
        let (source, feed) = ManualSource::new(stream);
        let clock = Arc::new(ManualClock::default());
        let controller = SessionController::new(
            Box::new(source),
            Arc::new(MemoryWriterFactory::new(log.clone()).with_faults(faults)),
            Arc::new(StaticPermission(permitted)),
            clock.clone(),
        );
        Fixture {
            dir,
            log,
            feed,
            clock,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(info(false), true, FaultPlan::default())
    }

    fn config(mic: bool) -> RecordingConfig {
        RecordingConfig {
            capture_microphone: mic,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_stop_produces_output() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        let mut events = f.controller.subscribe();

        f.controller.start(&config(false), &path, None).await.unwrap();
        assert_eq!(f.controller.state(), SessionState::Recording);
        assert_eq!(events.recv().await.unwrap(), RecordingEvent::Started);

        for i in 0..10 {
            assert!(f.feed.push(video(1_000 + i * 33)));
        }
        let output = f.controller.stop(false).await.unwrap().unwrap();
        assert_eq!(f.controller.state(), SessionState::Idle);
        assert_eq!(output.path(), path.as_path());
        assert_eq!(output.summary.duration, ms(330));
        assert!(path.exists());
        assert!(!f.feed.is_live());
        assert_eq!(f.controller.stats().get(SampleKind::Video).appended, 10);
    }

    #[tokio::test]
    async fn test_incomplete_frames_filtered_before_muxer() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();

        f.feed.push(Sample::video(VideoFrame::solid(8, 8, [0; 4]), ms(0), FrameStatus::Idle));
        f.feed.push(Sample::video(VideoFrame::solid(8, 8, [0; 4]), ms(5), FrameStatus::Blank));
        f.feed.push(video(10));

        let stats = f.controller.stats().get(SampleKind::Video);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.dropped_incomplete, 2);
        assert_eq!(stats.appended, 1);
        assert_eq!(f.controller.source_zero(), Some(ms(10)));
        f.controller.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_resume_shifts_timeline() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();

        f.feed.push(video(0));
        f.feed.push(video(33));
        f.clock.set(ms(40));
        f.controller.pause().unwrap();
        assert_eq!(f.controller.state(), SessionState::Paused);
        assert!(f.controller.pause().is_err());
        f.feed.push(video(66));
        f.clock.set(ms(1_040));
        f.controller.resume().unwrap();
        f.feed.push(video(1_066));

        f.controller.stop(false).await.unwrap().unwrap();
        let times = f.log.session_for(&path).unwrap().times(TrackKind::Video);
        assert_eq!(times, vec![ms(0), ms(33), ms(66)]);
        assert_eq!(f.controller.stats().get(SampleKind::Video).dropped_paused, 1);
    }

    #[tokio::test]
    async fn test_permission_denied_rolls_back() {
        let mut f = fixture_with(info(false), false, FaultPlan::default());
        let path = f.dir.path().join("out.mp4");
        let err = f.controller.start(&config(false), &path, None).await.unwrap_err();
        assert!(matches!(err, RecordingError::PermissionDenied(_)));
        assert_eq!(f.controller.state(), SessionState::Idle);
        assert!(!path.exists());
        assert!(f.log.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_microphone_is_no_source() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        let err = f.controller.start(&config(true), &path, None).await.unwrap_err();
        assert!(matches!(err, RecordingError::NoSourceAvailable(_)));
        assert_eq!(f.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_writer_setup_failure() {
        let mut f = fixture_with(
            info(false),
            true,
            FaultPlan {
                fail_setup: true,
                ..Default::default()
            },
        );
        let path = f.dir.path().join("out.mp4");
        let err = f.controller.start(&config(false), &path, None).await.unwrap_err();
        assert!(matches!(err, RecordingError::WriterSetupFailed(_)));
        assert_eq!(f.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_capture_start_failure_removes_file() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.feed.fail_start(CaptureError::Handshake("display went away".into()));

        let err = f.controller.start(&config(false), &path, None).await.unwrap_err();
        assert!(matches!(err, RecordingError::Capture(_)));
        assert_eq!(f.controller.state(), SessionState::Idle);
        assert!(!path.exists());
        assert!(f.log.last().unwrap().cancelled);

        // The controller is usable again
        f.controller.start(&config(false), &path, None).await.unwrap();
        f.controller.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_mic_track_added_when_available() {
        let mut f = fixture_with(info(true), true, FaultPlan::default());
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(true), &path, None).await.unwrap();

        // Mic ahead of video is dropped
        f.feed.push(Sample::mic_audio(AudioBuffer::silence(AudioFormat::default(), 480), ms(0)));
        f.feed.push(video(5));
        f.feed.push(Sample::mic_audio(AudioBuffer::silence(AudioFormat::default(), 480), ms(10)));

        let output = f.controller.stop(false).await.unwrap().unwrap();
        assert_eq!(output.summary.track(TrackKind::MicAudio).unwrap().appended, 1);
        assert_eq!(f.controller.stats().get(SampleKind::MicAudio).dropped_other, 1);
    }

    #[tokio::test]
    async fn test_stop_without_frames_is_an_error() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();
        let err = f.controller.stop(false).await.unwrap_err();
        assert!(matches!(err, RecordingError::NoFramesCaptured));
        assert!(!path.exists());
        assert!(matches!(
            f.controller.stop(false).await,
            Err(RecordingError::NotRecording)
        ));
    }

    #[tokio::test]
    async fn test_writer_failure_is_reported_once() {
        let mut f = fixture_with(
            info(false),
            true,
            FaultPlan {
                fatal_append_at: Some((TrackKind::Video, 2)),
                ..Default::default()
            },
        );
        let path = f.dir.path().join("out.mp4");
        let mut events = f.controller.subscribe();
        f.controller.start(&config(false), &path, None).await.unwrap();
        for i in 0..5 {
            f.feed.push(video(i * 33));
        }
        assert_eq!(f.controller.muxer_state(), Some(MuxerState::Failed));

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RecordingEvent::WriterFailed(_)) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        let err = f.controller.stop(false).await.unwrap_err();
        assert!(matches!(err, RecordingError::WriterEnteredFailedState(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ticker_reports_live_duration() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();
        f.feed.push(video(1_000));
        f.clock.set(ms(1_250));

        tokio::time::sleep(PROGRESS_INTERVAL * 3).await;
        assert_eq!(f.controller.duration_ms(), 250);
        f.controller.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_started_at_is_first_frame_not_capture_start() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();
        let zero = f.controller.zero_watch();
        assert_eq!(*zero.borrow(), None);

        // Capture has been running a while before the first frame shows up
        tokio::time::sleep(ms(300)).await;
        assert_eq!(f.controller.started_at(), None);
        let before_frame = Utc::now();
        f.feed.push(video(5_000));

        let started_at = f.controller.started_at().unwrap();
        assert!(started_at >= before_frame);
        assert_eq!(*zero.borrow(), Some(started_at));

        let output = f.controller.stop(false).await.unwrap().unwrap();
        assert_eq!(output.started_at, output.summary.started_at);
        assert_eq!(output.started_at, started_at);
    }

    #[tokio::test]
    async fn test_rejected_append_warns_once() {
        let mut f = fixture_with(
            info(false),
            true,
            FaultPlan {
                fail_append_at: Some((TrackKind::Video, 2)),
                ..Default::default()
            },
        );
        let path = f.dir.path().join("out.mp4");
        let mut events = f.controller.subscribe();
        f.controller.start(&config(false), &path, None).await.unwrap();
        for i in 0..5 {
            f.feed.push(video(i * 33));
        }
        assert_eq!(f.controller.muxer_state(), Some(MuxerState::Writing));

        let mut warnings = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                RecordingEvent::Warning(message) => warnings.push(message),
                RecordingEvent::WriterFailed(_) => panic!("rejection must not fail the writer"),
                _ => {}
            }
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Writer append failed"));
        assert!(warnings[0].contains("append #2"));
        f.controller.stop(true).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_while_paused_appends_nothing_more() {
        let mut f = fixture();
        let path = f.dir.path().join("out.mp4");
        f.controller.start(&config(false), &path, None).await.unwrap();

        let feed = f.feed.clone();
        let pusher = std::thread::spawn(move || {
            let mut at = 0;
            while feed.push(video(at)) {
                at += 1;
            }
        });
        let stats = f.controller.stats();
        while stats.get(SampleKind::Video).appended == 0 {
            tokio::time::sleep(ms(1)).await;
        }

        f.controller.pause().unwrap();
        // Let a sample already inside the muxer land
        tokio::time::sleep(ms(20)).await;
        let appended_at_pause = stats.get(SampleKind::Video).appended;

        let output = f.controller.stop(false).await.unwrap().unwrap();
        pusher.join().unwrap();
        assert_eq!(
            output.summary.track(TrackKind::Video).unwrap().appended,
            appended_at_pause
        );
        assert_eq!(stats.get(SampleKind::Video).appended, appended_at_pause);
    }
}
