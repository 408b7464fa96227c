//! Recording coordinator
//!
//! Runs the primary session, the camera and the sidecar recorders as one
//! recording. The primary session starts first since it defines time zero;
//! everything stops in reverse order.

use super::session::{SessionController, SessionOutput, SessionStats};
use super::sidecar::{SidecarContext, SidecarRecorder};
use super::state::{RecordingArtifact, RecordingConfig, RecordingEvent, SessionState};
use super::strategy::{strategy_for, CameraStrategy, SecondaryTarget};
use crate::capture::camera::{CameraDeviceOpener, CameraProducer, CameraTake, DeviceLostHook};
use crate::capture::permissions::PermissionCheck;
use crate::capture::sample::TrackKind;
use crate::capture::traits::{CaptureBackend, Resolution};
use crate::utils::clock::Clock;
use crate::utils::error::{remove_partial_file, CameraError, RecordingError, RecordingResult};
use crate::utils::paths::{OutputNaming, SessionPaths};
use crate::writer::WriterFactory;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Bookkeeping for the recording in progress
struct ActiveRecording {
    session_id: Uuid,
    paths: SessionPaths,
    frame_rate: u32,
    camera_running: bool,
    /// Indices into `sidecars` that started
    sidecars_running: Vec<usize>,
    /// Also appended to from the camera thread
    warnings: Arc<Mutex<Vec<String>>>,
}

/// Orchestrates one recording across all producers
pub struct RecordingCoordinator {
    session: SessionController,
    writers: Arc<dyn WriterFactory>,
    naming: Arc<dyn OutputNaming>,
    camera: Option<Arc<CameraProducer>>,
    sidecars: Vec<Box<dyn SidecarRecorder>>,
    active: Option<ActiveRecording>,
}

impl RecordingCoordinator {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        writers: Arc<dyn WriterFactory>,
        permissions: Arc<dyn PermissionCheck>,
        clock: Arc<dyn Clock>,
        naming: Arc<dyn OutputNaming>,
    ) -> Self {
        let session = SessionController::new(backend, writers.clone(), permissions, clock);
        Self {
            session,
            writers,
            naming,
            camera: None,
            sidecars: Vec::new(),
            active: None,
        }
    }

    /// Attach a camera, driven on the session's clock
    pub fn with_camera(mut self, opener: Arc<dyn CameraDeviceOpener>) -> Self {
        self.camera = Some(Arc::new(CameraProducer::new(opener, self.session.clock())));
        self
    }

    /// Attach an already built camera producer
    pub fn with_camera_producer(mut self, camera: Arc<CameraProducer>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn add_sidecar(&mut self, sidecar: Box<dyn SidecarRecorder>) {
        tracing::info!("Adding sidecar recorder: {}", sidecar.name());
        self.sidecars.push(sidecar);
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.session.subscribe()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.session.stats()
    }

    pub fn duration_ms(&self) -> u64 {
        self.session.duration_ms()
    }

    pub fn camera(&self) -> Option<&Arc<CameraProducer>> {
        self.camera.as_ref()
    }

    /// Identifier of the recording in progress
    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.session_id)
    }

    /// Output paths reserved for the recording in progress
    pub fn paths(&self) -> Option<&SessionPaths> {
        self.active.as_ref().map(|a| &a.paths)
    }

    /// Warnings collected so far for the recording in progress
    pub fn warnings(&self) -> Vec<String> {
        self.active
            .as_ref()
            .map(|a| a.warnings.lock().clone())
            .unwrap_or_default()
    }

    fn warn(&self, active: &ActiveRecording, message: String) {
        tracing::warn!("{}", message);
        let _ = self
            .session
            .event_sender()
            .send(RecordingEvent::Warning(message.clone()));
        active.warnings.lock().push(message);
    }

    /// Degrade to screen only when the camera drops out mid-recording
    fn camera_lost_hook(&self, active: &ActiveRecording) -> DeviceLostHook {
        let events = self.session.event_sender();
        let warnings = active.warnings.clone();
        Arc::new(move |error: CameraError| {
            let message = format!("{}; recording screen only", RecordingError::from(error));
            tracing::warn!("{}", message);
            let _ = events.send(RecordingEvent::Warning(message.clone()));
            warnings.lock().push(message);
        })
    }

    /// Start recording
    pub async fn start(&mut self, config: RecordingConfig) -> RecordingResult<Uuid> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        let mut config = config;
        config.validate()?;

        let paths = self.naming.session_paths()?;
        let strategy: Option<Arc<dyn CameraStrategy>> = match (&config.camera, &self.camera) {
            (Some(camera), Some(_)) => Some(Arc::from(strategy_for(&camera.mode))),
            (Some(_), None) => {
                tracing::warn!("Camera requested but no camera is attached");
                None
            }
            (None, _) => None,
        };
        let stage = match (&strategy, &self.camera) {
            (Some(strategy), Some(camera)) => {
                strategy.composite_stage(camera, config.staleness_window())
            }
            _ => None,
        };

        tracing::info!(
            "Starting recording to {:?} (camera: {})",
            paths.primary,
            strategy.as_ref().map(|s| s.name()).unwrap_or("none")
        );
        self.session.start(&config, &paths.primary, stage).await?;

        let mut active = ActiveRecording {
            session_id: Uuid::new_v4(),
            paths,
            frame_rate: config.frame_rate,
            camera_running: false,
            sidecars_running: Vec::new(),
            warnings: Arc::default(),
        };

        if let (Some(strategy), Some(camera)) = (strategy, self.camera.clone()) {
            let target = SecondaryTarget {
                writers: self.writers.clone(),
                path: active.paths.camera.clone(),
                pause: self.session.pause_clock(),
            };
            camera.set_device_lost_hook(Some(self.camera_lost_hook(&active)));
            let producer = camera.clone();
            let started =
                tokio::task::spawn_blocking(move || strategy.start_camera(&producer, target)).await;
            if !matches!(started, Ok(Ok(_))) {
                camera.set_device_lost_hook(None);
            }
            match started {
                Ok(Ok(_)) => active.camera_running = true,
                Ok(Err(e)) => {
                    let error = RecordingError::from(e);
                    self.warn(&active, format!("{error}; recording screen only"));
                }
                Err(e) => {
                    self.warn(&active, format!("Camera start task failed: {e}"));
                }
            }
        }

        for index in 0..self.sidecars.len() {
            let context = SidecarContext {
                zero: self.session.zero_watch(),
                primary_path: active.paths.primary.clone(),
                events: self.session.subscribe(),
            };
            match self.sidecars[index].start(context).await {
                Ok(()) => active.sidecars_running.push(index),
                Err(e) => {
                    let message = format!("Sidecar {} failed to start: {}", self.sidecars[index].name(), e);
                    self.warn(&active, message);
                }
            }
        }

        let id = active.session_id;
        self.active = Some(active);
        tracing::info!("Recording {} started", id);
        Ok(id)
    }

    pub fn pause(&mut self) -> RecordingResult<()> {
        self.session.pause()
    }

    pub fn resume(&mut self) -> RecordingResult<()> {
        self.session.resume()
    }

    /// Stop every producer in reverse start order and assemble the artifact
    ///
    /// `Ok(None)` when discarded. When the primary file fails, every other
    /// file of the recording is deleted and the error returned.
    pub async fn stop(&mut self, discard: bool) -> RecordingResult<Option<RecordingArtifact>> {
        let Some(mut active) = self.active.take() else {
            return Err(RecordingError::NotRecording);
        };
        let stopped_at = Utc::now();

        let mut sidecar_files = Vec::new();
        let running = std::mem::take(&mut active.sidecars_running);
        for index in running.into_iter().rev() {
            match self.sidecars[index].stop(stopped_at).await {
                Ok(files) => sidecar_files.extend(files),
                Err(e) => {
                    let message = format!("Sidecar {} failed to stop: {}", self.sidecars[index].name(), e);
                    self.warn(&active, message);
                }
            }
        }

        let camera_take = self.stop_camera(&mut active).await;
        let primary = self.session.stop(discard).await;

        let output = match primary {
            Ok(Some(output)) if !discard => output,
            Ok(_) => {
                tracing::info!("Recording {} discarded", active.session_id);
                remove_files(camera_take.iter().map(|t| &t.path).chain(&sidecar_files));
                return Ok(None);
            }
            Err(e) => {
                tracing::error!("Recording {} failed: {}", active.session_id, e);
                remove_files(camera_take.iter().map(|t| &t.path).chain(&sidecar_files));
                return Err(e);
            }
        };

        Ok(Some(assemble(
            active,
            output,
            camera_take,
            sidecar_files,
            stopped_at,
        )))
    }

    async fn stop_camera(&self, active: &mut ActiveRecording) -> Option<CameraTake> {
        if !std::mem::take(&mut active.camera_running) {
            return None;
        }
        let camera = self.camera.clone()?;
        camera.set_device_lost_hook(None);
        let finished = tokio::task::spawn_blocking(move || {
            if let Err(e) = camera.stop() {
                tracing::warn!("Error stopping camera: {}", e);
            }
            camera.take_finished()
        })
        .await;

        match finished {
            Ok(Some(Ok(take))) => Some(take),
            Ok(Some(Err(e))) => {
                self.warn(active, format!("Camera recording failed: {e}"));
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.warn(active, format!("Camera stop task failed: {e}"));
                None
            }
        }
    }

    /// Abort after the primary writer failed: stop everything, discard all
    pub async fn abort_on_writer_failure(&mut self) -> RecordingResult<()> {
        if self.active.is_none() {
            return Ok(());
        }
        tracing::error!("Primary writer failed, aborting recording");
        self.stop(true).await?;
        let _ = self.session.event_sender().send(RecordingEvent::Error(
            "recording aborted after writer failure".to_string(),
        ));
        Ok(())
    }
}

fn remove_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) {
    for path in paths {
        remove_partial_file(path);
    }
}

fn assemble(
    active: ActiveRecording,
    output: SessionOutput,
    camera_take: Option<CameraTake>,
    sidecar_files: Vec<PathBuf>,
    stopped_at: DateTime<Utc>,
) -> RecordingArtifact {
    let summary = &output.summary;
    let audio_tracks = summary
        .tracks
        .iter()
        .map(|(kind, _)| *kind)
        .filter(|kind| *kind != TrackKind::Video)
        .collect();

    // Both zeros live on the same host timeline
    let secondary_offset_ms = camera_take.as_ref().map(|take| {
        let camera_zero = take.summary.source_zero.as_secs_f64();
        let primary_zero = summary.source_zero.as_secs_f64();
        (camera_zero - primary_zero) * 1000.0
    });

    let artifact = RecordingArtifact {
        session_id: active.session_id,
        primary_path: summary.output_path.clone(),
        secondary_path: camera_take.map(|take| take.path),
        duration_ms: summary.duration.as_secs_f64() * 1000.0,
        resolution: summary.resolution.unwrap_or(Resolution {
            width: 0,
            height: 0,
        }),
        frame_rate: summary.frame_rate.unwrap_or(active.frame_rate),
        audio_tracks,
        secondary_offset_ms,
        started_at: output.started_at,
        stopped_at,
        sidecar_files,
        warnings: active.warnings.lock().clone(),
    };
    tracing::info!(
        "Recording {} finished: {:.0}ms, {} file(s)",
        artifact.session_id,
        artifact.duration_ms,
        artifact.files().len()
    );
    artifact
}

/// Abort the recording as soon as the primary writer reports failure
///
/// Subscribes before returning, so no failure after this call is missed.
/// The task ends when the recording stops or fails to start.
pub async fn spawn_failure_watchdog(
    coordinator: Arc<AsyncMutex<RecordingCoordinator>>,
) -> JoinHandle<()> {
    let mut events = coordinator.lock().await.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RecordingEvent::WriterFailed(reason)) => {
                    tracing::error!("Writer failure reported: {}", reason);
                    if let Err(e) = coordinator.lock().await.abort_on_writer_failure().await {
                        tracing::error!("Failed to abort recording: {}", e);
                    }
                    break;
                }
                Ok(RecordingEvent::Stopped) | Ok(RecordingEvent::Error(_)) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Watchdog lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
