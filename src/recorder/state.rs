//! Recording state management
//!
//! Defines the session state machine, recording configuration and the
//! artifact handed to consumers once a recording completes.

use crate::capture::frame_box::DEFAULT_STALENESS_WINDOW;
use crate::capture::sample::TrackKind;
use crate::capture::traits::{CaptureRequest, CaptureTarget, Resolution};
use crate::utils::error::{RecordingError, RecordingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    #[default]
    Idle,
    /// Platform handshake in progress
    Starting,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Draining and finalizing
    Stopping,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

/// Corner the camera overlay is pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Mask applied to the camera overlay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MaskShape {
    #[default]
    Circle,
    /// Corner radius as a fraction of the overlay side (0.0 - 0.5)
    #[serde(rename_all = "camelCase")]
    RoundedRect { corner_radius: f32 },
}

/// Camera-over-screen composite settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositeConfig {
    /// Overlay side as a fraction of the screen width
    pub size_ratio: f32,
    pub shape: MaskShape,
    pub anchor: Anchor,
    /// Padding from the screen edge in pixels at 1920 px wide
    pub padding: u32,
    /// Flip horizontally, like a mirror
    pub mirror: bool,
}

impl CompositeConfig {
    pub const MIN_SIZE_RATIO: f32 = 0.1;
    pub const MAX_SIZE_RATIO: f32 = 0.4;

    pub fn clamped_size_ratio(&self) -> f32 {
        if self.size_ratio.is_nan() {
            return Self::MIN_SIZE_RATIO;
        }
        self.size_ratio.clamp(Self::MIN_SIZE_RATIO, Self::MAX_SIZE_RATIO)
    }
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            size_ratio: 0.2,
            shape: MaskShape::Circle,
            anchor: Anchor::BottomRight,
            padding: 40,
            mirror: true,
        }
    }
}

/// Whether the camera is burned into the screen recording or kept apart
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CameraMode {
    Composite(CompositeConfig),
    SeparateFile,
}

impl Default for CameraMode {
    fn default() -> Self {
        CameraMode::Composite(CompositeConfig::default())
    }
}

/// Camera capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    /// Device ID, or the default camera when unset
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub mode: CameraMode,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            width: 1280,
            height: 720,
            fps: 30,
            mode: CameraMode::default(),
        }
    }
}

/// Configuration for starting a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    /// What to capture
    pub target: CaptureTarget,

    /// Whether to capture system audio
    pub capture_system_audio: bool,

    /// Whether to capture microphone
    pub capture_microphone: bool,

    /// Microphone device ID (if capturing)
    pub microphone_device_id: Option<String>,

    pub frame_rate: u32,

    /// Camera settings, if a camera is recorded at all
    pub camera: Option<CameraConfig>,

    /// Output directory for the recording
    pub output_dir: PathBuf,

    /// Maximum age of a camera frame that may still be composited
    pub staleness_window_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            target: CaptureTarget::default(),
            capture_system_audio: false,
            capture_microphone: false,
            microphone_device_id: None,
            frame_rate: 30,
            camera: None,
            output_dir: PathBuf::from("recordings"),
            staleness_window_ms: DEFAULT_STALENESS_WINDOW.as_millis() as u64,
        }
    }
}

impl RecordingConfig {
    pub const MAX_FRAME_RATE: u32 = 240;

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> RecordingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: RecordingConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded recording config from {:?}", path);
        Ok(config)
    }

    /// Reject nonsensical values and clamp the ones with a sane range
    pub fn validate(&mut self) -> RecordingResult<()> {
        if self.frame_rate == 0 || self.frame_rate > Self::MAX_FRAME_RATE {
            return Err(RecordingError::InvalidConfig(format!(
                "frame rate must be between 1 and {}, got {}",
                Self::MAX_FRAME_RATE,
                self.frame_rate
            )));
        }
        if self.staleness_window_ms == 0 {
            return Err(RecordingError::InvalidConfig(
                "staleness window must be positive".to_string(),
            ));
        }
        if let CaptureTarget::Region { bounds, .. } = &self.target {
            if bounds.width == 0 || bounds.height == 0 {
                return Err(RecordingError::InvalidConfig(
                    "capture region is empty".to_string(),
                ));
            }
        }

        if let Some(camera) = &mut self.camera {
            if camera.fps == 0 || camera.fps > Self::MAX_FRAME_RATE {
                return Err(RecordingError::InvalidConfig(format!(
                    "camera fps must be between 1 and {}, got {}",
                    Self::MAX_FRAME_RATE,
                    camera.fps
                )));
            }
            if let CameraMode::Composite(composite) = &mut camera.mode {
                let ratio = composite.clamped_size_ratio();
                if ratio != composite.size_ratio {
                    tracing::warn!(
                        "Camera size ratio {} out of range, using {}",
                        composite.size_ratio,
                        ratio
                    );
                    composite.size_ratio = ratio;
                }
                if let MaskShape::RoundedRect { corner_radius } = &mut composite.shape {
                    *corner_radius = corner_radius.clamp(0.0, 0.5);
                }
            }
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    /// Composite settings, when the camera is burned into the screen
    pub fn composite(&self) -> Option<&CompositeConfig> {
        match &self.camera.as_ref()?.mode {
            CameraMode::Composite(composite) => Some(composite),
            CameraMode::SeparateFile => None,
        }
    }

    pub fn capture_request(&self) -> CaptureRequest {
        CaptureRequest {
            target: self.target.clone(),
            frame_rate: self.frame_rate,
            system_audio: self.capture_system_audio,
            microphone: self.capture_microphone,
            microphone_device_id: self.microphone_device_id.clone(),
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingArtifact {
    pub session_id: Uuid,

    /// Screen recording
    pub primary_path: PathBuf,

    /// Camera recording, when recorded to its own file
    pub secondary_path: Option<PathBuf>,

    /// Total duration in milliseconds, paused time excluded
    pub duration_ms: f64,

    pub resolution: Resolution,
    pub frame_rate: u32,

    /// Audio tracks present in the primary file
    pub audio_tracks: Vec<TrackKind>,

    /// Start of the camera file relative to the primary zero, in milliseconds
    pub secondary_offset_ms: Option<f64>,

    /// Wall-clock time of the primary zero
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,

    /// Files written by sidecar recorders
    pub sidecar_files: Vec<PathBuf>,

    /// Non-fatal problems hit while recording
    pub warnings: Vec<String>,
}

impl RecordingArtifact {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms / 1000.0)
    }

    /// Every file this recording produced
    pub fn files(&self) -> Vec<PathBuf> {
        std::iter::once(self.primary_path.clone())
            .chain(self.secondary_path.clone())
            .chain(self.sidecar_files.iter().cloned())
            .collect()
    }
}

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RecordingEvent {
    /// Recording started
    Started,
    /// Recording stopped
    Stopped,
    /// Recording paused
    Paused,
    /// Recording resumed
    Resumed,
    /// Recording progress update (duration in ms)
    Progress(f64),
    /// Something degraded but the recording goes on
    Warning(String),
    /// Error occurred
    Error(String),
    /// The primary writer failed; the recording cannot continue
    WriterFailed(String),
}
