//! Error types and handling
//!
//! Common error types used across the recorder.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised by the container writer layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriterError {
    #[error("Writer setup failed: {0}")]
    Setup(String),

    #[error("Failed to spawn encoder: {0}")]
    Spawn(String),

    #[error("Writer IO error: {0}")]
    Io(String),

    #[error("Encoder exited with status {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("Unknown track {0}")]
    UnknownTrack(usize),

    #[error("Invalid writer state: {0}")]
    InvalidState(&'static str),

    #[error("No video samples were written")]
    EmptySession,

    #[error("Writer failed: {0}")]
    Failed(String),

    #[error("Injected fault: {0}")]
    Injected(String),
}

impl From<std::io::Error> for WriterError {
    fn from(error: std::io::Error) -> Self {
        WriterError::Io(error.to_string())
    }
}

/// Errors raised by capture sources (screen, audio, manual feeds)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Capture permission denied")]
    PermissionDenied,

    #[error("No source available: {0}")]
    NoSource(String),

    #[error("Capture handshake failed: {0}")]
    Handshake(String),

    #[error("Device error: {0}")]
    Device(String),
}

/// Errors raised by the camera producer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Camera not found: {0}")]
    NotFound(String),

    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Failed to read camera frame: {0}")]
    Frame(String),

    #[error("Camera lost: {0}")]
    Lost(String),

    #[error("Camera did not report a format within {0:?}")]
    OpenTimeout(std::time::Duration),

    #[error("Camera writer error: {0}")]
    Writer(#[from] WriterError),
}

/// Errors raised inside the compositor; never fatal to a recording
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositeError {
    #[error("Frame buffer does not match its dimensions ({0})")]
    InvalidFrame(&'static str),

    #[error("Overlay of {side}px with {padding}px padding does not fit a {width}x{height} frame")]
    DoesNotFit {
        side: u32,
        padding: u32,
        width: u32,
        height: u32,
    },

    #[error("Empty secondary frame")]
    EmptySecondary,
}

/// Errors that can occur during recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No source available: {0}")]
    NoSourceAvailable(String),

    #[error("Writer setup failed: {0}")]
    WriterSetupFailed(WriterError),

    #[error("Writer append failed: {0}")]
    WriterAppendFailed(WriterError),

    #[error("Writer entered failed state: {0}")]
    WriterEnteredFailedState(WriterError),

    #[error("Secondary producer unavailable: {0}")]
    SecondaryProducerUnavailable(CameraError),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("No frames were captured")]
    NoFramesCaptured,

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CaptureError> for RecordingError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied => {
                RecordingError::PermissionDenied("capture permission not granted".to_string())
            }
            CaptureError::NoSource(what) => RecordingError::NoSourceAvailable(what),
            other => RecordingError::Capture(other.to_string()),
        }
    }
}

impl From<CameraError> for RecordingError {
    fn from(error: CameraError) -> Self {
        RecordingError::SecondaryProducerUnavailable(error)
    }
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Error response for front ends
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecordingError> for ErrorResponse {
    fn from(error: RecordingError) -> Self {
        let code = match &error {
            RecordingError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecordingError::NoSourceAvailable(_) => "NO_SOURCE_AVAILABLE",
            RecordingError::WriterSetupFailed(_) => "WRITER_SETUP_FAILED",
            RecordingError::WriterAppendFailed(_) => "WRITER_APPEND_FAILED",
            RecordingError::WriterEnteredFailedState(_) => "WRITER_FAILED",
            RecordingError::SecondaryProducerUnavailable(_) => "SECONDARY_PRODUCER_UNAVAILABLE",
            RecordingError::AlreadyRecording => "ALREADY_RECORDING",
            RecordingError::NotRecording => "NOT_RECORDING",
            RecordingError::NoFramesCaptured => "NO_FRAMES_CAPTURED",
            RecordingError::Capture(_) => "CAPTURE_ERROR",
            RecordingError::InvalidConfig(_) => "INVALID_CONFIG",
            RecordingError::Io(_) => "IO_ERROR",
            RecordingError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Remove a partially written file, logging instead of failing
pub fn remove_partial_file(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!("Deleted partial file {:?}", path),
        Err(e) => tracing::warn!("Failed to delete partial file {:?}: {}", path, e),
    }
}
