//! Capture trait definitions
//!
//! Platform-agnostic traits for capture sources.

use super::sample::{AudioFormat, Sample};
use crate::utils::clock::Clock;
use crate::utils::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Window or region bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureTarget {
    Display {
        id: u32,
    },
    Window {
        id: u32,
    },
    #[serde(rename_all = "camelCase")]
    Region {
        display_id: u32,
        bounds: WindowBounds,
    },
    Device {
        id: String,
    },
}

impl Default for CaptureTarget {
    fn default() -> Self {
        CaptureTarget::Display { id: 0 }
    }
}

/// Everything a backend needs to set up its platform session
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub frame_rate: u32,
    pub system_audio: bool,
    pub microphone: bool,
    pub microphone_device_id: Option<String>,
}

/// Video stream parameters negotiated by the platform handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStreamInfo {
    pub resolution: Resolution,
    pub frame_rate: u32,
}

/// Streams a prepared backend is going to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    pub video: Option<VideoStreamInfo>,
    pub system_audio: Option<AudioFormat>,
    pub microphone: Option<AudioFormat>,
}

impl StreamInfo {
    /// Fill every stream this one lacks from `other`
    pub fn merge(self, other: StreamInfo) -> StreamInfo {
        StreamInfo {
            video: self.video.or(other.video),
            system_audio: self.system_audio.or(other.system_audio),
            microphone: self.microphone.or(other.microphone),
        }
    }
}

/// Receives samples delivered through a [`SampleSink`]
pub trait SampleConsumer: Send + Sync {
    fn consume(&self, sample: Sample);
}

/// Handle capture callbacks use to hand samples to the pipeline
///
/// Cheap to clone; one clone per callback thread.
#[derive(Clone)]
pub struct SampleSink {
    consumer: Arc<dyn SampleConsumer>,
    clock: Arc<dyn Clock>,
}

impl SampleSink {
    pub fn new(consumer: Arc<dyn SampleConsumer>, clock: Arc<dyn Clock>) -> Self {
        Self { consumer, clock }
    }

    /// Hand a sample over; ownership moves to the pipeline
    pub fn deliver(&self, sample: Sample) {
        self.consumer.consume(sample);
    }

    /// Current time on the host timeline, for stamping samples
    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

/// A platform capture session (screen, system audio, microphone, ...)
///
/// `prepare` performs the platform handshake without delivering samples,
/// `start` begins delivery on the backend's own threads and `stop` must not
/// return until no further sample will be delivered. `stop` is idempotent.
pub trait CaptureBackend: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError>;

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Combines several backends into one platform session
///
/// Members are prepared and started in order; if one fails, the members
/// already started are stopped again before the error is returned.
pub struct SourceSet {
    name: String,
    members: Vec<Box<dyn CaptureBackend>>,
    started: usize,
}

impl SourceSet {
    pub fn new(members: Vec<Box<dyn CaptureBackend>>) -> Self {
        let name = members
            .iter()
            .map(|m| m.name().to_string())
            .collect::<Vec<_>>()
            .join("+");
        Self {
            name,
            members,
            started: 0,
        }
    }

    fn stop_started(&mut self) {
        for member in self.members[..self.started].iter_mut().rev() {
            if let Err(e) = member.stop() {
                tracing::warn!("Failed to stop capture source {}: {}", member.name(), e);
            }
        }
        self.started = 0;
    }
}

impl CaptureBackend for SourceSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError> {
        let mut info = StreamInfo::default();
        for member in &mut self.members {
            info = info.merge(member.prepare(request)?);
        }
        Ok(info)
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError> {
        for index in 0..self.members.len() {
            if let Err(e) = self.members[index].start(sink.clone()) {
                tracing::warn!(
                    "Capture source {} failed to start: {}",
                    self.members[index].name(),
                    e
                );
                self.stop_started();
                return Err(e);
            }
            self.started = index + 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_started();
        Ok(())
    }
}
