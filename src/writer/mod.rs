//! Container writers
//!
//! A [`ContainerWriter`] is the encoder end of the pipeline: it owns one
//! output container with one input per track. The [`Muxer`](crate::recorder::Muxer)
//! is the only caller and serializes every call, so implementations need no
//! locking of their own beyond what their internal threads require.

pub mod ffmpeg;
pub mod memory;

use crate::capture::sample::{AudioFormat, SamplePayload, TrackKind};
use crate::capture::traits::Resolution;
use crate::utils::error::WriterError;
use std::path::Path;
use std::time::Duration;

pub use ffmpeg::{FfmpegWriter, FfmpegWriterFactory};
pub use memory::{AppendRecord, FaultPlan, MemoryLog, MemoryWriter, MemoryWriterFactory};

/// Index of a track inside one writer
pub type TrackId = usize;

/// Track parameters, fixed when the track is added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSpec {
    Video {
        resolution: Resolution,
        frame_rate: u32,
    },
    Audio {
        kind: TrackKind,
        format: AudioFormat,
    },
}

impl TrackSpec {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSpec::Video { .. } => TrackKind::Video,
            TrackSpec::Audio { kind, .. } => *kind,
        }
    }

    /// Nominal duration of one video frame
    pub fn frame_duration(&self) -> Option<Duration> {
        match self {
            TrackSpec::Video { frame_rate, .. } if *frame_rate > 0 => {
                Some(Duration::from_secs_f64(1.0 / *frame_rate as f64))
            }
            _ => None,
        }
    }
}

/// Health of the underlying encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Writing,
    Completed,
    Cancelled,
    Failed(String),
}

impl WriterStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, WriterStatus::Failed(_))
    }
}

/// Encoder plus container for one output file
///
/// Times passed to `append` are already retimed onto the output timeline
/// (zero at the first video frame, paused spans removed).
pub trait ContainerWriter: Send {
    fn output_path(&self) -> &Path;

    fn add_track(&mut self, spec: TrackSpec) -> Result<TrackId, WriterError>;

    /// Called once, with the source time of the first accepted video frame
    fn start_session(&mut self, source_zero: Duration) -> Result<(), WriterError>;

    /// Non-blocking backpressure check
    fn is_ready_for_more_data(&self, track: TrackId) -> bool;

    fn append(
        &mut self,
        track: TrackId,
        time: Duration,
        payload: SamplePayload,
    ) -> Result<(), WriterError>;

    fn mark_finished(&mut self, track: TrackId);

    /// Flush the encoder and close the container
    fn finish(&mut self) -> Result<(), WriterError>;

    /// Abandon the container, removing anything written so far
    fn cancel(&mut self);

    fn status(&self) -> WriterStatus;
}

/// Creates one writer per session
pub trait WriterFactory: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError>;
}
