//! Media samples flowing from capture callbacks into the muxer
//!
//! A [`Sample`] is owned by the callback that produced it until it is handed
//! to the compositor or the muxer; payload buffers are never mutated after
//! construction, so a frame may be shared (`Arc`) with a preview consumer.

use super::traits::Resolution;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// What produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleKind {
    Video,
    SystemAudio,
    MicAudio,
    Camera,
}

impl SampleKind {
    /// Track a sample of this kind is written to
    ///
    /// Camera frames land on the video track of the camera's own container.
    pub fn track(self) -> TrackKind {
        match self {
            SampleKind::Video | SampleKind::Camera => TrackKind::Video,
            SampleKind::SystemAudio => TrackKind::SystemAudio,
            SampleKind::MicAudio => TrackKind::MicAudio,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, SampleKind::Video | SampleKind::Camera)
    }
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleKind::Video => write!(f, "video"),
            SampleKind::SystemAudio => write!(f, "system-audio"),
            SampleKind::MicAudio => write!(f, "mic-audio"),
            SampleKind::Camera => write!(f, "camera"),
        }
    }
}

/// One logical stream inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Video,
    SystemAudio,
    MicAudio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::SystemAudio => write!(f, "system-audio"),
            TrackKind::MicAudio => write!(f, "mic-audio"),
        }
    }
}

/// Platform-reported status of a captured video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    /// Nothing changed on screen since the previous frame
    Idle,
    Blank,
    Suspended,
    Started,
    Stopped,
    /// A genuine, fully rendered frame
    Complete,
}

/// RGBA8 pixel buffer
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    /// Bytes per row (may include padding)
    bytes_per_row: u32,
    data: Arc<[u8]>,
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_row", &self.bytes_per_row)
            .field("len", &self.data.len())
            .finish()
    }
}

impl VideoFrame {
    /// Wrap a (possibly padded) RGBA buffer
    ///
    /// Returns `None` when the buffer is too small for the given geometry.
    pub fn new(width: u32, height: u32, bytes_per_row: u32, data: impl Into<Arc<[u8]>>) -> Option<Self> {
        let data = data.into();
        let min_row = width as usize * 4;
        if (bytes_per_row as usize) < min_row {
            return None;
        }
        let needed = if height == 0 {
            0
        } else {
            bytes_per_row as usize * (height as usize - 1) + min_row
        };
        if data.len() < needed {
            return None;
        }
        Some(Self {
            width,
            height,
            bytes_per_row,
            data,
        })
    }

    /// Wrap a tightly packed RGBA buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        Self::new(width, height, width * 4, data)
    }

    /// Frame filled with a single colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            bytes_per_row: width * 4,
            data: data.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Raw bytes including any row padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel data without row padding
    pub fn packed(&self) -> Cow<'_, [u8]> {
        let row = self.width as usize * 4;
        if self.bytes_per_row as usize == row {
            return Cow::Borrowed(&self.data[..row * self.height as usize]);
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.bytes_per_row as usize;
            out.extend_from_slice(&self.data[start..start + row]);
        }
        Cow::Owned(out)
    }

    /// RGBA value at (x, y), if in bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_row as usize + x as usize * 4;
        let px = &self.data[offset..offset + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// True when both frames share the same backing buffer
    pub fn shares_buffer(&self, other: &VideoFrame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Sample rate and channel layout of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Interleaved f32 PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
        Self { format, samples }
    }

    /// Buffer of silence lasting `frames` sample frames
    pub fn silence(format: AudioFormat, frames: usize) -> Self {
        Self {
            format,
            samples: vec![0.0; frames * format.channels as usize],
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.format.sample_rate as f64)
    }
}

/// Sample body
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    Video(VideoFrame),
    Audio(AudioBuffer),
}

/// A timestamped unit of media from one capture callback
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: SampleKind,
    pub payload: SamplePayload,
    /// Presentation time on the host clock
    pub presentation_time: Duration,
    pub status: FrameStatus,
}

impl Sample {
    pub fn video(frame: VideoFrame, presentation_time: Duration, status: FrameStatus) -> Self {
        Self {
            kind: SampleKind::Video,
            payload: SamplePayload::Video(frame),
            presentation_time,
            status,
        }
    }

    pub fn camera(frame: VideoFrame, presentation_time: Duration) -> Self {
        Self {
            kind: SampleKind::Camera,
            payload: SamplePayload::Video(frame),
            presentation_time,
            status: FrameStatus::Complete,
        }
    }

    pub fn system_audio(buffer: AudioBuffer, presentation_time: Duration) -> Self {
        Self::audio(SampleKind::SystemAudio, buffer, presentation_time)
    }

    pub fn mic_audio(buffer: AudioBuffer, presentation_time: Duration) -> Self {
        Self::audio(SampleKind::MicAudio, buffer, presentation_time)
    }

    fn audio(kind: SampleKind, buffer: AudioBuffer, presentation_time: Duration) -> Self {
        Self {
            kind,
            payload: SamplePayload::Audio(buffer),
            presentation_time,
            status: FrameStatus::Complete,
        }
    }

    /// Audio is always complete; video only when the platform says so
    pub fn is_complete(&self) -> bool {
        self.status == FrameStatus::Complete
    }

    pub fn video_frame(&self) -> Option<&VideoFrame> {
        match &self.payload {
            SamplePayload::Video(frame) => Some(frame),
            SamplePayload::Audio(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_short_buffer() {
        assert!(VideoFrame::new(4, 4, 16, vec![0u8; 63]).is_none());
        assert!(VideoFrame::new(4, 4, 12, vec![0u8; 64]).is_none());
        assert!(VideoFrame::new(4, 4, 16, vec![0u8; 64]).is_some());
    }

    #[test]
    fn test_packed_strips_row_padding() {
        // 2x2 frame with 4 bytes of padding per row
        let mut data = vec![0u8; 24];
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        data[12..16].copy_from_slice(&[5, 6, 7, 8]);
        let frame = VideoFrame::new(2, 2, 12, data).unwrap();

        let packed = frame.packed();
        assert_eq!(packed.len(), 16);
        assert_eq!(&packed[0..4], &[1, 2, 3, 4]);
        assert_eq!(&packed[8..12], &[5, 6, 7, 8]);
        assert_eq!(frame.pixel(0, 1), Some([5, 6, 7, 8]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_audio_duration() {
        let buffer = AudioBuffer::silence(AudioFormat::default(), 480);
        assert_eq!(buffer.frames(), 480);
        assert_eq!(buffer.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_camera_samples_use_video_track() {
        assert_eq!(SampleKind::Camera.track(), TrackKind::Video);
        assert_eq!(SampleKind::MicAudio.track(), TrackKind::MicAudio);
        let sample = Sample::camera(VideoFrame::solid(2, 2, [0; 4]), Duration::ZERO);
        assert!(sample.is_complete());
    }
}
