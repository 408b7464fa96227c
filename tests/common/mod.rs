#![allow(dead_code)]

use open_screenstudio_recorder::capture::{
    AudioBuffer, AudioFormat, CameraDeviceOpener, FrameStatus, ManualFeed, ManualSource,
    Resolution, Sample, SamplePayload, StaticPermission, StreamInfo, TrackKind, VideoFrame,
    VideoStreamInfo,
};
use open_screenstudio_recorder::recorder::RecordingCoordinator;
use open_screenstudio_recorder::utils::{ManualClock, TimestampedNaming, WriterError};
use open_screenstudio_recorder::writer::{
    ContainerWriter, FaultPlan, MemoryLog, MemoryWriterFactory, TrackId, TrackSpec, WriterFactory,
    WriterStatus,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 200;
pub const HEIGHT: u32 = 100;
pub const SCREEN: [u8; 4] = [10, 20, 30, 255];

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub fn stream(mic: bool) -> StreamInfo {
    StreamInfo {
        video: Some(VideoStreamInfo {
            resolution: Resolution {
                width: WIDTH,
                height: HEIGHT,
            },
            frame_rate: 30,
        }),
        system_audio: None,
        microphone: mic.then(AudioFormat::default),
    }
}

pub fn video(at_ms: u64) -> Sample {
    Sample::video(
        VideoFrame::solid(WIDTH, HEIGHT, SCREEN),
        ms(at_ms),
        FrameStatus::Complete,
    )
}

/// 10ms of mic silence
pub fn mic(at_ms: u64) -> Sample {
    Sample::mic_audio(AudioBuffer::silence(AudioFormat::default(), 480), ms(at_ms))
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(ms(5));
    }
    false
}

/// Everything a coordinator test drives
pub struct Rig {
    pub coordinator: RecordingCoordinator,
    pub feed: ManualFeed,
    pub clock: Arc<ManualClock>,
    pub dir: PathBuf,
}

pub fn rig(
    dir: &Path,
    mic: bool,
    writers: Arc<dyn WriterFactory>,
    camera: Option<Arc<dyn CameraDeviceOpener>>,
) -> Rig {
    let (source, feed) = ManualSource::new(stream(mic));
    let clock = Arc::new(ManualClock::default());
    let mut coordinator = RecordingCoordinator::new(
        Box::new(source),
        writers,
        Arc::new(StaticPermission(true)),
        clock.clone(),
        Arc::new(TimestampedNaming::new(dir, "recording")),
    );
    if let Some(camera) = camera {
        coordinator = coordinator.with_camera(camera);
    }
    Rig {
        coordinator,
        feed,
        clock,
        dir: dir.to_path_buf(),
    }
}

pub fn memory_writers(log: &MemoryLog, faults: FaultPlan) -> Arc<dyn WriterFactory> {
    Arc::new(MemoryWriterFactory::new(log.clone()).with_faults(faults))
}

/// Writer that keeps one sampled pixel of every video frame
#[derive(Clone, Default)]
pub struct PixelSampler {
    pub at: (u32, u32),
    pub pixels: Arc<Mutex<Vec<Option<[u8; 4]>>>>,
}

impl PixelSampler {
    pub fn new(x: u32, y: u32) -> Self {
        Self {
            at: (x, y),
            pixels: Arc::default(),
        }
    }
}

struct SamplerWriter {
    path: PathBuf,
    sampler: PixelSampler,
    tracks: Vec<TrackKind>,
    status: WriterStatus,
}

impl ContainerWriter for SamplerWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_track(&mut self, spec: TrackSpec) -> Result<TrackId, WriterError> {
        self.tracks.push(spec.kind());
        Ok(self.tracks.len() - 1)
    }

    fn start_session(&mut self, _source_zero: Duration) -> Result<(), WriterError> {
        Ok(())
    }

    fn is_ready_for_more_data(&self, _track: TrackId) -> bool {
        true
    }

    fn append(&mut self, _track: TrackId, _time: Duration, payload: SamplePayload) -> Result<(), WriterError> {
        if let SamplePayload::Video(frame) = payload {
            let (x, y) = self.sampler.at;
            self.sampler.pixels.lock().push(frame.pixel(x, y));
        }
        Ok(())
    }

    fn mark_finished(&mut self, _track: TrackId) {}

    fn finish(&mut self) -> Result<(), WriterError> {
        std::fs::write(&self.path, b"sampled")?;
        self.status = WriterStatus::Completed;
        Ok(())
    }

    fn cancel(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        self.status = WriterStatus::Cancelled;
    }

    fn status(&self) -> WriterStatus {
        self.status.clone()
    }
}

impl WriterFactory for PixelSampler {
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError> {
        Ok(Box::new(SamplerWriter {
            path: path.to_path_buf(),
            sampler: self.clone(),
            tracks: Vec::new(),
            status: WriterStatus::Writing,
        }))
    }
}

/// Per-channel tolerance for resampling and blending
pub fn close(actual: Option<[u8; 4]>, expected: [u8; 4]) -> bool {
    actual.is_some_and(|px| px.iter().zip(expected).all(|(a, b)| a.abs_diff(b) <= 2))
}
