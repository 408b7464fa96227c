//! Synthetic capture sources
//!
//! Deterministic test patterns delivered at a fixed cadence on their own
//! threads, standing in for a platform capture session where none exists
//! (dry runs, CI, the demo binary).

use super::sample::{AudioBuffer, AudioFormat, FrameStatus, Sample, VideoFrame};
use super::traits::{
    CaptureBackend, CaptureRequest, CaptureTarget, Resolution, SampleSink, StreamInfo,
    VideoStreamInfo,
};
use crate::utils::error::CaptureError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A thread calling `tick` once per period until stopped
struct PacedThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PacedThread {
    fn spawn(
        name: &str,
        period: Duration,
        mut tick: impl FnMut(u64) + Send + 'static,
    ) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut index = 0u64;
                while !flag.load(Ordering::SeqCst) {
                    tick(index);
                    index += 1;
                    // Pace against the start time so drift does not accumulate
                    let next = start + period * index as u32;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        std::thread::sleep(wait);
                    }
                }
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Synthetic capture thread panicked");
            }
        }
    }
}

impl Drop for PacedThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Interleaved sine tone
fn tone(format: AudioFormat, frames: usize, offset: u64, hz: f32) -> AudioBuffer {
    let channels = format.channels as usize;
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames as u64 {
        let t = (offset + i) as f32 / format.sample_rate as f32;
        let value = (t * hz * std::f32::consts::TAU).sin() * 0.2;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    AudioBuffer::new(format, samples)
}

/// Screen test pattern with optional system-audio tone
pub struct SyntheticScreen {
    resolution: Resolution,
    audio_format: AudioFormat,
    stream: Option<StreamInfo>,
    threads: Vec<PacedThread>,
}

impl SyntheticScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: Resolution { width, height },
            audio_format: AudioFormat::default(),
            stream: None,
            threads: Vec::new(),
        }
    }
}

impl CaptureBackend for SyntheticScreen {
    fn name(&self) -> &str {
        "synthetic-screen"
    }

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError> {
        let resolution = match &request.target {
            CaptureTarget::Display { .. } | CaptureTarget::Window { .. } => self.resolution,
            CaptureTarget::Region { bounds, .. } => Resolution {
                width: bounds.width,
                height: bounds.height,
            },
            CaptureTarget::Device { id } => {
                return Err(CaptureError::NoSource(format!("no capture device {id}")));
            }
        };
        let info = StreamInfo {
            video: Some(VideoStreamInfo {
                resolution,
                frame_rate: request.frame_rate.max(1),
            }),
            system_audio: request.system_audio.then_some(self.audio_format),
            microphone: None,
        };
        self.stream = Some(info);
        Ok(info)
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError> {
        let info = self
            .stream
            .ok_or_else(|| CaptureError::Handshake("start before prepare".to_string()))?;
        let Some(video) = info.video else {
            return Err(CaptureError::NoSource("display".to_string()));
        };

        let period = Duration::from_secs_f64(1.0 / video.frame_rate as f64);
        let Resolution { width, height } = video.resolution;
        let video_sink = sink.clone();
        let screen = PacedThread::spawn("synthetic-screen", period, move |index| {
            let shade = (index % 128) as u8 + 64;
            let frame = VideoFrame::solid(width, height, [shade, shade / 2, 255 - shade, 255]);
            let at = video_sink.now();
            video_sink.deliver(Sample::video(frame, at, FrameStatus::Complete));
        })?;
        self.threads.push(screen);

        if let Some(format) = info.system_audio {
            let chunk = Duration::from_millis(10);
            let frames = format.sample_rate as usize / 100;
            let audio = PacedThread::spawn("synthetic-system-audio", chunk, move |index| {
                let buffer = tone(format, frames, index * frames as u64, 330.0);
                let at = sink.now();
                sink.deliver(Sample::system_audio(buffer, at));
            });
            match audio {
                Ok(thread) => self.threads.push(thread),
                Err(e) => {
                    self.stop()?;
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Synthetic screen started: {} @ {}fps",
            video.resolution,
            video.frame_rate
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        for mut thread in self.threads.drain(..) {
            thread.stop();
        }
        Ok(())
    }
}

/// Microphone tone generator
pub struct SyntheticAudio {
    format: AudioFormat,
    thread: Option<PacedThread>,
}

impl SyntheticAudio {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            thread: None,
        }
    }
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self::new(AudioFormat::default())
    }
}

impl CaptureBackend for SyntheticAudio {
    fn name(&self) -> &str {
        "synthetic-mic"
    }

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError> {
        Ok(StreamInfo {
            microphone: request.microphone.then_some(self.format),
            ..StreamInfo::default()
        })
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError> {
        let format = self.format;
        let frames = format.sample_rate as usize / 100;
        let thread = PacedThread::spawn("synthetic-mic", Duration::from_millis(10), move |index| {
            let buffer = tone(format, frames, index * frames as u64, 440.0);
            let at = sink.now();
            sink.deliver(Sample::mic_audio(buffer, at));
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
        }
        Ok(())
    }
}
