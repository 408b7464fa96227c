//! FFmpeg container writer
//!
//! Video is piped as raw RGBA into an `ffmpeg` child. A feeder thread owns
//! the child's stdin; `append` only hands frames over a bounded queue, so a
//! slow encoder shows up as backpressure instead of a blocked callback.
//!
//! The raw pipe has no timestamps: frame N is shown at N / fps. Frames are
//! therefore paced onto that grid. A gap is covered by repeating the frame
//! shown before it, and a frame that lands on an already written slot is
//! skipped. Audio tracks are spooled as f32le next to the output by their own
//! threads, padded with silence over gaps, and muxed with the encoded video in
//! a final pass.

use super::{ContainerWriter, TrackId, TrackSpec, WriterFactory, WriterStatus};
use crate::capture::sample::{AudioBuffer, AudioFormat, SamplePayload, TrackKind};
use crate::capture::traits::Resolution;
use crate::utils::error::{remove_partial_file, WriterError};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Encoder settings shared by every writer a factory creates
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    /// `ffmpeg` binary to run
    pub program: PathBuf,
    /// Frames allowed in flight between `append` and the encoder
    pub queue_depth: usize,
    /// Audio buffers allowed in flight per track between `append` and its spool
    pub audio_queue_depth: usize,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            queue_depth: 8,
            audio_queue_depth: 64,
            preset: "veryfast".to_string(),
            crf: 18,
            audio_bitrate: "192k".to_string(),
        }
    }
}

/// Whether the configured `ffmpeg` can be run at all
pub fn ffmpeg_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Maps timestamps onto the constant-frame-rate grid of the raw pipe
#[derive(Debug, Clone, Copy)]
struct CfrPacer {
    frame_rate: u32,
    /// Next grid slot to fill
    next: u64,
}

impl CfrPacer {
    fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            next: 0,
        }
    }

    fn slot(&self, time: Duration) -> u64 {
        (time.as_secs_f64() * self.frame_rate as f64).round() as u64
    }

    /// Empty slots before the one a frame at `time` fills; `None` to skip it
    fn gap(&self, time: Duration) -> Option<u64> {
        let slot = self.slot(time);
        slot.checked_sub(self.next)
    }

    fn advance(&mut self, time: Duration) {
        self.next = self.next.max(self.slot(time) + 1);
    }

    fn frames_written(&self) -> u64 {
        self.next
    }
}

/// f32le spool for one audio track
struct AudioSpool {
    path: PathBuf,
    format: AudioFormat,
    out: BufWriter<File>,
    written: u64,
}

impl AudioSpool {
    fn create(path: PathBuf, format: AudioFormat) -> Result<Self, WriterError> {
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            format,
            out,
            written: 0,
        })
    }

    fn write_samples(&mut self, samples: &[f32]) -> Result<(), WriterError> {
        for sample in samples {
            self.out.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }

    /// Write `buffer` at `time`, padding or trimming to keep the spool on time
    fn append(&mut self, time: Duration, buffer: &AudioBuffer) -> Result<(), WriterError> {
        let channels = self.format.channels.max(1) as usize;
        let expected = (time.as_secs_f64() * self.format.sample_rate as f64).round() as u64;

        let mut samples = buffer.samples.as_slice();
        if expected > self.written {
            let gap = (expected - self.written) as usize;
            self.write_samples(&vec![0.0; gap * channels])?;
            self.written += gap as u64;
        } else if expected < self.written {
            // Overlaps what is already written
            let overlap = ((self.written - expected) as usize * channels).min(samples.len());
            samples = &samples[overlap..];
        }

        self.write_samples(samples)?;
        self.written += (samples.len() / channels) as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Bounded hand-off to a worker thread; sending never blocks
struct BoundedQueue<T> {
    tx: Option<SyncSender<T>>,
    /// Sent and not yet handled, including the item being worked on
    queued: Arc<AtomicUsize>,
    depth: usize,
    failure: Arc<Mutex<Option<String>>>,
    name: &'static str,
}

/// Worker end of a [`BoundedQueue`]
struct QueueDrain<T> {
    rx: Receiver<T>,
    queued: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<String>>>,
}

fn bounded<T>(depth: usize, name: &'static str) -> (BoundedQueue<T>, QueueDrain<T>) {
    let depth = depth.max(1);
    let (tx, rx) = mpsc::sync_channel(depth);
    let queued = Arc::new(AtomicUsize::new(0));
    let failure = Arc::new(Mutex::new(None));
    let queue = BoundedQueue {
        tx: Some(tx),
        queued: queued.clone(),
        depth,
        failure: failure.clone(),
        name,
    };
    (queue, QueueDrain { rx, queued, failure })
}

impl<T> BoundedQueue<T> {
    fn is_ready(&self) -> bool {
        self.tx.is_some() && self.queued.load(Ordering::Acquire) < self.depth
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn send(&self, item: T) -> Result<(), WriterError> {
        let Some(tx) = &self.tx else {
            return Err(WriterError::InvalidState("queue closed"));
        };
        if self.queued.fetch_add(1, Ordering::AcqRel) >= self.depth {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(WriterError::Io(format!("{} full", self.name)));
        }
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                Err(WriterError::Io(format!("{} full", self.name)))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                Err(WriterError::Failed(
                    self.failure()
                        .unwrap_or_else(|| format!("{} worker exited", self.name)),
                ))
            }
        }
    }

    /// No more items; the worker drains what is queued and returns
    fn close(&mut self) {
        drop(self.tx.take());
    }
}

impl<T> QueueDrain<T> {
    /// Handle every item until the queue closes or `handle` fails
    fn run(self, mut handle: impl FnMut(T) -> Result<(), String>) -> Result<(), String> {
        for item in self.rx.iter() {
            let result = handle(item);
            self.queued.fetch_sub(1, Ordering::AcqRel);
            if let Err(reason) = result {
                *self.failure.lock() = Some(reason.clone());
                return Err(reason);
            }
        }
        Ok(())
    }
}

/// An audio track whose spool is written by its own thread
struct AudioTrack {
    kind: TrackKind,
    path: PathBuf,
    format: AudioFormat,
    queue: BoundedQueue<(Duration, AudioBuffer)>,
    /// Yields the frames written once the queue is closed and drained
    worker: Option<JoinHandle<Result<u64, WriterError>>>,
}

impl AudioTrack {
    fn spawn(
        kind: TrackKind,
        path: PathBuf,
        format: AudioFormat,
        depth: usize,
    ) -> Result<Self, WriterError> {
        let mut spool = AudioSpool::create(path.clone(), format)?;
        let (queue, drain) = bounded(depth, "audio queue");
        let worker = std::thread::Builder::new()
            .name(format!("audio-spool-{kind}"))
            .spawn(move || -> Result<u64, WriterError> {
                drain
                    .run(|(time, buffer): (Duration, AudioBuffer)| {
                        spool.append(time, &buffer).map_err(|e| {
                            tracing::error!("Audio spool {:?} failed: {}", spool.path, e);
                            format!("audio spool write failed: {e}")
                        })
                    })
                    .map_err(WriterError::Failed)?;
                spool.flush()?;
                Ok(spool.written)
            })
            .map_err(|e| WriterError::Spawn(e.to_string()))?;
        Ok(Self {
            kind,
            path,
            format,
            queue,
            worker: Some(worker),
        })
    }

    /// Close the queue and wait for the spool to be flushed
    fn finish(&mut self) -> Result<u64, WriterError> {
        self.queue.close();
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_else(|_| {
                Err(WriterError::Failed("audio spool thread panicked".to_string()))
            }),
            None => Err(WriterError::InvalidState("audio track already finished")),
        }
    }
}

enum TrackState {
    Video {
        resolution: Resolution,
        frame_rate: u32,
        pacer: CfrPacer,
    },
    Audio(AudioTrack),
}

struct Frame {
    data: Arc<[u8]>,
    /// Empty grid slots before this frame
    gap: u64,
}

/// Write `frame`, first covering its gap with the frame shown before it
///
/// The very first frame has nothing before it and covers its own gap.
fn write_paced(
    out: &mut impl Write,
    previous: &mut Option<Arc<[u8]>>,
    frame: Frame,
) -> io::Result<()> {
    let fill = previous.as_ref().unwrap_or(&frame.data);
    for _ in 0..frame.gap {
        out.write_all(fill)?;
    }
    out.write_all(&frame.data)?;
    *previous = Some(frame.data);
    Ok(())
}

/// The running `ffmpeg` video encoder
struct VideoEncoder {
    child: Child,
    queue: BoundedQueue<Frame>,
    feeder: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl VideoEncoder {
    fn spawn(
        settings: &FfmpegSettings,
        resolution: Resolution,
        frame_rate: u32,
        output: &Path,
    ) -> Result<Self, WriterError> {
        let size = format!("{}x{}", resolution.width, resolution.height);
        let rate = frame_rate.to_string();
        let gop = (frame_rate * 2).to_string();
        let crf = settings.crf.to_string();
        let mut child = Command::new(&settings.program)
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgba",
                "-video_size",
                size.as_str(),
                "-framerate",
                rate.as_str(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                settings.preset.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-crf",
                crf.as_str(),
                "-g",
                gop.as_str(),
                "-movflags",
                "+faststart",
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WriterError::Spawn(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WriterError::Spawn("ffmpeg stdin unavailable".to_string()))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            // Drained continuously so a chatty encoder never blocks on it
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let (queue, drain) = bounded::<Frame>(settings.queue_depth, "encoder queue");
        let feeder = std::thread::Builder::new()
            .name("ffmpeg-feeder".to_string())
            .spawn(move || {
                let mut previous = None;
                let _ = drain.run(|frame| {
                    write_paced(&mut stdin, &mut previous, frame).map_err(|e| {
                        tracing::error!("FFmpeg stopped accepting frames: {}", e);
                        format!("encoder pipe closed: {e}")
                    })
                });
                // Dropping stdin signals EOF to ffmpeg
            })
            .map_err(|e| WriterError::Spawn(e.to_string()))?;

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, output: {:?}",
            size,
            frame_rate,
            output
        );

        Ok(Self {
            child,
            queue,
            feeder: Some(feeder),
            stderr,
        })
    }

    fn is_ready(&self) -> bool {
        self.queue.is_ready()
    }

    fn failure(&self) -> Option<String> {
        self.queue.failure()
    }

    fn send(&self, frame: Frame) -> Result<(), WriterError> {
        self.queue.send(frame)
    }

    /// Close the input and wait for the encoder to exit
    fn finish(mut self) -> Result<(), WriterError> {
        self.queue.close();
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                tracing::error!("FFmpeg feeder thread panicked");
            }
        }
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if let Some(reason) = self.failure() {
            return Err(WriterError::Failed(reason));
        }
        if !status.success() {
            return Err(WriterError::Process {
                status: status.to_string(),
                stderr: tail(&stderr),
            });
        }
        Ok(())
    }

    fn kill(mut self) {
        self.queue.close();
        if let Err(e) = self.child.kill() {
            tracing::debug!("FFmpeg already exited: {}", e);
        }
        let _ = self.child.wait();
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
        if let Some(stderr) = self.stderr.take() {
            let _ = stderr.join();
        }
    }
}

/// Last lines of ffmpeg's stderr, where the actual error is
fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}

/// `<stem>.<suffix>` next to the output
fn scratch_path(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    output.with_file_name(format!(".{stem}.{suffix}"))
}

/// One output container written through ffmpeg
pub struct FfmpegWriter {
    path: PathBuf,
    settings: FfmpegSettings,
    tracks: Vec<TrackState>,
    encoder: Option<VideoEncoder>,
    /// Where the encoder writes: the output itself, or a scratch file when
    /// audio still has to be muxed in
    video_path: PathBuf,
    status: WriterStatus,
}

impl FfmpegWriter {
    pub fn new(path: &Path, settings: FfmpegSettings) -> Result<Self, WriterError> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
                return Err(WriterError::Setup(format!(
                    "output directory {:?} does not exist",
                    dir
                )));
            }
            _ => {}
        }
        Ok(Self {
            path: path.to_path_buf(),
            settings,
            tracks: Vec::new(),
            encoder: None,
            video_path: path.to_path_buf(),
            status: WriterStatus::Writing,
        })
    }

    fn audio_tracks(&self) -> impl Iterator<Item = &AudioTrack> {
        self.tracks.iter().filter_map(|t| match t {
            TrackState::Audio(audio) => Some(audio),
            TrackState::Video { .. } => None,
        })
    }

    /// A failure reported by the encoder or a spool thread
    fn worker_failure(&self) -> Option<String> {
        self.encoder
            .as_ref()
            .and_then(|e| e.failure())
            .or_else(|| self.audio_tracks().find_map(|a| a.queue.failure()))
    }

    fn check_failure(&mut self) -> Result<(), WriterError> {
        if let WriterStatus::Failed(reason) = &self.status {
            return Err(WriterError::Failed(reason.clone()));
        }
        if let Some(reason) = self.worker_failure() {
            self.status = WriterStatus::Failed(reason.clone());
            return Err(WriterError::Failed(reason));
        }
        Ok(())
    }

    /// Wait for every spool thread; the first error wins
    fn finish_audio(&mut self) -> Result<(), WriterError> {
        let mut result = Ok(());
        for track in &mut self.tracks {
            if let TrackState::Audio(audio) = track {
                if audio.worker.is_none() {
                    continue;
                }
                match audio.finish() {
                    Ok(frames) => tracing::debug!("Spooled {} {} frames", frames, audio.kind),
                    Err(e) if result.is_ok() => result = Err(e),
                    Err(e) => tracing::warn!("Audio spool {:?} failed: {}", audio.path, e),
                }
            }
        }
        result
    }

    /// Mux the encoded video with every audio spool into the output
    fn mux_audio(&self) -> Result<(), WriterError> {
        let mut command = Command::new(&self.settings.program);
        command.arg("-y").arg("-i").arg(&self.video_path);

        let spools: Vec<_> = self.audio_tracks().collect();
        for audio in &spools {
            command
                .args(["-f", "f32le", "-ar"])
                .arg(audio.format.sample_rate.to_string())
                .arg("-ac")
                .arg(audio.format.channels.to_string())
                .arg("-i")
                .arg(&audio.path);
        }
        command.args(["-map", "0:v"]);
        for index in 1..=spools.len() {
            command.arg("-map").arg(format!("{index}:a"));
        }
        for (index, audio) in spools.iter().enumerate() {
            command
                .arg(format!("-metadata:s:a:{index}"))
                .arg(format!("title={}", audio.kind));
        }
        command
            .args(["-c:v", "copy", "-c:a", "aac", "-b:a"])
            .arg(&self.settings.audio_bitrate)
            .args(["-movflags", "+faststart"])
            .arg(&self.path);

        tracing::debug!("Muxing {} audio track(s) into {:?}", spools.len(), self.path);
        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WriterError::Spawn(e.to_string()))?;
        if !output.status.success() {
            return Err(WriterError::Process {
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(())
    }

    fn remove_scratch(&self) {
        if self.video_path != self.path {
            remove_partial_file(&self.video_path);
        }
        for audio in self.audio_tracks() {
            remove_partial_file(&audio.path);
        }
    }
}

impl ContainerWriter for FfmpegWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_track(&mut self, spec: TrackSpec) -> Result<TrackId, WriterError> {
        if self.encoder.is_some() {
            return Err(WriterError::InvalidState("session already started"));
        }
        let state = match spec {
            TrackSpec::Video {
                resolution,
                frame_rate,
            } => {
                if self.tracks.iter().any(|t| matches!(t, TrackState::Video { .. })) {
                    return Err(WriterError::InvalidState("only one video track is supported"));
                }
                TrackState::Video {
                    resolution,
                    frame_rate,
                    pacer: CfrPacer::new(frame_rate),
                }
            }
            TrackSpec::Audio { kind, format } => {
                let path = scratch_path(&self.path, &format!("{kind}.f32"));
                TrackState::Audio(AudioTrack::spawn(
                    kind,
                    path,
                    format,
                    self.settings.audio_queue_depth,
                )?)
            }
        };
        self.tracks.push(state);
        Ok(self.tracks.len() - 1)
    }

    fn start_session(&mut self, _source_zero: Duration) -> Result<(), WriterError> {
        if self.encoder.is_some() {
            return Err(WriterError::InvalidState("session already started"));
        }
        let (resolution, frame_rate) = self
            .tracks
            .iter()
            .find_map(|t| match t {
                TrackState::Video {
                    resolution,
                    frame_rate,
                    ..
                } => Some((*resolution, *frame_rate)),
                TrackState::Audio { .. } => None,
            })
            .ok_or(WriterError::InvalidState("no video track"))?;

        if self.audio_tracks().next().is_some() {
            self.video_path = scratch_path(&self.path, "video.mp4");
        }
        match VideoEncoder::spawn(&self.settings, resolution, frame_rate, &self.video_path) {
            Ok(encoder) => {
                self.encoder = Some(encoder);
                Ok(())
            }
            Err(e) => {
                self.status = WriterStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn is_ready_for_more_data(&self, track: TrackId) -> bool {
        match self.tracks.get(track) {
            Some(TrackState::Video { .. }) => self.encoder.as_ref().is_some_and(|e| e.is_ready()),
            Some(TrackState::Audio(audio)) => !self.status.is_failed() && audio.queue.is_ready(),
            None => false,
        }
    }

    fn append(
        &mut self,
        track: TrackId,
        time: Duration,
        payload: SamplePayload,
    ) -> Result<(), WriterError> {
        self.check_failure()?;
        let encoder = self.encoder.as_ref();
        let state = self
            .tracks
            .get_mut(track)
            .ok_or(WriterError::UnknownTrack(track))?;

        match (state, payload) {
            (
                TrackState::Video {
                    resolution, pacer, ..
                },
                SamplePayload::Video(frame),
            ) => {
                let encoder = encoder.ok_or(WriterError::InvalidState("session not started"))?;
                if frame.resolution() != *resolution {
                    return Err(WriterError::Io(format!(
                        "frame is {}, track expects {}",
                        frame.resolution(),
                        resolution
                    )));
                }
                let Some(gap) = pacer.gap(time) else {
                    tracing::trace!("Skipping frame at {:?}, slot already written", time);
                    return Ok(());
                };
                let data: Arc<[u8]> = Arc::from(frame.packed().as_ref());
                encoder.send(Frame { data, gap })?;
                pacer.advance(time);
                Ok(())
            }
            (TrackState::Audio(audio), SamplePayload::Audio(buffer)) => {
                audio.queue.send((time, buffer))
            }
            _ => Err(WriterError::InvalidState("payload does not match track")),
        }
    }

    fn mark_finished(&mut self, track: TrackId) {
        // Runs under the muxer lock: close only, the spool drains on its own
        if let Some(TrackState::Audio(audio)) = self.tracks.get_mut(track) {
            audio.queue.close();
        }
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        self.check_failure()?;
        let Some(encoder) = self.encoder.take() else {
            return Err(WriterError::EmptySession);
        };

        let result = encoder
            .finish()
            .and_then(|()| self.finish_audio())
            .and_then(|()| {
                if self.video_path != self.path {
                    self.mux_audio()
                } else {
                    Ok(())
                }
            });

        match result {
            Ok(()) => {
                let frames = self
                    .tracks
                    .iter()
                    .find_map(|t| match t {
                        TrackState::Video { pacer, .. } => Some(pacer.frames_written()),
                        TrackState::Audio { .. } => None,
                    })
                    .unwrap_or_default();
                self.remove_scratch();
                self.status = WriterStatus::Completed;
                tracing::info!("FFmpeg finished: {} frames, output: {:?}", frames, self.path);
                Ok(())
            }
            Err(e) => {
                self.status = WriterStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn cancel(&mut self) {
        if self.status == WriterStatus::Completed {
            return;
        }
        if let Some(encoder) = self.encoder.take() {
            encoder.kill();
        }
        // Spool threads hold their files open until they return
        if let Err(e) = self.finish_audio() {
            tracing::debug!("Audio spool ended with error during cancel: {}", e);
        }
        self.remove_scratch();
        remove_partial_file(&self.path);
        if !self.status.is_failed() {
            self.status = WriterStatus::Cancelled;
        }
    }

    fn status(&self) -> WriterStatus {
        if self.status == WriterStatus::Completed {
            return WriterStatus::Completed;
        }
        if let Some(reason) = self.worker_failure() {
            return WriterStatus::Failed(reason);
        }
        self.status.clone()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        // Never leave a half-written file or a running encoder behind
        if self.status != WriterStatus::Completed {
            self.cancel();
        }
    }
}

/// Creates [`FfmpegWriter`]s
#[derive(Debug, Clone, Default)]
pub struct FfmpegWriterFactory {
    settings: FfmpegSettings,
}

impl FfmpegWriterFactory {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FfmpegSettings {
        &self.settings
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError> {
        if !ffmpeg_available(&self.settings.program) {
            return Err(WriterError::Spawn(format!(
                "{:?} not found; install FFmpeg to record",
                self.settings.program
            )));
        }
        Ok(Box::new(FfmpegWriter::new(path, self.settings.clone())?))
    }
}
