//! Muxer: the serialized write path into one container
//!
//! Samples arrive concurrently from independent capture callbacks. Every
//! mutation (track setup, append, finish, cancel) goes through one lock, so
//! the underlying [`ContainerWriter`] never sees concurrent calls and a
//! finalize can never race an in-flight append.
//!
//! The first complete video sample starts the session and defines time zero.
//! Everything else that arrives before it is dropped, never queued.

use super::pause::{PauseAccounting, PauseClock};
use crate::capture::sample::{Sample, SamplePayload, TrackKind};
use crate::capture::traits::Resolution;
use crate::utils::error::WriterError;
use crate::writer::{ContainerWriter, TrackId, TrackSpec, WriterStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Externally visible muxer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxerState {
    Unstarted,
    Writing,
    Finishing,
    Completed,
    Failed,
    Cancelled,
}

/// Origin of the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
struct Timeline {
    /// Presentation time of the first accepted video sample
    zero: Duration,
    /// Paused time already accumulated when the session started
    paused_at_zero: Duration,
    started_at: DateTime<Utc>,
}

impl Timeline {
    /// `pts - zero - paused`, or `None` if that would be negative
    fn retime(&self, pts: Duration, pause: &PauseAccounting) -> Option<Duration> {
        let paused = pause
            .accumulated_paused_duration
            .saturating_sub(self.paused_at_zero);
        pts.checked_sub(self.zero)?.checked_sub(paused)
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Unstarted,
    Writing(Timeline),
    Finishing(Timeline),
    Completed(Timeline),
    Failed {
        reason: String,
        timeline: Option<Timeline>,
    },
    Cancelled,
}

impl Phase {
    fn state(&self) -> MuxerState {
        match self {
            Phase::Unstarted => MuxerState::Unstarted,
            Phase::Writing(_) => MuxerState::Writing,
            Phase::Finishing(_) => MuxerState::Finishing,
            Phase::Completed(_) => MuxerState::Completed,
            Phase::Failed { .. } => MuxerState::Failed,
            Phase::Cancelled => MuxerState::Cancelled,
        }
    }

    fn timeline(&self) -> Option<Timeline> {
        match self {
            Phase::Writing(t) | Phase::Finishing(t) | Phase::Completed(t) => Some(*t),
            Phase::Failed { timeline, .. } => *timeline,
            Phase::Unstarted | Phase::Cancelled => None,
        }
    }
}

/// Why a sample did not make it into the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoTrack,
    Incomplete,
    Paused,
    /// The session has not started yet
    BeforeStart,
    /// Retimed below zero or behind the previous sample of its track
    Late,
    TrackFinished,
    /// Backpressure
    NotReady,
    WriteFailed,
    /// Finishing, completed, failed or cancelled
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Dropped(DropReason),
}

impl AppendOutcome {
    pub fn is_appended(self) -> bool {
        self == AppendOutcome::Appended
    }
}

/// Handle returned when a track is added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHandle {
    pub kind: TrackKind,
    pub id: TrackId,
}

/// Per-track counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStats {
    pub appended: u64,
    /// Arrived before the session started
    pub dropped_before_start: u64,
    /// Not a complete frame
    pub dropped_incomplete: u64,
    pub dropped_paused: u64,
    /// Retimed below zero or behind the previous sample
    pub dropped_late: u64,
    /// Writer reported "not ready for more data"
    pub dropped_not_ready: u64,
    /// Writer rejected the sample
    pub append_failures: u64,
    pub first_time: Option<Duration>,
    pub last_time: Option<Duration>,
    /// Estimated end of the last appended sample
    pub end_time: Option<Duration>,
}

impl TrackStats {
    fn record(&mut self, time: Duration, length: Option<Duration>) {
        let length = match (length, self.last_time) {
            (Some(len), _) => len,
            (None, Some(last)) => time.saturating_sub(last),
            (None, None) => Duration::ZERO,
        };
        self.appended += 1;
        self.first_time.get_or_insert(time);
        self.last_time = Some(time);
        self.end_time = Some(time + length);
    }
}

struct TrackSlot {
    id: TrackId,
    spec: TrackSpec,
    stats: TrackStats,
    finished: bool,
}

impl TrackSlot {
    /// Length to credit to an appended sample
    fn sample_length(&self, payload: &SamplePayload) -> Option<Duration> {
        match payload {
            SamplePayload::Audio(buffer) => Some(buffer.duration()),
            SamplePayload::Video(_) => match self.stats.last_time {
                Some(_) => None,
                None => self.spec.frame_duration(),
            },
        }
    }
}

/// Result of a successful finalize
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxerSummary {
    pub output_path: PathBuf,
    pub duration: Duration,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<u32>,
    /// Host time of the first video sample
    pub source_zero: Duration,
    pub started_at: DateTime<Utc>,
    pub tracks: Vec<(TrackKind, TrackStats)>,
}

impl MuxerSummary {
    pub fn track(&self, kind: TrackKind) -> Option<&TrackStats> {
        self.tracks.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }
}

struct MuxerInner {
    phase: Phase,
    writer: Box<dyn ContainerWriter>,
    tracks: Vec<TrackSlot>,
    last_append_error: Option<WriterError>,
}

impl MuxerInner {
    fn slot_index(&self, kind: TrackKind) -> Option<usize> {
        self.tracks.iter().position(|t| t.spec.kind() == kind)
    }

    fn fail(&mut self, label: &str, reason: String) {
        tracing::error!("[{}] Writer entered failed state: {}", label, reason);
        let timeline = self.phase.timeline();
        self.phase = Phase::Failed { reason, timeline };
    }

    fn start_session(
        &mut self,
        label: &str,
        pts: Duration,
        pause: &PauseAccounting,
    ) -> Option<Timeline> {
        if let Err(e) = self.writer.start_session(pts) {
            self.fail(label, e.to_string());
            return None;
        }
        let timeline = Timeline {
            zero: pts,
            paused_at_zero: pause.accumulated_paused_duration,
            started_at: Utc::now(),
        };
        self.phase = Phase::Writing(timeline);
        tracing::info!("[{}] Session started at source time {:?}", label, pts);
        Some(timeline)
    }

    fn append(&mut self, label: &str, sample: Sample, pause: PauseAccounting) -> AppendOutcome {
        use AppendOutcome::Dropped;

        let kind = sample.kind.track();
        let Some(index) = self.slot_index(kind) else {
            tracing::trace!("[{}] No {} track, dropping sample", label, kind);
            return Dropped(DropReason::NoTrack);
        };

        if sample.kind.is_video() && !sample.is_complete() {
            self.tracks[index].stats.dropped_incomplete += 1;
            return Dropped(DropReason::Incomplete);
        }
        if pause.is_paused {
            self.tracks[index].stats.dropped_paused += 1;
            return Dropped(DropReason::Paused);
        }

        let timeline = match self.phase {
            Phase::Writing(timeline) => timeline,
            Phase::Unstarted if kind == TrackKind::Video => {
                match self.start_session(label, sample.presentation_time, &pause) {
                    Some(timeline) => timeline,
                    None => return Dropped(DropReason::WriteFailed),
                }
            }
            Phase::Unstarted => {
                self.tracks[index].stats.dropped_before_start += 1;
                return Dropped(DropReason::BeforeStart);
            }
            Phase::Finishing(_) | Phase::Completed(_) | Phase::Failed { .. } | Phase::Cancelled => {
                return Dropped(DropReason::Closed);
            }
        };

        let slot = &mut self.tracks[index];
        if slot.finished {
            return Dropped(DropReason::TrackFinished);
        }

        let Some(time) = timeline.retime(sample.presentation_time, &pause) else {
            slot.stats.dropped_late += 1;
            tracing::trace!("[{}] Dropping {} sample retimed below zero", label, kind);
            return Dropped(DropReason::Late);
        };
        if slot.stats.last_time.is_some_and(|last| time < last) {
            slot.stats.dropped_late += 1;
            tracing::trace!("[{}] Dropping out-of-order {} sample at {:?}", label, kind, time);
            return Dropped(DropReason::Late);
        }

        if !self.writer.is_ready_for_more_data(slot.id) {
            slot.stats.dropped_not_ready += 1;
            tracing::trace!("[{}] {} input not ready, dropping sample", label, kind);
            return Dropped(DropReason::NotReady);
        }

        let length = slot.sample_length(&sample.payload);
        match self.writer.append(slot.id, time, sample.payload) {
            Ok(()) => {
                slot.stats.record(time, length);
                AppendOutcome::Appended
            }
            Err(e) => {
                slot.stats.append_failures += 1;
                tracing::warn!("[{}] Failed to append {} sample: {}", label, kind, e);
                if let WriterStatus::Failed(reason) = self.writer.status() {
                    self.fail(label, reason);
                }
                self.last_append_error = Some(e);
                Dropped(DropReason::WriteFailed)
            }
        }
    }

    fn summary(&self, timeline: Timeline) -> MuxerSummary {
        let duration = self
            .tracks
            .iter()
            .filter_map(|t| t.stats.end_time)
            .max()
            .unwrap_or_default();
        let (resolution, frame_rate) = self
            .tracks
            .iter()
            .find_map(|t| match t.spec {
                TrackSpec::Video {
                    resolution,
                    frame_rate,
                } => Some((Some(resolution), Some(frame_rate))),
                TrackSpec::Audio { .. } => None,
            })
            .unwrap_or((None, None));

        MuxerSummary {
            output_path: self.writer.output_path().to_path_buf(),
            duration,
            resolution,
            frame_rate,
            source_zero: timeline.zero,
            started_at: timeline.started_at,
            tracks: self
                .tracks
                .iter()
                .map(|t| (t.spec.kind(), t.stats.clone()))
                .collect(),
        }
    }
}

/// Owns one output container and its per-track inputs
pub struct Muxer {
    label: String,
    pause: PauseClock,
    inner: Mutex<MuxerInner>,
}

impl Muxer {
    pub fn new(label: impl Into<String>, writer: Box<dyn ContainerWriter>, pause: PauseClock) -> Self {
        Self {
            label: label.into(),
            pause,
            inner: Mutex::new(MuxerInner {
                phase: Phase::Unstarted,
                writer,
                tracks: Vec::new(),
                last_append_error: None,
            }),
        }
    }

    /// Add an input; only allowed before the session starts
    pub fn add_track(&self, spec: TrackSpec) -> Result<TrackHandle, WriterError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Unstarted) {
            return Err(WriterError::InvalidState("tracks must be added before the session starts"));
        }
        let kind = spec.kind();
        if inner.slot_index(kind).is_some() {
            return Err(WriterError::InvalidState("duplicate track"));
        }
        let id = inner.writer.add_track(spec)?;
        inner.tracks.push(TrackSlot {
            id,
            spec,
            stats: TrackStats::default(),
            finished: false,
        });
        tracing::debug!("[{}] Added {} track", self.label, kind);
        Ok(TrackHandle { kind, id })
    }

    /// Retime and append a sample, returning false if it was dropped
    ///
    /// Dropping is never a fault; only a writer that reports the failed
    /// state moves the muxer to [`MuxerState::Failed`].
    pub fn append(&self, sample: Sample) -> bool {
        self.submit(sample).is_appended()
    }

    /// Like [`Muxer::append`] but reports why a sample was dropped
    pub fn submit(&self, sample: Sample) -> AppendOutcome {
        let mut inner = self.inner.lock();
        let pause = self.pause.snapshot();
        inner.append(&self.label, sample, pause)
    }

    /// No more samples will be accepted for `kind`
    pub fn mark_finished(&self, kind: TrackKind) {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.slot_index(kind) {
            let id = inner.tracks[index].id;
            if !inner.tracks[index].finished {
                inner.tracks[index].finished = true;
                inner.writer.mark_finished(id);
            }
        }
    }

    /// Finish every track and flush the writer
    ///
    /// On error the output is cancelled and no summary is produced.
    pub fn finalize(&self) -> Result<MuxerSummary, WriterError> {
        let mut inner = self.inner.lock();
        let timeline = match std::mem::replace(&mut inner.phase, Phase::Cancelled) {
            Phase::Writing(timeline) => timeline,
            Phase::Unstarted => {
                tracing::warn!("[{}] Finalize before any video sample, cancelling", self.label);
                inner.writer.cancel();
                return Err(WriterError::EmptySession);
            }
            Phase::Failed { reason, timeline } => {
                inner.writer.cancel();
                inner.phase = Phase::Failed {
                    reason: reason.clone(),
                    timeline,
                };
                return Err(WriterError::Failed(reason));
            }
            other @ (Phase::Finishing(_) | Phase::Completed(_) | Phase::Cancelled) => {
                inner.phase = other;
                return Err(WriterError::InvalidState("muxer already finalized or cancelled"));
            }
        };

        inner.phase = Phase::Finishing(timeline);
        let MuxerInner { writer, tracks, .. } = &mut *inner;
        for slot in tracks.iter_mut().filter(|t| !t.finished) {
            slot.finished = true;
            writer.mark_finished(slot.id);
        }

        match inner.writer.finish() {
            Ok(()) => {
                inner.phase = Phase::Completed(timeline);
                let summary = inner.summary(timeline);
                tracing::info!(
                    "[{}] Finalized {:?}: {:.3}s",
                    self.label,
                    summary.output_path,
                    summary.duration.as_secs_f64()
                );
                Ok(summary)
            }
            Err(e) => {
                inner.writer.cancel();
                let label = self.label.clone();
                inner.fail(&label, e.to_string());
                Err(e)
            }
        }
    }

    /// Abandon the output. A completed muxer is left alone; a failed one
    /// stays failed but has its partial output removed.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Completed(_) | Phase::Cancelled => {}
            Phase::Failed { .. } => inner.writer.cancel(),
            Phase::Unstarted | Phase::Writing(_) | Phase::Finishing(_) => {
                inner.writer.cancel();
                inner.phase = Phase::Cancelled;
                tracing::info!("[{}] Cancelled", self.label);
            }
        }
    }

    pub fn state(&self) -> MuxerState {
        self.inner.lock().phase.state()
    }

    /// Most recent error from a rejected append, fatal or not
    pub fn last_append_error(&self) -> Option<WriterError> {
        self.inner.lock().last_append_error.clone()
    }

    /// Why the writer failed, if it did
    pub fn failure(&self) -> Option<String> {
        match &self.inner.lock().phase {
            Phase::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn track_stats(&self, kind: TrackKind) -> Option<TrackStats> {
        let inner = self.inner.lock();
        inner
            .slot_index(kind)
            .map(|index| inner.tracks[index].stats.clone())
    }

    /// Host time of the first accepted video sample
    pub fn source_zero(&self) -> Option<Duration> {
        self.inner.lock().phase.timeline().map(|t| t.zero)
    }

    /// Wall-clock time the session started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().phase.timeline().map(|t| t.started_at)
    }

    pub fn output_path(&self) -> PathBuf {
        self.inner.lock().writer.output_path().to_path_buf()
    }

    /// Output-timeline duration as of host time `now`, paused time excluded
    pub fn live_duration(&self, now: Duration) -> Duration {
        let inner = self.inner.lock();
        match inner.phase {
            Phase::Writing(t) | Phase::Finishing(t) => {
                let paused = self
                    .pause
                    .snapshot()
                    .paused_total(now)
                    .saturating_sub(t.paused_at_zero);
                now.saturating_sub(t.zero).saturating_sub(paused)
            }
            _ => inner
                .tracks
                .iter()
                .filter_map(|t| t.stats.end_time)
                .max()
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sample::{AudioBuffer, AudioFormat, FrameStatus, VideoFrame};
    use crate::writer::{FaultPlan, MemoryLog, MemoryWriter};
    use tempfile::{tempdir, TempDir};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn video(at: u64) -> Sample {
        Sample::video(VideoFrame::solid(4, 4, [1, 2, 3, 255]), ms(at), FrameStatus::Complete)
    }

    fn video_with(at: u64, status: FrameStatus) -> Sample {
        Sample::video(VideoFrame::solid(4, 4, [1, 2, 3, 255]), ms(at), status)
    }

    fn mic(at: u64) -> Sample {
        Sample::mic_audio(AudioBuffer::silence(AudioFormat::default(), 480), ms(at))
    }

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        log: MemoryLog,
        pause: PauseClock,
        muxer: Muxer,
    }

    fn fixture_with(faults: FaultPlan, audio: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let log = MemoryLog::new();
        let pause = PauseClock::new();
        let writer = MemoryWriter::new(&path, log.clone(), faults).unwrap();
        let muxer = Muxer::new("test", Box::new(writer), pause.clone());
        muxer
            .add_track(TrackSpec::Video {
                resolution: Resolution { width: 4, height: 4 },
                frame_rate: 30,
            })
            .unwrap();
        if audio {
            muxer
                .add_track(TrackSpec::Audio {
                    kind: TrackKind::MicAudio,
                    format: AudioFormat::default(),
                })
                .unwrap();
        }
        Fixture {
            _dir: dir,
            path,
            log,
            pause,
            muxer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FaultPlan::default(), true)
    }

    #[test]
    fn test_first_complete_video_starts_session() {
        let f = fixture();
        assert_eq!(f.muxer.state(), MuxerState::Unstarted);

        assert!(!f.muxer.append(video_with(100, FrameStatus::Idle)));
        assert!(!f.muxer.append(video_with(110, FrameStatus::Blank)));
        assert_eq!(f.muxer.state(), MuxerState::Unstarted);

        assert!(f.muxer.append(video(120)));
        assert_eq!(f.muxer.state(), MuxerState::Writing);
        assert_eq!(f.muxer.source_zero(), Some(ms(120)));

        // A later complete frame does not restart anything
        assert!(f.muxer.append(video(153)));
        assert_eq!(f.muxer.source_zero(), Some(ms(120)));
        assert_eq!(f.log.last().unwrap().times(TrackKind::Video), vec![ms(0), ms(33)]);
    }

    #[test]
    fn test_audio_before_video_is_dropped_not_queued() {
        let f = fixture();
        for at in [0, 10, 20, 30] {
            assert!(!f.muxer.append(mic(at)));
        }
        assert_eq!(f.log.last().unwrap().count(TrackKind::MicAudio), 0);
        assert_eq!(
            f.muxer.track_stats(TrackKind::MicAudio).unwrap().dropped_before_start,
            4
        );

        assert!(f.muxer.append(video(40)));
        assert!(f.muxer.append(mic(50)));

        let session = f.log.last().unwrap();
        assert_eq!(session.count(TrackKind::MicAudio), 1);
        assert_eq!(session.times(TrackKind::MicAudio), vec![ms(10)]);
    }

    #[test]
    fn test_samples_before_zero_are_dropped() {
        let f = fixture();
        assert!(f.muxer.append(video(1000)));
        // Audio captured slightly before the first video frame
        assert!(!f.muxer.append(mic(990)));
        assert_eq!(f.muxer.track_stats(TrackKind::MicAudio).unwrap().dropped_late, 1);
    }

    #[test]
    fn test_pause_shifts_later_samples_by_exact_span() {
        let f = fixture();
        assert!(f.muxer.append(video(0)));
        assert!(f.muxer.append(video(33)));

        f.pause.pause(ms(50));
        assert!(!f.muxer.append(video(66)));
        f.pause.resume(ms(550));

        assert!(f.muxer.append(video(566)));
        assert!(f.muxer.append(video(599)));

        let times = f.log.last().unwrap().times(TrackKind::Video);
        assert_eq!(times, vec![ms(0), ms(33), ms(66), ms(99)]);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(f.muxer.track_stats(TrackKind::Video).unwrap().dropped_paused, 1);
    }

    #[test]
    fn test_late_sample_from_paused_span_is_dropped() {
        let f = fixture();
        assert!(f.muxer.append(video(0)));
        assert!(f.muxer.append(video(100)));
        f.pause.pause(ms(120));
        f.pause.resume(ms(620));
        // Captured during the pause but delivered after resume
        assert!(!f.muxer.append(video(130)));
        assert!(f.muxer.append(video(640)));
        assert_eq!(
            f.log.last().unwrap().times(TrackKind::Video),
            vec![ms(0), ms(100), ms(140)]
        );
    }

    #[test]
    fn test_pause_before_first_frame_does_not_shift_timeline() {
        let f = fixture();
        f.pause.pause(ms(0));
        f.pause.resume(ms(300));
        assert!(f.muxer.append(video(400)));
        assert!(f.muxer.append(video(433)));
        assert_eq!(
            f.log.last().unwrap().times(TrackKind::Video),
            vec![ms(0), ms(33)]
        );
    }

    #[test]
    fn test_backpressure_drops_without_failing() {
        let f = fixture();
        assert!(f.muxer.append(video(0)));
        f.log.set_ready(TrackKind::Video, false);
        assert_eq!(
            f.muxer.submit(video(33)),
            AppendOutcome::Dropped(DropReason::NotReady)
        );
        f.log.set_ready(TrackKind::Video, true);
        assert!(f.muxer.append(video(66)));

        assert_eq!(f.muxer.state(), MuxerState::Writing);
        let stats = f.muxer.track_stats(TrackKind::Video).unwrap();
        assert_eq!(stats.appended, 2);
        assert_eq!(stats.dropped_not_ready, 1);
    }

    #[test]
    fn test_full_audio_queue_drops_audio_only() {
        let f = fixture();
        assert!(f.muxer.append(video(0)));
        f.log.set_ready(TrackKind::MicAudio, false);
        assert_eq!(
            f.muxer.submit(mic(10)),
            AppendOutcome::Dropped(DropReason::NotReady)
        );
        // Video keeps flowing while the audio spool catches up
        assert!(f.muxer.append(video(33)));
        f.log.set_ready(TrackKind::MicAudio, true);
        assert!(f.muxer.append(mic(20)));

        let stats = f.muxer.track_stats(TrackKind::MicAudio).unwrap();
        assert_eq!(stats.appended, 1);
        assert_eq!(stats.dropped_not_ready, 1);
    }

    #[test]
    fn test_non_fatal_append_failure_keeps_writing() {
        let f = fixture_with(
            FaultPlan {
                fail_append_at: Some((TrackKind::Video, 2)),
                ..Default::default()
            },
            false,
        );
        assert!(f.muxer.append(video(0)));
        assert!(!f.muxer.append(video(33)));
        assert!(f.muxer.append(video(66)));
        assert_eq!(f.muxer.state(), MuxerState::Writing);
        assert_eq!(f.muxer.track_stats(TrackKind::Video).unwrap().append_failures, 1);
    }

    #[test]
    fn test_failed_state_is_terminal() {
        let f = fixture_with(
            FaultPlan {
                fatal_append_at: Some((TrackKind::Video, 2)),
                ..Default::default()
            },
            false,
        );
        assert!(f.muxer.append(video(0)));
        assert!(!f.muxer.append(video(33)));
        assert_eq!(f.muxer.state(), MuxerState::Failed);
        assert!(f.muxer.failure().is_some());

        assert!(!f.muxer.append(video(66)));
        assert_eq!(f.log.last().unwrap().count(TrackKind::Video), 1);

        assert!(matches!(f.muxer.finalize(), Err(WriterError::Failed(_))));
        assert_eq!(f.muxer.state(), MuxerState::Failed);
        f.muxer.cancel();
        assert_eq!(f.muxer.state(), MuxerState::Failed);
        assert!(!f.path.exists());
    }

    #[test]
    fn test_finalize_reports_duration() {
        let f = fixture_with(FaultPlan::default(), false);
        for i in 0..30 {
            assert!(f.muxer.append(video(5_000 + i * 33)));
        }
        let summary = f.muxer.finalize().unwrap();
        assert_eq!(summary.duration, ms(990));
        assert_eq!(summary.source_zero, ms(5_000));
        assert_eq!(summary.track(TrackKind::Video).unwrap().appended, 30);
        assert_eq!(f.muxer.state(), MuxerState::Completed);
        assert!(f.log.last().unwrap().finished_tracks.contains(&TrackKind::Video));

        // No appends after completion
        assert!(!f.muxer.append(video(10_000)));
        assert!(matches!(
            f.muxer.finalize(),
            Err(WriterError::InvalidState(_))
        ));
    }

    #[test]
    fn test_finalize_without_video_cancels() {
        let f = fixture();
        assert!(!f.muxer.append(mic(0)));
        assert_eq!(f.muxer.finalize().unwrap_err(), WriterError::EmptySession);
        assert_eq!(f.muxer.state(), MuxerState::Cancelled);
        assert!(!f.path.exists());
    }

    #[test]
    fn test_finish_failure_discards_output() {
        let f = fixture_with(
            FaultPlan {
                fail_finish: true,
                ..Default::default()
            },
            false,
        );
        assert!(f.muxer.append(video(0)));
        assert!(f.muxer.finalize().is_err());
        assert_eq!(f.muxer.state(), MuxerState::Failed);
        assert!(!f.path.exists());
    }

    #[test]
    fn test_mark_finished_stops_track() {
        let f = fixture();
        assert!(f.muxer.append(video(0)));
        f.muxer.mark_finished(TrackKind::MicAudio);
        assert!(!f.muxer.append(mic(10)));
        assert!(f.muxer.append(video(33)));
    }

    #[test]
    fn test_tracks_only_added_before_start() {
        let f = fixture_with(FaultPlan::default(), false);
        assert!(f
            .muxer
            .add_track(TrackSpec::Video {
                resolution: Resolution { width: 1, height: 1 },
                frame_rate: 30,
            })
            .is_err());
        assert!(f.muxer.append(video(0)));
        assert!(f
            .muxer
            .add_track(TrackSpec::Audio {
                kind: TrackKind::SystemAudio,
                format: AudioFormat::default(),
            })
            .is_err());
    }

    #[test]
    fn test_live_duration_excludes_pause() {
        let f = fixture_with(FaultPlan::default(), false);
        assert!(f.muxer.append(video(1_000)));
        f.pause.pause(ms(1_500));
        assert_eq!(f.muxer.live_duration(ms(1_800)), ms(500));
        f.pause.resume(ms(2_000));
        assert_eq!(f.muxer.live_duration(ms(2_250)), ms(750));
    }

    #[test]
    fn test_concurrent_appends_stay_ordered_per_track() {
        let f = fixture();
        let muxer = std::sync::Arc::new(f.muxer);
        assert!(muxer.append(video(0)));

        let video_thread = {
            let muxer = muxer.clone();
            std::thread::spawn(move || {
                for i in 1..200 {
                    muxer.append(video(i * 10));
                }
            })
        };
        let mic_thread = {
            let muxer = muxer.clone();
            std::thread::spawn(move || {
                for i in 1..200 {
                    muxer.append(mic(i * 10 + 5));
                }
            })
        };
        video_thread.join().unwrap();
        mic_thread.join().unwrap();

        let session = f.log.last().unwrap();
        for kind in [TrackKind::Video, TrackKind::MicAudio] {
            let times = session.times(kind);
            assert_eq!(times.len(), if kind == TrackKind::Video { 200 } else { 199 });
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
