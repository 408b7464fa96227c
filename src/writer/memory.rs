//! In-memory writer
//!
//! Records every append in a shared [`MemoryLog`] instead of encoding, and
//! writes a small JSON manifest when finished. Used for dry runs and tests;
//! a [`FaultPlan`] can make it misbehave on purpose.

use super::{ContainerWriter, TrackId, TrackSpec, WriterFactory, WriterStatus};
use crate::capture::sample::{SamplePayload, TrackKind};
use crate::utils::error::WriterError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One accepted append
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRecord {
    pub track: TrackKind,
    pub time: Duration,
    /// 1 for video, sample frames for audio
    pub units: usize,
}

/// Everything one writer instance saw
#[derive(Debug, Clone, Default)]
pub struct WriterSessionLog {
    pub path: PathBuf,
    pub tracks: Vec<TrackSpec>,
    pub source_zero: Option<Duration>,
    pub appends: Vec<AppendRecord>,
    pub finished_tracks: Vec<TrackKind>,
    pub finished: bool,
    pub cancelled: bool,
}

impl WriterSessionLog {
    pub fn count(&self, track: TrackKind) -> usize {
        self.appends.iter().filter(|a| a.track == track).count()
    }

    pub fn times(&self, track: TrackKind) -> Vec<Duration> {
        self.appends
            .iter()
            .filter(|a| a.track == track)
            .map(|a| a.time)
            .collect()
    }
}

#[derive(Debug, Default)]
struct LogInner {
    sessions: Vec<WriterSessionLog>,
    not_ready: Vec<TrackKind>,
}

/// Shared view over every writer a factory created
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<WriterSessionLog> {
        self.inner.lock().sessions.clone()
    }

    pub fn session_for(&self, path: &Path) -> Option<WriterSessionLog> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.path == path)
            .cloned()
    }

    pub fn last(&self) -> Option<WriterSessionLog> {
        self.inner.lock().sessions.last().cloned()
    }

    /// Make `track` report "not ready for more data" (or ready again)
    pub fn set_ready(&self, track: TrackKind, ready: bool) {
        let mut inner = self.inner.lock();
        inner.not_ready.retain(|t| *t != track);
        if !ready {
            inner.not_ready.push(track);
        }
    }

    fn is_ready(&self, track: TrackKind) -> bool {
        !self.inner.lock().not_ready.contains(&track)
    }

    fn open(&self, path: &Path) -> usize {
        let mut inner = self.inner.lock();
        inner.sessions.push(WriterSessionLog {
            path: path.to_path_buf(),
            ..Default::default()
        });
        inner.sessions.len() - 1
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut WriterSessionLog)) {
        if let Some(session) = self.inner.lock().sessions.get_mut(index) {
            f(session);
        }
    }
}

/// Faults to inject, counted per track from 1
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Reject this append without entering the failed state
    pub fail_append_at: Option<(TrackKind, u64)>,
    /// Enter the failed state on this append
    pub fatal_append_at: Option<(TrackKind, u64)>,
    pub fail_finish: bool,
    pub fail_setup: bool,
}

pub struct MemoryWriter {
    path: PathBuf,
    log: MemoryLog,
    index: usize,
    tracks: Vec<TrackSpec>,
    attempts: HashMap<TrackKind, u64>,
    faults: FaultPlan,
    status: WriterStatus,
}

impl MemoryWriter {
    pub fn new(path: &Path, log: MemoryLog, faults: FaultPlan) -> Result<Self, WriterError> {
        if faults.fail_setup {
            return Err(WriterError::Setup("injected setup failure".to_string()));
        }
        // Open the container up front, the way a platform writer would
        std::fs::File::create(path)?;
        let index = log.open(path);

        Ok(Self {
            path: path.to_path_buf(),
            log,
            index,
            tracks: Vec::new(),
            attempts: HashMap::new(),
            faults,
            status: WriterStatus::Writing,
        })
    }

    fn spec(&self, track: TrackId) -> Result<&TrackSpec, WriterError> {
        self.tracks.get(track).ok_or(WriterError::UnknownTrack(track))
    }

    fn write_manifest(&self) -> Result<(), WriterError> {
        let session = self
            .log
            .sessions()
            .into_iter()
            .nth(self.index)
            .unwrap_or_default();
        let tracks: Vec<_> = self
            .tracks
            .iter()
            .map(|spec| {
                let kind = spec.kind();
                serde_json::json!({
                    "kind": kind,
                    "samples": session.count(kind),
                    "lastTimeMs": session
                        .times(kind)
                        .last()
                        .map(|t| t.as_secs_f64() * 1000.0),
                })
            })
            .collect();
        let manifest = serde_json::json!({ "tracks": tracks });
        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| WriterError::Io(e.to_string()))?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

impl ContainerWriter for MemoryWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_track(&mut self, spec: TrackSpec) -> Result<TrackId, WriterError> {
        self.tracks.push(spec);
        self.log.update(self.index, |s| s.tracks.push(spec));
        Ok(self.tracks.len() - 1)
    }

    fn start_session(&mut self, source_zero: Duration) -> Result<(), WriterError> {
        self.log
            .update(self.index, |s| s.source_zero = Some(source_zero));
        Ok(())
    }

    fn is_ready_for_more_data(&self, track: TrackId) -> bool {
        match self.tracks.get(track) {
            Some(spec) => self.log.is_ready(spec.kind()),
            None => false,
        }
    }

    fn append(
        &mut self,
        track: TrackId,
        time: Duration,
        payload: SamplePayload,
    ) -> Result<(), WriterError> {
        if let WriterStatus::Failed(reason) = &self.status {
            return Err(WriterError::Failed(reason.clone()));
        }
        let kind = self.spec(track)?.kind();

        let attempt = self.attempts.entry(kind).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        if self.faults.fatal_append_at == Some((kind, attempt)) {
            let reason = format!("injected fatal failure on {kind} append #{attempt}");
            self.status = WriterStatus::Failed(reason.clone());
            return Err(WriterError::Injected(reason));
        }
        if self.faults.fail_append_at == Some((kind, attempt)) {
            return Err(WriterError::Injected(format!(
                "injected failure on {kind} append #{attempt}"
            )));
        }

        let units = match &payload {
            SamplePayload::Video(_) => 1,
            SamplePayload::Audio(buffer) => buffer.frames(),
        };
        self.log.update(self.index, |s| {
            s.appends.push(AppendRecord {
                track: kind,
                time,
                units,
            })
        });
        Ok(())
    }

    fn mark_finished(&mut self, track: TrackId) {
        if let Some(spec) = self.tracks.get(track) {
            let kind = spec.kind();
            self.log.update(self.index, |s| s.finished_tracks.push(kind));
        }
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        if let WriterStatus::Failed(reason) = &self.status {
            return Err(WriterError::Failed(reason.clone()));
        }
        if self.faults.fail_finish {
            self.status = WriterStatus::Failed("injected finish failure".to_string());
            return Err(WriterError::Injected("finish".to_string()));
        }
        self.write_manifest()?;
        self.status = WriterStatus::Completed;
        self.log.update(self.index, |s| s.finished = true);
        Ok(())
    }

    fn cancel(&mut self) {
        if self.status == WriterStatus::Completed {
            return;
        }
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
        if !self.status.is_failed() {
            self.status = WriterStatus::Cancelled;
        }
        self.log.update(self.index, |s| s.cancelled = true);
    }

    fn status(&self) -> WriterStatus {
        self.status.clone()
    }
}

/// Factory handing out [`MemoryWriter`]s that share one log
#[derive(Debug, Clone, Default)]
pub struct MemoryWriterFactory {
    log: MemoryLog,
    faults: FaultPlan,
}

impl MemoryWriterFactory {
    pub fn new(log: MemoryLog) -> Self {
        Self {
            log,
            faults: FaultPlan::default(),
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn log(&self) -> &MemoryLog {
        &self.log
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError> {
        Ok(Box::new(MemoryWriter::new(
            path,
            self.log.clone(),
            self.faults.clone(),
        )?))
    }
}
