//! Sidecar recorders
//!
//! Loggers that run alongside the primary session (cursor, keystrokes,
//! session events) and write their own files. They never feed the muxer;
//! they align to the primary output's zero, the wall-clock time of its first
//! accepted video frame.

use super::state::RecordingEvent;
use crate::utils::error::RecordingResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// What a sidecar gets when the primary session is up
#[derive(Debug)]
pub struct SidecarContext {
    /// Wall-clock zero of the primary output; `None` until its first frame
    pub zero: watch::Receiver<Option<DateTime<Utc>>>,
    pub primary_path: PathBuf,
    pub events: broadcast::Receiver<RecordingEvent>,
}

#[async_trait]
pub trait SidecarRecorder: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&mut self, context: SidecarContext) -> RecordingResult<()>;

    /// Stop and flush, returning the files written
    async fn stop(&mut self, stopped_at: DateTime<Utc>) -> RecordingResult<Vec<PathBuf>>;
}

/// `<primary stem>-<suffix>.json` next to the primary file
pub fn sidecar_path(primary: &Path, suffix: &str) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    primary.with_file_name(format!("{stem}-{suffix}.json"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoggedEvent {
    /// Negative for events before the first frame
    process_time_ms: f64,
    event: RecordingEvent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventLogFile<'a> {
    started_at: DateTime<Utc>,
    stopped_at: DateTime<Utc>,
    events: &'a [LoggedEvent],
}

struct Collector {
    path: PathBuf,
    armed_at: DateTime<Utc>,
    zero: watch::Receiver<Option<DateTime<Utc>>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Vec<(DateTime<Utc>, RecordingEvent)>>,
}

/// Writes the session's lifecycle events with their offset from output zero
///
/// Events are stamped as they arrive and placed on the timeline at stop, when
/// zero is known. A recording that never got a frame falls back to the time
/// the recorder started. Progress ticks are skipped.
#[derive(Default)]
pub struct EventLogRecorder {
    collector: Option<Collector>,
}

impl EventLogRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn offset_ms(at: DateTime<Utc>, zero: DateTime<Utc>) -> f64 {
    (at - zero)
        .num_microseconds()
        .map(|us| us as f64 / 1000.0)
        .unwrap_or_default()
}

async fn collect(
    mut events: broadcast::Receiver<RecordingEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> Vec<(DateTime<Utc>, RecordingEvent)> {
    let mut logged = Vec::new();
    let keep = |event: RecordingEvent, logged: &mut Vec<(DateTime<Utc>, RecordingEvent)>| {
        if !matches!(event, RecordingEvent::Progress(_)) {
            logged.push((Utc::now(), event));
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => keep(event, &mut logged),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event log lagged, {} events lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    // Whatever was sent before the stop request
    while let Ok(event) = events.try_recv() {
        keep(event, &mut logged);
    }
    logged
}

#[async_trait]
impl SidecarRecorder for EventLogRecorder {
    fn name(&self) -> &str {
        "event-log"
    }

    async fn start(&mut self, context: SidecarContext) -> RecordingResult<()> {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(collect(context.events, shutdown_rx));
        self.collector = Some(Collector {
            path: sidecar_path(&context.primary_path, "events"),
            armed_at: Utc::now(),
            zero: context.zero,
            shutdown,
            task,
        });
        Ok(())
    }

    async fn stop(&mut self, stopped_at: DateTime<Utc>) -> RecordingResult<Vec<PathBuf>> {
        let Some(collector) = self.collector.take() else {
            return Ok(Vec::new());
        };
        let _ = collector.shutdown.send(());
        let stamped = match collector.task.await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Event log task failed: {}", e);
                Vec::new()
            }
        };

        let zero = (*collector.zero.borrow()).unwrap_or(collector.armed_at);
        let events: Vec<LoggedEvent> = stamped
            .into_iter()
            .map(|(at, event)| LoggedEvent {
                process_time_ms: offset_ms(at, zero),
                event,
            })
            .collect();
        let file = EventLogFile {
            started_at: zero,
            stopped_at,
            events: &events,
        };
        let body = serde_json::to_vec_pretty(&file)?;
        tokio::fs::write(&collector.path, body).await?;
        tracing::debug!("Wrote {} events to {:?}", events.len(), collector.path);
        Ok(vec![collector.path])
    }
}
