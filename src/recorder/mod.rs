//! Recording system module
//!
//! - `Muxer`: the single serialization point in front of a container writer
//! - `SessionController`: platform capture session plus primary muxer
//! - `RecordingCoordinator`: primary session, camera and sidecars as one unit

pub mod coordinator;
pub mod muxer;
pub mod pause;
pub mod session;
pub mod sidecar;
pub mod state;
pub mod strategy;

pub use coordinator::{spawn_failure_watchdog, RecordingCoordinator};
pub use muxer::{AppendOutcome, DropReason, Muxer, MuxerState, MuxerSummary, TrackHandle, TrackStats};
pub use pause::{PauseAccounting, PauseClock};
pub use session::{KindStats, SessionController, SessionOutput, SessionStats, PROGRESS_INTERVAL};
pub use sidecar::{EventLogRecorder, SidecarContext, SidecarRecorder};
pub use state::{
    Anchor, CameraConfig, CameraMode, CompositeConfig, MaskShape, RecordingArtifact,
    RecordingConfig, RecordingEvent, SessionState,
};
pub use strategy::{CameraStrategy, RealtimeComposite, SecondaryTarget, SeparateTrack};
