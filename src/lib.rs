//! Open ScreenStudio recorder - capture pipeline and muxing core.
//!
//! Screen, system audio, microphone and camera samples are timestamped on
//! one host timeline, filtered, optionally composited, and serialized into
//! a container by a single [`recorder::Muxer`] per output file.

pub mod capture;
pub mod processing;
pub mod recorder;
pub mod utils;
pub mod writer;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use recorder::{
    spawn_failure_watchdog, RecordingArtifact, RecordingConfig, RecordingCoordinator,
    RecordingEvent, SessionController, SessionState,
};
pub use utils::error::{RecordingError, RecordingResult};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling it again is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_screenstudio_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!(
            "Open ScreenStudio recorder v{}",
            env!("CARGO_PKG_VERSION")
        );
    }
}
