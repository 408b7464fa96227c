//! Camera strategies
//!
//! How the camera ends up in the recording: burned into the screen frames
//! as they are captured, or recorded to its own file for later alignment.

use super::pause::PauseClock;
use super::state::{CameraMode, CompositeConfig};
use crate::capture::camera::CameraProducer;
use crate::capture::frame_box::FrameSource;
use crate::processing::CompositeStage;
use crate::utils::error::CameraError;
use crate::writer::WriterFactory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where a separately recorded camera track goes
#[derive(Clone)]
pub struct SecondaryTarget {
    pub writers: Arc<dyn WriterFactory>,
    pub path: PathBuf,
    /// Shared with the primary session so both files drop the same spans
    pub pause: PauseClock,
}

pub trait CameraStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stage to install in the primary pipeline, built before it starts
    fn composite_stage(
        &self,
        camera: &Arc<CameraProducer>,
        staleness_window: Duration,
    ) -> Option<CompositeStage>;

    /// Start the camera once the primary session is running
    ///
    /// Returns the path of the camera's own file, if it writes one.
    fn start_camera(
        &self,
        camera: &CameraProducer,
        target: SecondaryTarget,
    ) -> Result<Option<PathBuf>, CameraError>;
}

/// Composite the camera into the screen frames of the primary file
#[derive(Debug, Clone)]
pub struct RealtimeComposite {
    config: CompositeConfig,
}

impl RealtimeComposite {
    pub fn new(config: CompositeConfig) -> Self {
        Self { config }
    }
}

impl CameraStrategy for RealtimeComposite {
    fn name(&self) -> &'static str {
        "realtime-composite"
    }

    fn composite_stage(
        &self,
        camera: &Arc<CameraProducer>,
        staleness_window: Duration,
    ) -> Option<CompositeStage> {
        let source: Arc<dyn FrameSource> = camera.clone();
        Some(CompositeStage::new(source, self.config, staleness_window))
    }

    fn start_camera(
        &self,
        camera: &CameraProducer,
        _target: SecondaryTarget,
    ) -> Result<Option<PathBuf>, CameraError> {
        // Screen frames go out uncomposited until the first camera frame lands
        camera.start_preview()?;
        Ok(None)
    }
}

/// Record the camera into its own container
#[derive(Debug, Clone, Copy, Default)]
pub struct SeparateTrack;

impl CameraStrategy for SeparateTrack {
    fn name(&self) -> &'static str {
        "separate-track"
    }

    fn composite_stage(
        &self,
        _camera: &Arc<CameraProducer>,
        _staleness_window: Duration,
    ) -> Option<CompositeStage> {
        None
    }

    fn start_camera(
        &self,
        camera: &CameraProducer,
        target: SecondaryTarget,
    ) -> Result<Option<PathBuf>, CameraError> {
        let path = target.path.clone();
        camera.start_recording(target.writers, target.path, target.pause)?;
        Ok(Some(path))
    }
}

/// Strategy for a configured camera mode
pub fn strategy_for(mode: &CameraMode) -> Box<dyn CameraStrategy> {
    match mode {
        CameraMode::Composite(config) => Box::new(RealtimeComposite::new(*config)),
        CameraMode::SeparateFile => Box::new(SeparateTrack),
    }
}
