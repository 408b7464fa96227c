//! Host-driven capture source
//!
//! The host application (or a test) pushes samples itself through a
//! [`ManualFeed`]. Samples pushed while the source is not started are
//! refused, and once `stop` returns no pushed sample reaches the pipeline.

use super::sample::Sample;
use super::traits::{CaptureBackend, CaptureRequest, SampleSink, StreamInfo};
use crate::utils::error::CaptureError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Default)]
struct Faults {
    prepare: Option<CaptureError>,
    start: Option<CaptureError>,
}

pub struct ManualSource {
    name: String,
    info: StreamInfo,
    sink: Arc<RwLock<Option<SampleSink>>>,
    faults: Arc<Mutex<Faults>>,
    last_request: Arc<Mutex<Option<CaptureRequest>>>,
}

/// Pushing half of a [`ManualSource`]
#[derive(Clone)]
pub struct ManualFeed {
    sink: Arc<RwLock<Option<SampleSink>>>,
    faults: Arc<Mutex<Faults>>,
    last_request: Arc<Mutex<Option<CaptureRequest>>>,
}

impl ManualSource {
    /// A source that will report `info` from its handshake
    pub fn new(info: StreamInfo) -> (Self, ManualFeed) {
        let sink = Arc::new(RwLock::new(None));
        let faults = Arc::new(Mutex::new(Faults::default()));
        let last_request = Arc::new(Mutex::new(None));
        let source = Self {
            name: "manual".to_string(),
            info,
            sink: sink.clone(),
            faults: faults.clone(),
            last_request: last_request.clone(),
        };
        let feed = ManualFeed {
            sink,
            faults,
            last_request,
        };
        (source, feed)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ManualFeed {
    /// Deliver a sample on the calling thread; false when not started
    pub fn push(&self, sample: Sample) -> bool {
        match self.sink.read().as_ref() {
            Some(sink) => {
                sink.deliver(sample);
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Make the next `prepare` fail
    pub fn fail_prepare(&self, error: CaptureError) {
        self.faults.lock().prepare = Some(error);
    }

    /// Make the next `start` fail
    pub fn fail_start(&self, error: CaptureError) {
        self.faults.lock().start = Some(error);
    }

    /// Request seen by the most recent `prepare`
    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.last_request.lock().clone()
    }
}

impl CaptureBackend for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, request: &CaptureRequest) -> Result<StreamInfo, CaptureError> {
        *self.last_request.lock() = Some(request.clone());
        if let Some(error) = self.faults.lock().prepare.take() {
            return Err(error);
        }
        Ok(self.info)
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), CaptureError> {
        if let Some(error) = self.faults.lock().start.take() {
            return Err(error);
        }
        *self.sink.write() = Some(sink);
        tracing::debug!("Manual source {} started", self.name);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        // Waits for any push in progress
        if self.sink.write().take().is_some() {
            tracing::debug!("Manual source {} stopped", self.name);
        }
        Ok(())
    }
}
