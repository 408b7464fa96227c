//! Shared utilities: errors, the host clock and output naming.

pub mod clock;
pub mod error;
pub mod paths;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    CameraError, CaptureError, CompositeError, ErrorResponse, RecordingError, RecordingResult,
    WriterError,
};
pub use paths::{OutputNaming, SessionPaths, TimestampedNaming};
