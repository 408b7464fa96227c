//! Capture sources
//!
//! Screen, audio and camera producers, the samples they deliver, and the
//! single-slot frame exchange bridging the camera into the screen pipeline.

pub mod camera;
pub mod frame_box;
pub mod manual;
pub mod permissions;
pub mod sample;
pub mod synthetic;
pub mod traits;

#[cfg(feature = "native-audio")]
pub mod microphone;

#[cfg(feature = "native-camera")]
pub mod nokhwa_camera;

pub use camera::{
    CameraDevice, CameraDeviceOpener, CameraFormat, CameraOutput, CameraProducer, CameraTake,
    ManualCamera, ManualCameraFeed, SyntheticCamera,
};
pub use frame_box::{FrameBox, FrameSource, FreshFrameSelector, TimedFrame};
pub use manual::{ManualFeed, ManualSource};
pub use permissions::{
    has_screen_recording_permission, request_screen_recording_permission, PermissionCheck,
    PlatformPermissions, StaticPermission,
};
pub use sample::{
    AudioBuffer, AudioFormat, FrameStatus, Sample, SampleKind, SamplePayload, TrackKind,
    VideoFrame,
};
pub use synthetic::{SyntheticAudio, SyntheticScreen};
pub use traits::{
    CameraInfo, CaptureBackend, CaptureRequest, CaptureTarget, Resolution,
    SampleConsumer, SampleSink, SourceSet, StreamInfo, VideoStreamInfo, WindowBounds,
};
