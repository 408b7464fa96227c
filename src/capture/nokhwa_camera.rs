//! Webcam capture using nokhwa
//!
//! The nokhwa camera handle is opened on the producer's capture thread and
//! never leaves it. Frames are decoded to RGBA for the frame box.

use super::camera::{CameraDevice, CameraDeviceOpener, CameraFormat};
use super::sample::VideoFrame;
use super::traits::{CameraInfo, Resolution};
use crate::recorder::state::CameraConfig;
use crate::utils::error::CameraError;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat as NokhwaFormat, CameraIndex, FrameFormat, RequestedFormat,
    RequestedFormatType, Resolution as NokhwaResolution,
};
use nokhwa::Camera;

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };

                // Common resolutions
                let supported_resolutions = [(1920, 1080), (1280, 720), (640, 480)]
                    .into_iter()
                    .map(|(width, height)| Resolution { width, height })
                    .collect();

                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    supported_resolutions,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Opens a system camera through nokhwa
#[derive(Debug, Clone)]
pub struct NokhwaCamera {
    device_id: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
}

impl NokhwaCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }

    fn camera_index(&self) -> CameraIndex {
        match &self.device_id {
            // Numeric ids are indices, anything else a device path or name
            Some(id) => match id.parse::<u32>() {
                Ok(index) => CameraIndex::Index(index),
                Err(_) => CameraIndex::String(id.clone()),
            },
            None => CameraIndex::Index(0),
        }
    }
}

impl CameraDeviceOpener for NokhwaCamera {
    fn name(&self) -> &str {
        self.device_id.as_deref().unwrap_or("default-camera")
    }

    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let index = self.camera_index();
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
            NokhwaFormat::new(
                NokhwaResolution::new(self.width, self.height),
                FrameFormat::MJPEG,
                self.fps,
            ),
        ));

        let mut camera = Camera::new(index.clone(), requested)
            .map_err(|e| CameraError::NotFound(format!("{:?}: {}", index, e)))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::Open(e.to_string()))?;

        let camera_format = camera.camera_format();
        let format = CameraFormat {
            resolution: Resolution {
                width: camera_format.resolution().width(),
                height: camera_format.resolution().height(),
            },
            fps: camera_format.frame_rate(),
        };
        tracing::info!(
            "Webcam opened: {} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
            format.resolution,
            format.fps,
            camera_format.format(),
            self.width,
            self.height,
            self.fps
        );

        Ok(Box::new(NokhwaDevice { camera, format }))
    }
}

struct NokhwaDevice {
    camera: Camera,
    format: CameraFormat,
}

impl CameraDevice for NokhwaDevice {
    fn format(&self) -> CameraFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        // Blocks until the camera delivers; the device sets the pace
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CameraError::Frame(e.to_string()))?;
        let image = buffer
            .decode_image::<RgbAFormat>()
            .map_err(|e| CameraError::Frame(e.to_string()))?;
        let (width, height) = (image.width(), image.height());
        VideoFrame::from_rgba(width, height, image.into_raw())
            .map(Some)
            .ok_or_else(|| CameraError::Frame("decoded buffer too small".to_string()))
    }

    fn close(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
    }
}
