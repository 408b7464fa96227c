//! Camera-over-screen compositing
//!
//! Scales the camera frame to a square overlay, masks it (circle or rounded
//! rectangle), and draws it into a corner of a *copy* of the screen frame.
//! Any failure yields the screen frame unchanged; compositing never aborts
//! a recording.

use crate::capture::frame_box::{FrameSource, FreshFrameSelector};
use crate::capture::sample::{Sample, SamplePayload, VideoFrame};
use crate::recorder::state::{Anchor, CompositeConfig, MaskShape};
use crate::utils::error::CompositeError;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Output width padding values are expressed against
pub const REFERENCE_WIDTH: u32 = 1920;

/// Composite `secondary` over `primary`, or return `primary` untouched
pub fn composite(
    primary: &VideoFrame,
    secondary: Option<&VideoFrame>,
    config: &CompositeConfig,
) -> VideoFrame {
    let Some(secondary) = secondary else {
        return primary.clone();
    };
    match try_composite(primary, secondary, config) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("Compositing skipped: {}", e);
            primary.clone()
        }
    }
}

pub fn try_composite(
    primary: &VideoFrame,
    secondary: &VideoFrame,
    config: &CompositeConfig,
) -> Result<VideoFrame, CompositeError> {
    if secondary.width() == 0 || secondary.height() == 0 {
        return Err(CompositeError::EmptySecondary);
    }

    let side = overlay_side(primary.width(), config.clamped_size_ratio());
    let padding = scaled_padding(config.padding, primary.width());
    let (x, y) = overlay_origin(config.anchor, primary.width(), primary.height(), side, padding)?;

    let mut overlay = square_crop(&to_image(secondary)?, side);
    if config.mirror {
        imageops::flip_horizontal_in_place(&mut overlay);
    }
    apply_mask(&mut overlay, config.shape);

    // Fresh buffer; the caller's frame may still be referenced elsewhere
    let mut canvas = to_image(primary)?;
    imageops::overlay(&mut canvas, &overlay, x as i64, y as i64);
    from_image(canvas)
}

/// Overlay side length in pixels
pub fn overlay_side(primary_width: u32, size_ratio: f32) -> u32 {
    ((primary_width as f32 * size_ratio).round() as u32).max(1)
}

/// Padding scaled from [`REFERENCE_WIDTH`] to the output width
pub fn scaled_padding(padding: u32, primary_width: u32) -> u32 {
    (padding as f64 * primary_width as f64 / REFERENCE_WIDTH as f64).round() as u32
}

fn overlay_origin(
    anchor: Anchor,
    width: u32,
    height: u32,
    side: u32,
    padding: u32,
) -> Result<(u32, u32), CompositeError> {
    let needed = side + 2 * padding;
    if needed > width || needed > height {
        return Err(CompositeError::DoesNotFit {
            side,
            padding,
            width,
            height,
        });
    }
    let right = width - side - padding;
    let bottom = height - side - padding;
    Ok(match anchor {
        Anchor::TopLeft => (padding, padding),
        Anchor::TopRight => (right, padding),
        Anchor::BottomLeft => (padding, bottom),
        Anchor::BottomRight => (right, bottom),
    })
}

fn to_image(frame: &VideoFrame) -> Result<RgbaImage, CompositeError> {
    RgbaImage::from_raw(frame.width(), frame.height(), frame.packed().into_owned())
        .ok_or(CompositeError::InvalidFrame("short buffer"))
}

fn from_image(image: RgbaImage) -> Result<VideoFrame, CompositeError> {
    let (width, height) = image.dimensions();
    VideoFrame::from_rgba(width, height, image.into_raw())
        .ok_or(CompositeError::InvalidFrame("composited buffer"))
}

/// Scale so the shorter side equals `side`, then center-crop to a square
fn square_crop(source: &RgbaImage, side: u32) -> RgbaImage {
    let (width, height) = source.dimensions();
    let scale = side as f64 / width.min(height) as f64;
    let scaled_w = ((width as f64 * scale).round() as u32).max(side);
    let scaled_h = ((height as f64 * scale).round() as u32).max(side);

    let resized = imageops::resize(source, scaled_w, scaled_h, FilterType::Triangle);
    let x = (scaled_w - side) / 2;
    let y = (scaled_h - side) / 2;
    imageops::crop_imm(&resized, x, y, side, side).to_image()
}

fn apply_mask(image: &mut RgbaImage, shape: MaskShape) {
    let side = image.width() as f32;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let coverage = mask_coverage(shape, x, y, side);
        pixel[3] = (pixel[3] as f32 * coverage).round() as u8;
    }
}

/// Fraction of pixel (x, y) inside the mask, with a one pixel feather
fn mask_coverage(shape: MaskShape, x: u32, y: u32, side: f32) -> f32 {
    let half = side / 2.0;
    let px = x as f32 + 0.5;
    let py = y as f32 + 0.5;

    match shape {
        MaskShape::Circle => {
            let distance = ((px - half).powi(2) + (py - half).powi(2)).sqrt();
            (half - distance + 0.5).clamp(0.0, 1.0)
        }
        MaskShape::RoundedRect { corner_radius } => {
            let radius = corner_radius.clamp(0.0, 0.5) * side;
            if radius <= 0.0 {
                return 1.0;
            }
            // Offset from the nearest corner circle's center
            let qx = (px - half).abs() - (half - radius);
            let qy = (py - half).abs() - (half - radius);
            if qx <= 0.0 || qy <= 0.0 {
                return 1.0;
            }
            let distance = (qx * qx + qy * qy).sqrt();
            (radius - distance + 0.5).clamp(0.0, 1.0)
        }
    }
}

/// Compositing step of the primary pipeline
///
/// Pulls the newest camera frame from a [`FrameSource`], filters it through
/// the staleness window and burns it into each screen frame.
pub struct CompositeStage {
    source: Arc<dyn FrameSource>,
    selector: Mutex<FreshFrameSelector>,
    config: CompositeConfig,
}

impl CompositeStage {
    pub fn new(source: Arc<dyn FrameSource>, config: CompositeConfig, staleness_window: Duration) -> Self {
        Self {
            source,
            selector: Mutex::new(FreshFrameSelector::new(staleness_window)),
            config,
        }
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    /// Composite the freshest camera frame into a screen sample
    ///
    /// Staleness is judged against the screen frame's own capture time.
    pub fn apply(&self, sample: Sample) -> Sample {
        let Some(primary) = sample.video_frame() else {
            return sample;
        };
        let selected = self
            .selector
            .lock()
            .select(self.source.snapshot(), sample.presentation_time);
        let Some(camera) = selected else {
            return sample;
        };

        let frame = composite(primary, Some(&camera.frame), &self.config);
        Sample {
            payload: SamplePayload::Video(frame),
            ..sample
        }
    }
}
