//! Face detection boundary and a SeetaFace (`rustface`) backed detector.

use std::path::Path;

use rustface::ImageData;
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::{GrayImage, ImageAccess};
use crate::types::BoundingBox;

/// Finds face regions in a grayscale frame.
pub trait FaceDetector {
    /// Zero or more face regions, in detector order.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>>;
}

/// Tunables for [`RustfaceDetector`].
#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

pub struct RustfaceDetector {
    inner: Box<dyn rustface::Detector>,
}

impl RustfaceDetector {
    /// Load a SeetaFace model (e.g. `seeta_fd_frontal_v1.0.bin`).
    pub fn load<P: AsRef<Path>>(model_path: P, settings: DetectorSettings) -> Result<Self> {
        let path = model_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Detector(format!("invalid model path {path:?}")))?;
        let mut inner = rustface::create_detector(path_str)
            .map_err(|e| Error::Detector(format!("failed to load {path_str}: {e}")))?;
        inner.set_min_face_size(settings.min_face_size);
        inner.set_score_thresh(settings.score_thresh);
        inner.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        inner.set_slide_window_step(settings.slide_window_step.0, settings.slide_window_step.1);
        debug!(model = path_str, "loaded face detector");
        Ok(Self { inner })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>> {
        let data = ImageData::new(image.as_raw(), image.width(), image.height());
        let faces = self.inner.detect(&data);
        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox::new(
                    bbox.x() as f32,
                    bbox.y() as f32,
                    bbox.width() as f32,
                    bbox.height() as f32,
                )
            })
            .collect())
    }
}
