//! Landmark fitting: face region → canonical 68-point landmarks.

use crate::error::Result;
use crate::frame::GrayImage;
use crate::landmarks::{CanonicalLandmarks, NUM_CANONICAL};
use crate::types::{BoundingBox, Point};

/// Fits the canonical landmark model to a detected face.
pub trait LandmarkFitter {
    /// `Ok(None)` means the fit did not converge on this frame and may be retried.
    fn fit(&self, image: &GrayImage, region: &BoundingBox) -> Result<Option<CanonicalLandmarks>>;
}

/// Approximate iBUG 68-point mean face in normalized [0,1] box coordinates.
#[rustfmt::skip]
const MEAN_SHAPE_68: [(f32, f32); NUM_CANONICAL] = [
    // jaw
    (0.10, 0.35), (0.11, 0.45), (0.12, 0.55), (0.14, 0.65), (0.18, 0.73), (0.24, 0.80),
    (0.32, 0.85), (0.41, 0.88), (0.50, 0.89), (0.59, 0.88), (0.68, 0.85), (0.76, 0.80),
    (0.82, 0.73), (0.86, 0.65), (0.88, 0.55), (0.89, 0.45), (0.90, 0.35),
    // brows
    (0.20, 0.26), (0.25, 0.22), (0.32, 0.21), (0.38, 0.23), (0.43, 0.27),
    (0.57, 0.27), (0.62, 0.23), (0.68, 0.21), (0.75, 0.22), (0.80, 0.26),
    // nose
    (0.50, 0.32), (0.50, 0.40), (0.50, 0.48), (0.50, 0.55),
    (0.40, 0.58), (0.45, 0.60), (0.50, 0.62), (0.55, 0.60), (0.60, 0.58),
    // eyes
    (0.24, 0.32), (0.28, 0.29), (0.34, 0.29), (0.38, 0.33), (0.34, 0.35), (0.28, 0.35),
    (0.62, 0.33), (0.66, 0.29), (0.72, 0.29), (0.76, 0.32), (0.72, 0.35), (0.66, 0.35),
    // outer lip
    (0.32, 0.72), (0.38, 0.68), (0.44, 0.66), (0.50, 0.67), (0.56, 0.66), (0.62, 0.68),
    (0.68, 0.72), (0.62, 0.78), (0.56, 0.80), (0.50, 0.81), (0.44, 0.80), (0.38, 0.78),
    // inner lip
    (0.36, 0.72), (0.44, 0.70), (0.50, 0.70), (0.56, 0.70), (0.64, 0.72), (0.56, 0.74),
    (0.50, 0.75), (0.44, 0.74),
];

/// The 68-point mean face in normalized coordinates.
pub fn default_68_point_mean_shape() -> Vec<Point> {
    MEAN_SHAPE_68.iter().map(|&(x, y)| Point::new(x, y)).collect()
}

/// Places the mean face shape inside the detected region.
///
/// This is the initial estimate a cascaded shape regressor starts from; it is
/// good enough to seed tracking and is what the correction workflow refines.
#[derive(Debug, Clone)]
pub struct MeanShapeFitter {
    mean_shape: Vec<Point>,
}

impl MeanShapeFitter {
    pub fn new() -> Self {
        Self {
            mean_shape: default_68_point_mean_shape(),
        }
    }
}

impl Default for MeanShapeFitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkFitter for MeanShapeFitter {
    fn fit(&self, _image: &GrayImage, region: &BoundingBox) -> Result<Option<CanonicalLandmarks>> {
        if region.is_empty() {
            return Ok(None);
        }
        let points = self
            .mean_shape
            .iter()
            .map(|p| region.denormalize_point(*p))
            .collect();
        Ok(Some(CanonicalLandmarks::new(points)))
    }
}
