//! Sparse pyramidal Lucas-Kanade motion estimation.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::frame::{gradient, sample_bilinear, GrayImage, ImageAccess};
use crate::types::Point;

/// Per-point output of a motion estimator, same order and length as the query points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowResult {
    pub positions: Vec<Point>,
    pub found: Vec<bool>,
    pub errors: Vec<f32>,
}

impl FlowResult {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n),
            found: Vec::with_capacity(n),
            errors: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, position: Point, found: bool, error: f32) {
        self.positions.push(position);
        self.found.push(found);
        self.errors.push(error);
    }

    /// Common length of the three arrays, `None` if they disagree.
    pub fn consistent_len(&self) -> Option<usize> {
        let n = self.positions.len();
        (self.found.len() == n && self.errors.len() == n).then_some(n)
    }
}

/// Finds where points of `prev` moved to in `curr`.
pub trait MotionEstimator {
    fn track(&self, prev: &GrayImage, curr: &GrayImage, points: &[Point]) -> Result<FlowResult>;
}

/// Parameters for [`LucasKanadeTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Side of the square integration window, odd.
    pub window_size: u32,
    /// Number of pyramid levels including full resolution.
    pub pyramid_levels: u32,
    pub max_iterations: u32,
    /// Convergence threshold on the per-iteration update, in pixels.
    pub epsilon: f32,
    /// Minimum eigenvalue of the normalized gradient matrix for a trackable window.
    pub min_eigen_threshold: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: 21,
            pyramid_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigen_threshold: 1e-4,
        }
    }
}

/// Image pyramid, level 0 is full resolution.
struct Pyramid {
    levels: Vec<GrayImage>,
}

impl Pyramid {
    fn build(image: &GrayImage, max_levels: u32, min_side: u32) -> Self {
        let mut levels = vec![image.clone()];
        while (levels.len() as u32) < max_levels {
            let last = &levels[levels.len() - 1];
            if last.width() / 2 < min_side || last.height() / 2 < min_side {
                break;
            }
            let next = last.downsample();
            levels.push(next);
        }
        Self { levels }
    }
}

/// CPU pyramidal Lucas-Kanade tracker.
///
/// A point is reported as not found when its window has too little texture
/// (gradient matrix close to singular) at full resolution, or when it leaves
/// the image. The error is the mean absolute intensity residual over the
/// window at full resolution.
#[derive(Debug, Clone, Default)]
pub struct LucasKanadeTracker {
    config: FlowConfig,
}

impl LucasKanadeTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn half_window(&self) -> i32 {
        (self.config.window_size / 2) as i32
    }

    /// Refine displacement `d` of `p` within one pyramid level. Returns `None`
    /// if the window is untrackable.
    fn refine(&self, prev: &GrayImage, curr: &GrayImage, p: Point, mut d: Point) -> Option<Point> {
        let hw = self.half_window();
        let area = ((2 * hw + 1) * (2 * hw + 1)) as f32;

        let mut grads = Vec::with_capacity(area as usize);
        let (mut g11, mut g12, mut g22) = (0.0f32, 0.0f32, 0.0f32);
        for wy in -hw..=hw {
            for wx in -hw..=hw {
                let x = p.x + wx as f32;
                let y = p.y + wy as f32;
                let (ix, iy) = gradient(prev, x, y);
                g11 += ix * ix;
                g12 += ix * iy;
                g22 += iy * iy;
                grads.push((ix, iy, sample_bilinear(prev, x, y)));
            }
        }

        // Smallest eigenvalue of the structure tensor, intensities scaled to [0,1].
        let norm = area * 255.0 * 255.0;
        let min_eig = (g11 + g22 - ((g11 - g22).powi(2) + 4.0 * g12 * g12).sqrt()) / (2.0 * norm);
        let det = g11 * g22 - g12 * g12;
        if min_eig < self.config.min_eigen_threshold || det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        for _ in 0..self.config.max_iterations {
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut k = 0;
            for wy in -hw..=hw {
                for wx in -hw..=hw {
                    let (ix, iy, prev_val) = grads[k];
                    k += 1;
                    let (cx, cy) = (p.x + d.x + wx as f32, p.y + d.y + wy as f32);
                    let it = sample_bilinear(curr, cx, cy) - prev_val;
                    bx += ix * it;
                    by += iy * it;
                }
            }
            let step = Point::new(inv_det * (g22 * bx - g12 * by), inv_det * (g11 * by - g12 * bx));
            d = d - step;
            if !d.is_finite() {
                return None;
            }
            if step.norm_squared() < self.config.epsilon * self.config.epsilon {
                break;
            }
        }
        Some(d)
    }

    fn residual(&self, prev: &GrayImage, curr: &GrayImage, from: Point, to: Point) -> f32 {
        let hw = self.half_window();
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for wy in -hw..=hw {
            for wx in -hw..=hw {
                let a = sample_bilinear(prev, from.x + wx as f32, from.y + wy as f32);
                let b = sample_bilinear(curr, to.x + wx as f32, to.y + wy as f32);
                sum += (a - b).abs();
                count += 1;
            }
        }
        sum / count as f32
    }

    fn track_point(&self, prev: &Pyramid, curr: &Pyramid, position: Point) -> (Point, bool, f32) {
        let num_levels = prev.levels.len().min(curr.levels.len());
        let mut d = Point::zero();

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let p = position * scale;
            match self.refine(&prev.levels[level], &curr.levels[level], p, d) {
                Some(refined) => d = refined,
                None if level == 0 => return (position, false, f32::INFINITY),
                None => {}
            }
            if level > 0 {
                d = d * 2.0;
            }
        }

        let next = position + d;
        let base_prev = &prev.levels[0];
        let base_curr = &curr.levels[0];
        if !base_curr.contains(next, 0.0) {
            return (next, false, f32::INFINITY);
        }
        let error = self.residual(base_prev, base_curr, position, next);
        (next, true, error)
    }
}

impl MotionEstimator for LucasKanadeTracker {
    fn track(&self, prev: &GrayImage, curr: &GrayImage, points: &[Point]) -> Result<FlowResult> {
        if prev.width() != curr.width() || prev.height() != curr.height() {
            return Err(Error::FrameSizeMismatch {
                prev: (prev.width(), prev.height()),
                curr: (curr.width(), curr.height()),
            });
        }

        let min_side = self.config.window_size.max(3);
        let prev_pyr = Pyramid::build(prev, self.config.pyramid_levels, min_side);
        let curr_pyr = Pyramid::build(curr, self.config.pyramid_levels, min_side);

        let mut result = FlowResult::with_capacity(points.len());
        for &p in points {
            let (next, found, error) = self.track_point(&prev_pyr, &curr_pyr, p);
            trace!(x = p.x, y = p.y, nx = next.x, ny = next.y, found, error, "flow");
            result.push(next, found, error);
        }
        Ok(result)
    }
}
