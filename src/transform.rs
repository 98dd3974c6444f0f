//! 2D similarity transforms and robust estimation from point correspondences.

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Uniform scale + rotation + translation:
///
/// ```text
/// x' = a*x - b*y + tx
/// y' = b*x + a*y + ty
/// ```
///
/// where `a = s*cos(theta)` and `b = s*sin(theta)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTransform2D {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform2D {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn from_parts(scale: f32, angle: f32, translation: Point) -> Self {
        Self {
            a: scale * angle.cos(),
            b: scale * angle.sin(),
            tx: translation.x,
            ty: translation.y,
        }
    }

    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn angle(&self) -> f32 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }
}

/// Least-squares similarity transform mapping `from` onto `to`.
///
/// Returns `None` for mismatched or empty input, or when `from` has no spread
/// (all points coincide) so rotation and scale are undetermined.
pub fn find_similarity_transform(from: &[Point], to: &[Point]) -> Option<SimilarityTransform2D> {
    if from.len() != to.len() || from.is_empty() {
        return None;
    }

    let mean_from = Point::centroid(from)?;
    let mean_to = Point::centroid(to)?;

    let mut spread = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for (f, t) in from.iter().zip(to) {
        let fc = *f - mean_from;
        let tc = *t - mean_to;
        spread += fc.norm_squared();
        dot += fc.x * tc.x + fc.y * tc.y;
        cross += fc.x * tc.y - fc.y * tc.x;
    }

    if spread < 1e-9 {
        return None;
    }

    let a = dot / spread;
    let b = cross / spread;
    let tx = mean_to.x - (a * mean_from.x - b * mean_from.y);
    let ty = mean_to.y - (b * mean_from.x + a * mean_from.y);

    let tform = SimilarityTransform2D { a, b, tx, ty };
    if tform.a.is_finite() && tform.b.is_finite() && tform.tx.is_finite() && tform.ty.is_finite() {
        Some(tform)
    } else {
        None
    }
}

/// Estimates a similarity transform that explains the motion from `source` to `target`.
pub trait RigidEstimator {
    /// Both slices must have the same non-zero length. Returns `None` when the
    /// correspondences are too few or too inconsistent to trust.
    fn estimate(&self, source: &[Point], target: &[Point]) -> Option<SimilarityTransform2D>;
}

/// Parameters for [`RansacSimilarity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidConfig {
    /// Maximum reprojection distance (pixels) for a correspondence to count as an inlier.
    pub inlier_threshold: f32,
    /// Upper bound on minimal-sample hypotheses tried per estimate.
    pub max_hypotheses: usize,
}

impl Default for RigidConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 3.0,
            max_hypotheses: 500,
        }
    }
}

/// Deterministic RANSAC-style similarity estimator.
///
/// Every hypothesis comes from a pair of correspondences (the minimal sample
/// for a similarity). Pairs are enumerated in a fixed order, so identical
/// input always yields the identical transform. The best hypothesis is
/// refit by least squares on its inliers.
#[derive(Debug, Clone, Default)]
pub struct RansacSimilarity {
    config: RigidConfig,
}

impl RansacSimilarity {
    pub fn new(config: RigidConfig) -> Self {
        Self { config }
    }

    fn inliers(
        &self,
        tform: &SimilarityTransform2D,
        source: &[Point],
        target: &[Point],
    ) -> Vec<usize> {
        let threshold = self.config.inlier_threshold;
        source
            .iter()
            .zip(target)
            .enumerate()
            .filter(|(_, (s, t))| tform.apply(**s).distance(t) <= threshold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Pair indices to try, spread over the whole set when there are more
    /// pairs than the hypothesis budget.
    fn hypothesis_pairs(&self, n: usize) -> Vec<(usize, usize)> {
        let total = n * (n - 1) / 2;
        let budget = self.config.max_hypotheses.max(1);
        let stride = total.div_ceil(budget).max(1);
        let mut pairs = Vec::with_capacity(total.min(budget));
        let mut k = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                if k % stride == 0 {
                    pairs.push((i, j));
                }
                k += 1;
            }
        }
        pairs
    }
}

impl RigidEstimator for RansacSimilarity {
    fn estimate(&self, source: &[Point], target: &[Point]) -> Option<SimilarityTransform2D> {
        if source.len() != target.len() || source.len() < 2 {
            return None;
        }

        let mut best: Option<(Vec<usize>, f32)> = None;
        for (i, j) in self.hypothesis_pairs(source.len()) {
            let pair_from = [source[i], source[j]];
            let pair_to = [target[i], target[j]];
            let Some(tform) = find_similarity_transform(&pair_from, &pair_to) else {
                continue;
            };
            let inliers = self.inliers(&tform, source, target);
            let residual: f32 = inliers
                .iter()
                .map(|&k| tform.apply(source[k]).distance(&target[k]))
                .sum();
            let better = match &best {
                None => true,
                Some((best_inliers, best_residual)) => {
                    inliers.len() > best_inliers.len()
                        || (inliers.len() == best_inliers.len() && residual < *best_residual)
                }
            };
            if better {
                best = Some((inliers, residual));
            }
        }

        let (inliers, _) = best?;
        if inliers.len() < 2 {
            return None;
        }
        let src: Vec<Point> = inliers.iter().map(|&k| source[k]).collect();
        let dst: Vec<Point> = inliers.iter().map(|&k| target[k]).collect();
        find_similarity_transform(&src, &dst)
    }
}
