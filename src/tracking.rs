//! Per-frame landmark tracking with rigid-fallback recovery.
//!
//! Each frame every tracked point is first followed individually by the
//! motion estimator. Points that fail are then carried by the similarity
//! transform that maps the initial landmark positions onto the points that
//! did track, provided enough of them did. This lets occluded or low-texture
//! landmarks follow the face's overall motion.

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::TrackingConfig;
use crate::error::{Error, Result};
use crate::flow::MotionEstimator;
use crate::frame::GrayImage;
use crate::landmarks::{ActiveIndexSet, CanonicalLandmarks, TrackStatus, TrackedPoint};
use crate::transform::RigidEstimator;
use crate::types::Point;

/// Live tracking state of a finalized landmark set.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedLandmarks {
    initial: Vec<Point>,
    points: Vec<TrackedPoint>,
}

impl TrackedLandmarks {
    /// Project `source` through `active`. Every point starts `Tracked` with no failures.
    pub fn initialize(source: &CanonicalLandmarks, active: &ActiveIndexSet) -> Result<Self> {
        let initial = active.project(source)?;
        if initial.len() != active.len() {
            return Err(Error::CardinalityMismatch {
                expected: active.len(),
                actual: initial.len(),
            });
        }
        let points = active
            .indices()
            .iter()
            .zip(&initial)
            .map(|(&index, &p)| TrackedPoint::new(index, p))
            .collect();
        Ok(Self { initial, points })
    }

    /// Positions captured when tracking started.
    pub fn initial_positions(&self) -> &[Point] {
        &self.initial
    }

    pub fn points(&self) -> &[TrackedPoint] {
        &self.points
    }

    pub fn positions(&self) -> Vec<Point> {
        self.points.iter().map(|p| p.position).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn count(&self, status: TrackStatus) -> usize {
        self.points.iter().filter(|p| p.status == status).count()
    }
}

/// Summary of one tracking update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrackingReport {
    /// Points followed by the motion estimator this frame.
    pub direct: usize,
    /// Points placed by the fallback transform this frame.
    pub extrapolated: usize,
    /// Points whose status is `Lost` after the update.
    pub lost: usize,
    /// Whether the correspondence count met the quorum.
    pub quorum_met: bool,
    /// Whether a fallback transform was estimated and applied.
    pub fallback_applied: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingEngine {
    config: TrackingConfig,
}

impl TrackingEngine {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Advance `tracks` from `prev` to `curr`.
    ///
    /// Fails with [`Error::CardinalityMismatch`] without touching `tracks` when
    /// the tracked arrays disagree with `active` or the estimator answers for a
    /// different number of points. The caller must re-initialize in that case.
    pub fn update(
        &self,
        prev: &GrayImage,
        curr: &GrayImage,
        tracks: &mut TrackedLandmarks,
        active: &ActiveIndexSet,
        motion: &dyn MotionEstimator,
        rigid: &dyn RigidEstimator,
    ) -> Result<TrackingReport> {
        let n = active.len();
        for actual in [tracks.points.len(), tracks.initial.len()] {
            if actual != n {
                return Err(Error::CardinalityMismatch { expected: n, actual });
            }
        }
        self.advance(prev, curr, tracks, motion, rigid)
    }

    fn advance(
        &self,
        prev: &GrayImage,
        curr: &GrayImage,
        tracks: &mut TrackedLandmarks,
        motion: &dyn MotionEstimator,
        rigid: &dyn RigidEstimator,
    ) -> Result<TrackingReport> {
        let n = tracks.len();
        let flow = motion.track(prev, curr, &tracks.positions())?;
        match flow.consistent_len() {
            Some(len) if len == n => {}
            Some(len) => return Err(Error::CardinalityMismatch { expected: n, actual: len }),
            None => {
                return Err(Error::CardinalityMismatch {
                    expected: n,
                    actual: flow.positions.len().min(flow.found.len()).min(flow.errors.len()),
                })
            }
        }

        let mut report = TrackingReport::default();
        let mut direct = vec![false; n];
        let mut source = Vec::with_capacity(n);
        let mut target = Vec::with_capacity(n);

        for (i, point) in tracks.points.iter_mut().enumerate() {
            let candidate = flow.positions[i];
            if flow.found[i] && flow.errors[i] < self.config.max_track_error {
                point.position = candidate;
                point.status = TrackStatus::Tracked;
                point.failures = 0;
                direct[i] = true;
                source.push(tracks.initial[i]);
                target.push(candidate);
            } else {
                point.failures = point.failures.saturating_add(1);
                if point.failures > self.config.max_consecutive_failures {
                    point.status = TrackStatus::Lost;
                }
                trace!(
                    index = point.canonical_index,
                    failures = point.failures,
                    found = flow.found[i],
                    error = flow.errors[i],
                    "point not directly tracked"
                );
            }
        }
        report.direct = source.len();

        let quorum = self.config.quorum(n);
        report.quorum_met = report.direct >= quorum;
        if report.quorum_met && report.direct < n {
            match rigid.estimate(&source, &target) {
                Some(tform) => {
                    for (i, point) in tracks.points.iter_mut().enumerate() {
                        if direct[i] {
                            continue;
                        }
                        point.position = tform.apply(tracks.initial[i]);
                        point.status = TrackStatus::Extrapolated;
                        point.failures = 0;
                        report.extrapolated += 1;
                    }
                    report.fallback_applied = true;
                    debug!(
                        direct = report.direct,
                        extrapolated = report.extrapolated,
                        scale = tform.scale(),
                        angle = tform.angle(),
                        "rigid fallback applied"
                    );
                }
                None => debug!(direct = report.direct, "rigid fallback estimate failed"),
            }
        } else if !report.quorum_met {
            debug!(direct = report.direct, quorum, "too few tracked points for rigid fallback");
        }

        report.lost = tracks.count(TrackStatus::Lost);
        Ok(report)
    }
}
