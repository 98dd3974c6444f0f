//! The tracking session: one owned value driving initialization and tracking
//! frame by frame.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::correction::Anchor;
use crate::detector::FaceDetector;
use crate::error::{Error, Result};
use crate::fitter::{LandmarkFitter, MeanShapeFitter};
use crate::flow::{LucasKanadeTracker, MotionEstimator};
use crate::frame::GrayImage;
use crate::init::{InitState, InitializationController};
use crate::landmarks::{ActiveIndexSet, CanonicalLandmarks, TrackedPoint, TrackingLevel};
use crate::tracking::{TrackedLandmarks, TrackingEngine, TrackingReport};
use crate::transform::{RansacSimilarity, RigidEstimator};
use crate::types::{BoundingBox, Point};

/// User input applied between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    AcceptFit,
    RejectFit,
    AnchorClick(Point),
    SetLevel(TrackingLevel),
    Reset,
}

/// Snapshot of the session after a frame or signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutput {
    pub frame_index: u64,
    pub state: InitState,
    pub level: TrackingLevel,
    /// Live tracked points, empty until finalized.
    pub points: Vec<TrackedPoint>,
    /// Fitted landmarks while a decision or correction is pending.
    pub canonical: Option<CanonicalLandmarks>,
    pub next_anchor: Option<Anchor>,
    pub face: Option<BoundingBox>,
    pub fit_failed: bool,
    /// Present on frames where the tracking engine ran.
    pub report: Option<TrackingReport>,
}

pub struct FaceTracker {
    config: TrackerConfig,
    active: ActiveIndexSet,
    controller: InitializationController,
    tracks: Option<TrackedLandmarks>,
    engine: TrackingEngine,
    detector: Box<dyn FaceDetector>,
    fitter: Box<dyn LandmarkFitter>,
    motion: Box<dyn MotionEstimator>,
    rigid: Box<dyn RigidEstimator>,
    prev_frame: Option<GrayImage>,
    frame_index: u64,
    last_report: Option<TrackingReport>,
}

impl FaceTracker {
    pub fn new(
        config: TrackerConfig,
        detector: Box<dyn FaceDetector>,
        fitter: Box<dyn LandmarkFitter>,
        motion: Box<dyn MotionEstimator>,
        rigid: Box<dyn RigidEstimator>,
    ) -> Self {
        let active = ActiveIndexSet::for_level(config.level);
        let controller = InitializationController::new(config.correction.restrict_to_face);
        let engine = TrackingEngine::new(config.tracking.clone());
        Self {
            config,
            active,
            controller,
            tracks: None,
            engine,
            detector,
            fitter,
            motion,
            rigid,
            prev_frame: None,
            frame_index: 0,
            last_report: None,
        }
    }

    /// Session with the built-in mean-shape fitter, Lucas-Kanade tracker and
    /// RANSAC similarity estimator configured from `config`.
    pub fn with_defaults(config: TrackerConfig, detector: Box<dyn FaceDetector>) -> Self {
        let motion = Box::new(LucasKanadeTracker::new(config.flow.clone()));
        let rigid = Box::new(RansacSimilarity::new(config.rigid.clone()));
        Self::new(config, detector, Box::new(MeanShapeFitter::new()), motion, rigid)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn level(&self) -> TrackingLevel {
        self.active.level()
    }

    pub fn active_indices(&self) -> &ActiveIndexSet {
        &self.active
    }

    pub fn state(&self) -> InitState {
        self.controller.state()
    }

    pub fn tracks(&self) -> Option<&TrackedLandmarks> {
        self.tracks.as_ref()
    }

    /// Frames processed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Run one frame: initialization until finalized, tracking afterwards.
    ///
    /// The frame is always kept as the previous frame for the next call, even
    /// when an error is returned. A cardinality mismatch in the tracking
    /// engine resets the session before the error is returned.
    pub fn process_frame(&mut self, frame: GrayImage) -> Result<FrameOutput> {
        let result = self.run_frame(&frame);
        self.prev_frame = Some(frame);
        self.frame_index += 1;
        result.map(|()| self.output())
    }

    fn run_frame(&mut self, frame: &GrayImage) -> Result<()> {
        self.last_report = None;

        if !self.controller.is_finalized() {
            return self
                .controller
                .step(frame, self.detector.as_mut(), self.fitter.as_ref());
        }

        let (Some(tracks), Some(prev)) = (self.tracks.as_mut(), self.prev_frame.as_ref()) else {
            debug!("finalized without a previous frame, skipping tracking");
            return Ok(());
        };
        match self.engine.update(
            prev,
            frame,
            tracks,
            &self.active,
            self.motion.as_ref(),
            self.rigid.as_ref(),
        ) {
            Ok(report) => {
                debug!(
                    frame = self.frame_index,
                    direct = report.direct,
                    extrapolated = report.extrapolated,
                    lost = report.lost,
                    "tracking update"
                );
                self.last_report = Some(report);
                Ok(())
            }
            Err(e @ Error::CardinalityMismatch { .. }) => {
                warn!(error = %e, "tracking state inconsistent, re-initializing");
                self.reset();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply one user signal.
    pub fn handle(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::AcceptFit => {
                let tracks = self.controller.accept(&self.active)?;
                self.install(tracks);
            }
            Signal::RejectFit => self.controller.reject(),
            Signal::AnchorClick(position) => {
                let tracks = self.controller.click(position, &self.active)?;
                self.install(tracks);
            }
            Signal::SetLevel(level) => self.set_level(level),
            Signal::Reset => self.reset(),
        }
        Ok(())
    }

    fn install(&mut self, tracks: Option<TrackedLandmarks>) {
        if tracks.is_some() {
            self.tracks = tracks;
        }
    }

    /// Switch the landmark subset. Always a full reset, even to the same level.
    pub fn set_level(&mut self, level: TrackingLevel) {
        info!(from = %self.active.level(), to = %level, "tracking level change");
        self.active = ActiveIndexSet::for_level(level);
        self.reset();
    }

    /// Discard all initialization and tracking state. The next frame starts a
    /// new detection.
    pub fn reset(&mut self) {
        if self.tracks.is_some() || self.controller.state() != InitState::Idle {
            info!(state = ?self.controller.state(), "session reset");
        }
        self.controller.reset();
        self.tracks = None;
        self.last_report = None;
    }

    pub fn output(&self) -> FrameOutput {
        FrameOutput {
            frame_index: self.frame_index,
            state: self.controller.state(),
            level: self.active.level(),
            points: self
                .tracks
                .as_ref()
                .map(|t| t.points().to_vec())
                .unwrap_or_default(),
            canonical: self.controller.landmarks().cloned(),
            next_anchor: self.controller.correction().and_then(|c| c.next_anchor()),
            face: self.controller.face(),
            fit_failed: self.controller.fit_failed(),
            report: self.last_report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowResult;
    use crate::landmarks::TrackStatus;
    use crate::transform::SimilarityTransform2D;
    use std::cell::Cell;
    use std::rc::Rc;

    struct ToggleDetector(Rc<Cell<bool>>);

    impl FaceDetector for ToggleDetector {
        fn detect(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>> {
            if self.0.get() {
                Ok(vec![BoundingBox::new(40.0, 40.0, 120.0, 120.0)])
            } else {
                Ok(vec![])
            }
        }
    }

    /// Moves every point by `shift`; points below `found_until` are found.
    struct ShiftFlow {
        shift: Point,
        found_until: Rc<Cell<usize>>,
    }

    impl MotionEstimator for ShiftFlow {
        fn track(&self, _p: &GrayImage, _c: &GrayImage, points: &[Point]) -> Result<FlowResult> {
            let mut out = FlowResult::with_capacity(points.len());
            for (i, p) in points.iter().enumerate() {
                out.push(*p + self.shift, i < self.found_until.get(), 1.0);
            }
            Ok(out)
        }
    }

    struct TruncatingFlow;

    impl MotionEstimator for TruncatingFlow {
        fn track(&self, _p: &GrayImage, _c: &GrayImage, points: &[Point]) -> Result<FlowResult> {
            let mut out = FlowResult::with_capacity(points.len());
            for p in points.iter().skip(1) {
                out.push(*p, true, 0.0);
            }
            Ok(out)
        }
    }

    fn frame() -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| ((x * 3 + y * 5) % 256) as u8)
    }

    struct Harness {
        tracker: FaceTracker,
        face_visible: Rc<Cell<bool>>,
        found_until: Rc<Cell<usize>>,
    }

    fn harness(level: TrackingLevel) -> Harness {
        let face_visible = Rc::new(Cell::new(true));
        let found_until = Rc::new(Cell::new(usize::MAX));
        let config = TrackerConfig {
            level,
            ..TrackerConfig::default()
        };
        let tracker = FaceTracker::new(
            config,
            Box::new(ToggleDetector(face_visible.clone())),
            Box::new(MeanShapeFitter::new()),
            Box::new(ShiftFlow {
                shift: Point::new(2.0, -1.0),
                found_until: found_until.clone(),
            }),
            Box::new(RansacSimilarity::default()),
        );
        Harness {
            tracker,
            face_visible,
            found_until,
        }
    }

    #[test]
    fn accept_starts_tracking_all_points() {
        let mut h = harness(TrackingLevel::Medium);
        let out = h.tracker.process_frame(frame()).unwrap();
        assert_eq!(out.state, InitState::AwaitingDecision);
        assert!(out.canonical.is_some());
        assert!(out.points.is_empty());

        h.tracker.handle(Signal::AcceptFit).unwrap();
        assert_eq!(h.tracker.state(), InitState::Finalized);

        let out = h.tracker.process_frame(frame()).unwrap();
        assert_eq!(out.points.len(), 36);
        assert!(out.points.iter().all(|p| p.status == TrackStatus::Tracked));
        assert!(out.canonical.is_none());
        let report = out.report.unwrap();
        assert_eq!(report.direct, 36);
        assert!(!report.fallback_applied);
    }

    #[test]
    fn partial_tracking_extrapolates_the_rest() {
        let mut h = harness(TrackingLevel::Medium);
        h.tracker.process_frame(frame()).unwrap();
        h.tracker.handle(Signal::AcceptFit).unwrap();
        let initial = h.tracker.tracks().unwrap().initial_positions().to_vec();

        h.found_until.set(20);
        let out = h.tracker.process_frame(frame()).unwrap();
        assert_eq!(out.points.iter().filter(|p| p.status == TrackStatus::Tracked).count(), 20);
        assert_eq!(out.points.iter().filter(|p| p.status == TrackStatus::Extrapolated).count(), 16);

        // All points shifted rigidly, so the fallback reproduces the shift.
        for (p, start) in out.points.iter().zip(&initial) {
            assert!((p.position.x - (start.x + 2.0)).abs() < 1e-2);
            assert!((p.position.y - (start.y - 1.0)).abs() < 1e-2);
        }
    }

    #[test]
    fn level_change_while_tracking_resets() {
        let mut h = harness(TrackingLevel::Medium);
        h.tracker.process_frame(frame()).unwrap();
        h.tracker.handle(Signal::AcceptFit).unwrap();
        h.tracker.process_frame(frame()).unwrap();

        h.tracker.handle(Signal::SetLevel(TrackingLevel::High)).unwrap();
        assert_eq!(h.tracker.state(), InitState::Idle);
        assert!(h.tracker.tracks().is_none());
        assert_eq!(h.tracker.active_indices().len(), 68);

        h.tracker.process_frame(frame()).unwrap();
        h.tracker.handle(Signal::AcceptFit).unwrap();
        let out = h.tracker.process_frame(frame()).unwrap();
        assert_eq!(out.level, TrackingLevel::High);
        assert_eq!(out.points.len(), 68);
    }

    #[test]
    fn face_loss_during_correction_returns_to_idle() {
        let mut h = harness(TrackingLevel::Low);
        h.tracker.process_frame(frame()).unwrap();
        h.tracker.handle(Signal::RejectFit).unwrap();
        h.tracker.handle(Signal::AnchorClick(Point::new(70.0, 80.0))).unwrap();
        assert_eq!(h.tracker.output().next_anchor, Some(Anchor::RightEyeOuter));

        h.face_visible.set(false);
        let out = h.tracker.process_frame(frame()).unwrap();
        assert_eq!(out.state, InitState::Idle);
        assert!(out.canonical.is_none());
        assert!(out.next_anchor.is_none());
        assert!(out.face.is_none());
    }

    #[test]
    fn five_clicks_finalize_with_corrected_anchors() {
        let mut h = harness(TrackingLevel::Low);
        h.tracker.process_frame(frame()).unwrap();
        h.tracker.handle(Signal::RejectFit).unwrap();
        assert_eq!(h.tracker.state(), InitState::Correcting);

        let clicks = [
            Point::new(70.0, 80.0),
            Point::new(130.0, 80.0),
            Point::new(100.0, 110.0),
            Point::new(80.0, 130.0),
            Point::new(120.0, 130.0),
        ];
        for click in clicks {
            h.tracker.handle(Signal::AnchorClick(click)).unwrap();
        }
        assert_eq!(h.tracker.state(), InitState::Finalized);

        let tracks = h.tracker.tracks().unwrap();
        assert_eq!(tracks.len(), 17);
        let at = |canonical: usize| {
            tracks
                .points()
                .iter()
                .find(|p| p.canonical_index == canonical)
                .map(|p| p.position)
        };
        assert_eq!(at(36), Some(clicks[0]));
        assert_eq!(at(45), Some(clicks[1]));
        assert_eq!(at(30), Some(clicks[2]));
        assert_eq!(at(48), Some(clicks[3]));
        assert_eq!(at(54), Some(clicks[4]));
    }

    #[test]
    fn cardinality_mismatch_forces_reinitialization() {
        let config = TrackerConfig::default();
        let mut tracker = FaceTracker::new(
            config,
            Box::new(ToggleDetector(Rc::new(Cell::new(true)))),
            Box::new(MeanShapeFitter::new()),
            Box::new(TruncatingFlow),
            Box::new(RansacSimilarity::default()),
        );
        tracker.process_frame(frame()).unwrap();
        tracker.handle(Signal::AcceptFit).unwrap();

        let err = tracker.process_frame(frame()).unwrap_err();
        assert!(matches!(err, Error::CardinalityMismatch { expected: 36, actual: 35 }));
        assert_eq!(tracker.state(), InitState::Idle);
        assert!(tracker.tracks().is_none());
        assert_eq!(tracker.frame_index(), 2);

        let out = tracker.process_frame(frame()).unwrap();
        assert_eq!(out.state, InitState::AwaitingDecision);
    }

    #[test]
    fn signals_without_pending_decision_change_nothing() {
        let mut h = harness(TrackingLevel::Medium);
        h.tracker.handle(Signal::AcceptFit).unwrap();
        h.tracker.handle(Signal::RejectFit).unwrap();
        h.tracker.handle(Signal::AnchorClick(Point::new(1.0, 1.0))).unwrap();
        assert_eq!(h.tracker.state(), InitState::Idle);
        assert!(h.tracker.tracks().is_none());
    }

    #[test]
    fn output_serializes_to_json() {
        let mut h = harness(TrackingLevel::Low);
        h.tracker.process_frame(frame()).unwrap();
        let json = serde_json::to_value(h.tracker.output()).unwrap();
        assert_eq!(json["state"], "awaiting_decision");
        assert_eq!(json["level"], "low");
        assert_eq!(json["fit_failed"], false);
    }

    #[test]
    fn sustained_failure_marks_points_lost() {
        struct NoFallback;
        impl RigidEstimator for NoFallback {
            fn estimate(&self, _s: &[Point], _t: &[Point]) -> Option<SimilarityTransform2D> {
                None
            }
        }

        let found_until = Rc::new(Cell::new(usize::MAX));
        let mut tracker = FaceTracker::new(
            TrackerConfig {
                level: TrackingLevel::Low,
                ..TrackerConfig::default()
            },
            Box::new(ToggleDetector(Rc::new(Cell::new(true)))),
            Box::new(MeanShapeFitter::new()),
            Box::new(ShiftFlow {
                shift: Point::zero(),
                found_until: found_until.clone(),
            }),
            Box::new(NoFallback),
        );
        tracker.process_frame(frame()).unwrap();
        tracker.handle(Signal::AcceptFit).unwrap();

        found_until.set(16);
        for _ in 0..5 {
            tracker.process_frame(frame()).unwrap();
        }
        assert_eq!(tracker.tracks().unwrap().points()[16].status, TrackStatus::Tracked);
        let out = tracker.process_frame(frame()).unwrap();
        assert_eq!(out.points[16].status, TrackStatus::Lost);
        assert_eq!(out.points[16].failures, 6);
        assert_eq!(out.report.unwrap().lost, 1);
    }
}
