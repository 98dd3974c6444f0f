//! Initialization: detect → fit → (optional correction) → finalize.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::correction::{ClickOutcome, CorrectionSession};
use crate::detector::FaceDetector;
use crate::error::Result;
use crate::fitter::LandmarkFitter;
use crate::frame::GrayImage;
use crate::landmarks::{ActiveIndexSet, CanonicalLandmarks};
use crate::tracking::TrackedLandmarks;
use crate::types::{BoundingBox, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    /// No face in view.
    Idle,
    /// A face is in view but no fit has succeeded yet.
    Fitting,
    /// Fitted landmarks are waiting for accept or reject.
    AwaitingDecision,
    /// The user is re-placing anchor landmarks.
    Correcting,
    /// Landmarks handed to the tracking engine.
    Finalized,
}

#[derive(Debug, Clone)]
pub struct InitializationController {
    state: InitState,
    face: Option<BoundingBox>,
    landmarks: Option<CanonicalLandmarks>,
    correction: Option<CorrectionSession>,
    fit_failed: bool,
    restrict_clicks_to_face: bool,
}

impl InitializationController {
    pub fn new(restrict_clicks_to_face: bool) -> Self {
        Self {
            state: InitState::Idle,
            face: None,
            landmarks: None,
            correction: None,
            fit_failed: false,
            restrict_clicks_to_face,
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == InitState::Finalized
    }

    /// Face region seen on the last initialization frame.
    pub fn face(&self) -> Option<BoundingBox> {
        self.face
    }

    /// Fitted (and possibly partly corrected) landmarks, before finalization.
    pub fn landmarks(&self) -> Option<&CanonicalLandmarks> {
        self.landmarks.as_ref()
    }

    pub fn correction(&self) -> Option<&CorrectionSession> {
        self.correction.as_ref()
    }

    /// Whether the fit was attempted and failed on the last frame.
    pub fn fit_failed(&self) -> bool {
        self.fit_failed
    }

    /// Drop all in-progress state and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = InitState::Idle;
        self.face = None;
        self.landmarks = None;
        self.correction = None;
        self.fit_failed = false;
    }

    fn transition(&mut self, next: InitState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "initialization state change");
            self.state = next;
        }
    }

    /// One initialization frame. Does nothing once finalized.
    pub fn step(
        &mut self,
        image: &GrayImage,
        detector: &mut dyn FaceDetector,
        fitter: &dyn LandmarkFitter,
    ) -> Result<()> {
        if self.is_finalized() {
            return Ok(());
        }
        self.fit_failed = false;

        let regions = detector.detect(image)?;
        let Some(face) = BoundingBox::largest(&regions) else {
            if matches!(self.state, InitState::AwaitingDecision | InitState::Correcting) {
                warn!(state = ?self.state, "face lost before finalization, discarding landmarks");
            }
            self.reset();
            return Ok(());
        };
        debug!(
            faces = regions.len(),
            x = face.x,
            y = face.y,
            w = face.width,
            h = face.height,
            "face detected"
        );
        self.face = Some(face);

        if self.landmarks.is_some() {
            return Ok(());
        }

        self.transition(InitState::Fitting);
        match fitter.fit(image, &face) {
            Ok(Some(landmarks)) => {
                debug!(points = landmarks.len(), "landmark fit succeeded");
                self.landmarks = Some(landmarks);
                self.transition(InitState::AwaitingDecision);
            }
            Ok(None) => {
                debug!("landmark fit failed, retrying next frame");
                self.fit_failed = true;
            }
            Err(e) => {
                warn!(error = %e, "landmark fitter error, retrying next frame");
                self.fit_failed = true;
            }
        }
        Ok(())
    }

    /// Accept the fitted landmarks as they are. `Ok(None)` when no decision is pending.
    pub fn accept(&mut self, active: &ActiveIndexSet) -> Result<Option<TrackedLandmarks>> {
        if self.state != InitState::AwaitingDecision {
            debug!(state = ?self.state, "accept ignored");
            return Ok(None);
        }
        self.finalize(active).map(Some)
    }

    /// Reject the fitted landmarks and start anchor correction.
    pub fn reject(&mut self) {
        let (InitState::AwaitingDecision, Some(face)) = (self.state, self.face) else {
            debug!(state = ?self.state, "reject ignored");
            return;
        };
        self.correction = Some(CorrectionSession::new(face, self.restrict_clicks_to_face));
        self.transition(InitState::Correcting);
    }

    /// Feed one anchor click. Finalizes on the last anchor.
    pub fn click(
        &mut self,
        position: Point,
        active: &ActiveIndexSet,
    ) -> Result<Option<TrackedLandmarks>> {
        if self.is_finalized() {
            return Ok(None);
        }
        let (Some(session), Some(landmarks)) = (self.correction.as_mut(), self.landmarks.as_mut())
        else {
            debug!("click ignored, no correction in progress");
            return Ok(None);
        };
        match session.submit_click(landmarks, position) {
            ClickOutcome::Complete { .. } => self.finalize(active).map(Some),
            ClickOutcome::Accepted { .. } | ClickOutcome::Ignored => Ok(None),
        }
    }

    /// Consume the landmarks into tracking state. Any mismatch between the
    /// landmarks and `active` resets the controller to `Idle`.
    fn finalize(&mut self, active: &ActiveIndexSet) -> Result<TrackedLandmarks> {
        let source = self
            .landmarks
            .take()
            .unwrap_or_else(|| CanonicalLandmarks::new(Vec::new()));
        match TrackedLandmarks::initialize(&source, active) {
            Ok(tracks) => {
                self.correction = None;
                self.transition(InitState::Finalized);
                info!(points = tracks.len(), level = %active.level(), "landmarks finalized");
                Ok(tracks)
            }
            Err(e) => {
                warn!(error = %e, "finalization failed, resetting");
                self.reset();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::MeanShapeFitter;
    use crate::landmarks::{TrackStatus, TrackingLevel};
    use std::cell::Cell;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>> {
            Ok(self.0.clone())
        }
    }

    struct NeverFits;

    impl LandmarkFitter for NeverFits {
        fn fit(
            &self,
            _image: &GrayImage,
            _region: &BoundingBox,
        ) -> Result<Option<CanonicalLandmarks>> {
            Ok(None)
        }
    }

    fn image() -> GrayImage {
        GrayImage::from_fn(200, 200, |_, _| 100)
    }

    fn face() -> BoundingBox {
        BoundingBox::new(40.0, 40.0, 120.0, 120.0)
    }

    #[test]
    fn no_face_stays_idle() {
        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![]), &MeanShapeFitter::new()).unwrap();
        assert_eq!(ctl.state(), InitState::Idle);
        assert!(ctl.face().is_none());
    }

    #[test]
    fn fit_failure_keeps_fitting() {
        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &NeverFits).unwrap();
        assert_eq!(ctl.state(), InitState::Fitting);
        assert!(ctl.fit_failed());
        assert!(ctl.landmarks().is_none());
    }

    #[test]
    fn failed_fit_is_retried_on_next_frame() {
        struct FitsOnSecondTry(Cell<u32>);
        impl LandmarkFitter for FitsOnSecondTry {
            fn fit(
                &self,
                image: &GrayImage,
                region: &BoundingBox,
            ) -> Result<Option<CanonicalLandmarks>> {
                self.0.set(self.0.get() + 1);
                if self.0.get() < 2 {
                    return Ok(None);
                }
                MeanShapeFitter::new().fit(image, region)
            }
        }

        let fitter = FitsOnSecondTry(Cell::new(0));
        let mut det = FixedDetector(vec![face()]);
        let mut ctl = InitializationController::new(false);

        ctl.step(&image(), &mut det, &fitter).unwrap();
        assert_eq!(ctl.state(), InitState::Fitting);
        assert!(ctl.fit_failed());

        ctl.step(&image(), &mut det, &fitter).unwrap();
        assert_eq!(fitter.0.get(), 2);
        assert_eq!(ctl.state(), InitState::AwaitingDecision);
        assert!(!ctl.fit_failed());
        assert_eq!(ctl.landmarks().map(|lm| lm.len()), Some(68));
    }

    #[test]
    fn face_loss_while_awaiting_decision_resets() {
        let mut ctl = InitializationController::new(false);
        let fitter = MeanShapeFitter::new();
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &fitter).unwrap();
        assert_eq!(ctl.state(), InitState::AwaitingDecision);

        ctl.step(&image(), &mut FixedDetector(vec![]), &fitter).unwrap();
        assert_eq!(ctl.state(), InitState::Idle);
        assert!(ctl.landmarks().is_none());
        assert!(ctl.face().is_none());

        // The pending decision is gone: accepting now does nothing.
        let active = ActiveIndexSet::for_level(TrackingLevel::Medium);
        assert!(ctl.accept(&active).unwrap().is_none());
        assert_eq!(ctl.state(), InitState::Idle);
    }

    #[test]
    fn successful_fit_awaits_decision_and_is_not_repeated() {
        let mut ctl = InitializationController::new(false);
        let mut det = FixedDetector(vec![face()]);
        ctl.step(&image(), &mut det, &MeanShapeFitter::new()).unwrap();
        assert_eq!(ctl.state(), InitState::AwaitingDecision);
        let fitted = ctl.landmarks().cloned().unwrap();

        // A moved face does not trigger a refit while a decision is pending.
        det.0 = vec![BoundingBox::new(0.0, 0.0, 50.0, 50.0)];
        ctl.step(&image(), &mut det, &MeanShapeFitter::new()).unwrap();
        assert_eq!(ctl.landmarks(), Some(&fitted));
        assert_eq!(ctl.state(), InitState::AwaitingDecision);
    }

    #[test]
    fn largest_face_is_fitted() {
        let mut ctl = InitializationController::new(false);
        let small = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        ctl.step(&image(), &mut FixedDetector(vec![small, face()]), &MeanShapeFitter::new())
            .unwrap();
        assert_eq!(ctl.face(), Some(face()));
    }

    #[test]
    fn accept_finalizes() {
        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &MeanShapeFitter::new()).unwrap();
        let active = ActiveIndexSet::for_level(TrackingLevel::High);
        let tracks = ctl.accept(&active).unwrap().unwrap();
        assert_eq!(ctl.state(), InitState::Finalized);
        assert_eq!(tracks.len(), 68);
        assert!(tracks.points().iter().all(|p| p.status == TrackStatus::Tracked));
        assert!(ctl.landmarks().is_none());
    }

    #[test]
    fn signals_outside_decision_are_no_ops() {
        let mut ctl = InitializationController::new(false);
        let active = ActiveIndexSet::for_level(TrackingLevel::Low);
        assert!(ctl.accept(&active).unwrap().is_none());
        ctl.reject();
        assert_eq!(ctl.state(), InitState::Idle);
        assert!(ctl.click(Point::new(1.0, 1.0), &active).unwrap().is_none());

        ctl.step(&image(), &mut FixedDetector(vec![face()]), &NeverFits).unwrap();
        ctl.reject();
        assert_eq!(ctl.state(), InitState::Fitting);
        assert!(ctl.correction().is_none());
    }

    #[test]
    fn correction_finalizes_on_fifth_click() {
        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &MeanShapeFitter::new()).unwrap();
        ctl.reject();
        assert_eq!(ctl.state(), InitState::Correcting);

        let active = ActiveIndexSet::for_level(TrackingLevel::Medium);
        let clicks = [
            Point::new(70.0, 80.0),
            Point::new(130.0, 80.0),
            Point::new(100.0, 110.0),
            Point::new(80.0, 130.0),
            Point::new(120.0, 130.0),
        ];
        for click in &clicks[..4] {
            assert!(ctl.click(*click, &active).unwrap().is_none());
        }
        let tracks = ctl.click(clicks[4], &active).unwrap().unwrap();
        assert_eq!(ctl.state(), InitState::Finalized);

        let position_of = |canonical: usize| {
            tracks
                .points()
                .iter()
                .find(|p| p.canonical_index == canonical)
                .map(|p| p.position)
        };
        assert_eq!(position_of(36), Some(clicks[0]));
        assert_eq!(position_of(45), Some(clicks[1]));
        assert_eq!(position_of(30), Some(clicks[2]));
        assert_eq!(position_of(48), Some(clicks[3]));
        assert_eq!(position_of(54), Some(clicks[4]));

        // Further clicks after finalization are ignored.
        assert!(ctl.click(Point::new(1.0, 1.0), &active).unwrap().is_none());
    }

    #[test]
    fn face_loss_during_correction_resets() {
        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &MeanShapeFitter::new()).unwrap();
        ctl.reject();
        let active = ActiveIndexSet::for_level(TrackingLevel::Low);
        ctl.click(Point::new(70.0, 80.0), &active).unwrap();

        ctl.step(&image(), &mut FixedDetector(vec![]), &MeanShapeFitter::new()).unwrap();
        assert_eq!(ctl.state(), InitState::Idle);
        assert!(ctl.landmarks().is_none());
        assert!(ctl.correction().is_none());
    }

    #[test]
    fn short_fit_never_finalizes() {
        struct ShortFitter;
        impl LandmarkFitter for ShortFitter {
            fn fit(&self, _i: &GrayImage, _r: &BoundingBox) -> Result<Option<CanonicalLandmarks>> {
                Ok(Some(CanonicalLandmarks::new(vec![Point::new(5.0, 5.0); 60])))
            }
        }

        let mut ctl = InitializationController::new(false);
        ctl.step(&image(), &mut FixedDetector(vec![face()]), &ShortFitter).unwrap();
        assert_eq!(ctl.state(), InitState::AwaitingDecision);

        let active = ActiveIndexSet::for_level(TrackingLevel::High);
        let err = ctl.accept(&active).unwrap_err();
        assert!(matches!(err, crate::Error::IndexMismatch { len: 60, .. }));
        assert_eq!(ctl.state(), InitState::Idle);
        assert!(ctl.landmarks().is_none());
        assert!(ctl.face().is_none());
    }
}
