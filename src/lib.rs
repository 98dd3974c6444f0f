//! # face-track
//!
//! Facial landmark initialization and robust per-point tracking for live video.
//!
//! This crate provides:
//! - **Initialization**: face detection, 68-point landmark fitting, and an
//!   accept / reject decision with optional manual correction of five anchors
//! - **Tracking**: per-point optical flow with a rigid (similarity) fallback
//!   that carries failed or occluded points along with the rest of the face
//! - **Levels**: low (17), medium (36) or high (68) point subsets of the
//!   iBUG 68-point model
//!
//! ## Frame Loop
//!
//! 1. Call [`FaceTracker::process_frame`] once per frame
//! 2. While initializing, the detector and fitter run until a fit is pending
//! 3. Apply user input between frames with [`FaceTracker::handle`]
//!    ([`Signal::AcceptFit`], [`Signal::RejectFit`] followed by five
//!    [`Signal::AnchorClick`]s, [`Signal::SetLevel`], [`Signal::Reset`])
//! 4. Once finalized every frame advances the tracked points; points the flow
//!    loses for more than a few frames turn [`TrackStatus::Lost`] until the
//!    fallback places them again
//!
//! ## Quick Start
//!
//! ```rust
//! use face_track::{
//!     BoundingBox, FaceDetector, FaceTracker, GrayImage, InitState, Signal, TrackerConfig,
//! };
//!
//! // Any detector works; this one always reports the same region.
//! struct FixedFace;
//!
//! impl FaceDetector for FixedFace {
//!     fn detect(&mut self, _image: &GrayImage) -> face_track::Result<Vec<BoundingBox>> {
//!         Ok(vec![BoundingBox::new(40.0, 40.0, 120.0, 120.0)])
//!     }
//! }
//!
//! let mut tracker = FaceTracker::with_defaults(TrackerConfig::default(), Box::new(FixedFace));
//! let frame = GrayImage::from_fn(200, 200, |x, y| ((x * 7 + y * 3) % 256) as u8);
//!
//! let output = tracker.process_frame(frame.clone()).unwrap();
//! assert_eq!(output.state, InitState::AwaitingDecision);
//!
//! tracker.handle(Signal::AcceptFit).unwrap();
//! let output = tracker.process_frame(frame).unwrap();
//! assert_eq!(output.points.len(), 36);
//! ```

mod config;
mod correction;
mod detector;
mod error;
mod fitter;
mod flow;
mod frame;
mod init;
mod landmarks;
mod session;
mod tracking;
mod transform;
mod types;

pub use config::{CorrectionConfig, TrackerConfig, TrackingConfig};
pub use correction::{Anchor, ClickOutcome, CorrectionSession, ANCHORS};
pub use detector::{DetectorSettings, FaceDetector, RustfaceDetector};
pub use error::{Error, Result};
pub use fitter::{default_68_point_mean_shape, LandmarkFitter, MeanShapeFitter};
pub use flow::{FlowConfig, FlowResult, LucasKanadeTracker, MotionEstimator};
pub use frame::{gradient, sample_bilinear, GrayImage, ImageAccess};
pub use init::{InitState, InitializationController};
pub use landmarks::{
    ActiveIndexSet, CanonicalLandmarks, TrackStatus, TrackedPoint, TrackingLevel, CHIN,
    LEFT_EYE_OUTER, MOUTH_LEFT, MOUTH_RIGHT, NOSE_TIP, NUM_CANONICAL, RIGHT_EYE_OUTER,
};
pub use session::{FaceTracker, FrameOutput, Signal};
pub use tracking::{TrackedLandmarks, TrackingEngine, TrackingReport};
pub use transform::{
    find_similarity_transform, RansacSimilarity, RigidConfig, RigidEstimator,
    SimilarityTransform2D,
};
pub use types::{BoundingBox, Point};
