//! User correction of the five anchor landmarks before tracking starts.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::landmarks::{
    CanonicalLandmarks, LEFT_EYE_OUTER, MOUTH_LEFT, MOUTH_RIGHT, NOSE_TIP, RIGHT_EYE_OUTER,
};
use crate::types::{BoundingBox, Point};

/// The anchor landmarks, in the order the user is asked to click them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    LeftEyeOuter,
    RightEyeOuter,
    NoseTip,
    MouthLeft,
    MouthRight,
}

pub const ANCHORS: [Anchor; 5] = [
    Anchor::LeftEyeOuter,
    Anchor::RightEyeOuter,
    Anchor::NoseTip,
    Anchor::MouthLeft,
    Anchor::MouthRight,
];

impl Anchor {
    pub fn canonical_index(self) -> usize {
        match self {
            Anchor::LeftEyeOuter => LEFT_EYE_OUTER,
            Anchor::RightEyeOuter => RIGHT_EYE_OUTER,
            Anchor::NoseTip => NOSE_TIP,
            Anchor::MouthLeft => MOUTH_LEFT,
            Anchor::MouthRight => MOUTH_RIGHT,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Anchor::LeftEyeOuter => "left eye outer corner",
            Anchor::RightEyeOuter => "right eye outer corner",
            Anchor::NoseTip => "nose tip",
            Anchor::MouthLeft => "left mouth corner",
            Anchor::MouthRight => "right mouth corner",
        }
    }
}

/// Result of feeding one click to a [`CorrectionSession`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickOutcome {
    /// Nothing consumed, the session is unchanged.
    Ignored,
    /// The anchor was overwritten; more anchors remain.
    Accepted { anchor: Anchor },
    /// The last anchor was overwritten; the landmarks are ready to finalize.
    Complete { anchor: Anchor },
}

/// Progress through the anchor sequence. Clicks always go to the anchor under
/// the cursor, so a sixth click cannot target anything.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionSession {
    cursor: usize,
    clicks: usize,
    face: BoundingBox,
    restrict_to_face: bool,
}

impl CorrectionSession {
    pub fn new(face: BoundingBox, restrict_to_face: bool) -> Self {
        Self {
            cursor: 0,
            clicks: 0,
            face,
            restrict_to_face,
        }
    }

    pub fn next_anchor(&self) -> Option<Anchor> {
        ANCHORS.get(self.cursor).copied()
    }

    pub fn clicks(&self) -> usize {
        self.clicks
    }

    /// `(clicks consumed, clicks needed)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.clicks, ANCHORS.len())
    }

    pub fn is_complete(&self) -> bool {
        self.clicks >= ANCHORS.len()
    }

    pub fn face(&self) -> BoundingBox {
        self.face
    }

    /// Overwrite the current anchor in `landmarks` with `position` and advance.
    pub fn submit_click(
        &mut self,
        landmarks: &mut CanonicalLandmarks,
        position: Point,
    ) -> ClickOutcome {
        let Some(anchor) = self.next_anchor() else {
            return ClickOutcome::Ignored;
        };
        if self.restrict_to_face && !self.face.contains(position) {
            debug!(x = position.x, y = position.y, "click outside face region ignored");
            return ClickOutcome::Ignored;
        }

        if !landmarks.set(anchor.canonical_index(), position) {
            warn!(
                index = anchor.canonical_index(),
                len = landmarks.len(),
                "anchor index missing from fitted landmarks"
            );
        }
        self.cursor += 1;
        self.clicks += 1;
        debug!(anchor = anchor.label(), clicks = self.clicks, "anchor corrected");

        if self.is_complete() {
            ClickOutcome::Complete { anchor }
        } else {
            ClickOutcome::Accepted { anchor }
        }
    }
}
