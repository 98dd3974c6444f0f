//! The canonical 68-point landmark model, tracking levels and per-point track state.
//!
//! Indices follow the iBUG 68-point annotation scheme used by dlib-style
//! shape predictors:
//!
//! | Range   | Region         |
//! |---------|----------------|
//! | 0-16    | jaw line       |
//! | 17-26   | eyebrows       |
//! | 27-35   | nose           |
//! | 36-47   | eyes           |
//! | 48-67   | lips           |

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Number of points in the canonical model.
pub const NUM_CANONICAL: usize = 68;

pub const CHIN: usize = 8;
pub const NOSE_TIP: usize = 30;
pub const LEFT_EYE_OUTER: usize = 36;
pub const RIGHT_EYE_OUTER: usize = 45;
pub const MOUTH_LEFT: usize = 48;
pub const MOUTH_RIGHT: usize = 54;

const LOW_INDICES: [usize; 17] = [
    8, // chin
    17, 21, 22, 26, // brow ends
    27, 30, 31, 35, // nose bridge top, tip, wings
    36, 39, 42, 45, // eye corners
    48, 51, 54, 57, // mouth corners and lip centers
];

const MEDIUM_INDICES: [usize; 36] = [
    8, // chin
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, // brows
    27, 28, 29, 30, 31, 32, 33, 34, 35, // nose
    36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, // eyes
    48, 51, 54, 57, // mouth
];

const HIGH_INDICES: [usize; NUM_CANONICAL] = {
    let mut table = [0usize; NUM_CANONICAL];
    let mut i = 0;
    while i < NUM_CANONICAL {
        table[i] = i;
        i += 1;
    }
    table
};

/// Ordered 68 landmark positions in a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLandmarks {
    pub points: Vec<Point>,
}

impl CanonicalLandmarks {
    /// Wraps a fitter's output. The length is not checked here; finalization
    /// rejects sources that are too short for the active index set.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    /// Overwrite one landmark. Returns false if `index` is out of range.
    pub fn set(&mut self, index: usize, p: Point) -> bool {
        match self.points.get_mut(index) {
            Some(slot) => {
                *slot = p;
                true
            }
            None => false,
        }
    }
}

impl std::ops::Index<usize> for CanonicalLandmarks {
    type Output = Point;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.points[idx]
    }
}

/// Coarseness of the tracked subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl TrackingLevel {
    pub const ALL: [TrackingLevel; 3] =
        [TrackingLevel::Low, TrackingLevel::Medium, TrackingLevel::High];

    /// Canonical indices tracked at this level, in tracking order.
    pub fn indices(self) -> &'static [usize] {
        match self {
            TrackingLevel::Low => &LOW_INDICES,
            TrackingLevel::Medium => &MEDIUM_INDICES,
            TrackingLevel::High => &HIGH_INDICES,
        }
    }

    pub fn point_count(self) -> usize {
        self.indices().len()
    }
}

impl std::fmt::Display for TrackingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackingLevel::Low => "low",
            TrackingLevel::Medium => "medium",
            TrackingLevel::High => "high",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TrackingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TrackingLevel::Low),
            "medium" => Ok(TrackingLevel::Medium),
            "high" => Ok(TrackingLevel::High),
            other => Err(format!(
                "unknown tracking level '{other}' (expected low, medium or high)"
            )),
        }
    }
}

/// The ordered canonical indices currently tracked. Its length is the tracked
/// point count N for every per-point array in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveIndexSet {
    level: TrackingLevel,
    indices: &'static [usize],
}

impl ActiveIndexSet {
    pub fn for_level(level: TrackingLevel) -> Self {
        Self {
            level,
            indices: level.indices(),
        }
    }

    pub fn level(&self) -> TrackingLevel {
        self.level
    }

    pub fn indices(&self) -> &[usize] {
        self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Pick the active landmarks out of `source`, in index-set order.
    pub fn project(&self, source: &CanonicalLandmarks) -> crate::Result<Vec<Point>> {
        self.indices
            .iter()
            .map(|&index| {
                source.get(index).ok_or(crate::Error::IndexMismatch {
                    index,
                    len: source.len(),
                })
            })
            .collect()
    }
}

/// How a tracked point got its position this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Found by the motion estimator with acceptable error.
    Tracked,
    /// Placed by the rigid fallback transform.
    Extrapolated,
    /// Failed for more consecutive frames than allowed.
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPoint {
    /// Index into the canonical 68-point model.
    pub canonical_index: usize,
    pub position: Point,
    pub status: TrackStatus,
    pub failures: u32,
}

impl TrackedPoint {
    pub fn new(canonical_index: usize, position: Point) -> Self {
        Self {
            canonical_index,
            position,
            status: TrackStatus::Tracked,
            failures: 0,
        }
    }
}
