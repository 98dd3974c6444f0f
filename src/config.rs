use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::flow::FlowConfig;
use crate::landmarks::TrackingLevel;
use crate::transform::RigidConfig;

/// Full tracker configuration. Every section falls back to its defaults when
/// missing from the JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Level active when the tracker starts.
    pub level: TrackingLevel,
    pub tracking: TrackingConfig,
    pub correction: CorrectionConfig,
    pub flow: FlowConfig,
    pub rigid: RigidConfig,
}

/// Correspondences needed to determine a similarity transform.
pub const MIN_CORRESPONDENCES: usize = 2;

/// Thresholds of the per-frame tracking update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// A point is directly tracked only if its flow error is strictly below this.
    pub max_track_error: f32,
    /// A point turns `Lost` once its failure counter exceeds this.
    pub max_consecutive_failures: u32,
    /// Absolute floor of the rigid-fallback quorum.
    pub min_quorum: usize,
    /// Fraction of the tracked points that must be directly tracked for the fallback.
    pub quorum_fraction: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_track_error: 20.0,
            max_consecutive_failures: 5,
            min_quorum: 2,
            quorum_fraction: 0.5,
        }
    }
}

impl TrackingConfig {
    /// Directly tracked correspondences needed to attempt the rigid fallback
    /// with `n` tracked points: `max(min_quorum, floor(n * quorum_fraction))`,
    /// never below the two a similarity needs.
    pub fn quorum(&self, n: usize) -> usize {
        let fractional = (n as f32 * self.quorum_fraction).floor() as usize;
        self.min_quorum.max(fractional).max(MIN_CORRESPONDENCES)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Ignore anchor clicks that fall outside the detected face region.
    pub restrict_to_face: bool,
}

impl TrackerConfig {
    /// Load and validate a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        info!(path = %path.display(), level = %config.level, "loaded tracker config");
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        if !(t.quorum_fraction > 0.0 && t.quorum_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "tracking.quorum_fraction must be in (0, 1], got {}",
                t.quorum_fraction
            )));
        }
        if t.min_quorum < MIN_CORRESPONDENCES {
            return Err(Error::InvalidConfig(format!(
                "tracking.min_quorum must be at least {MIN_CORRESPONDENCES}, got {}",
                t.min_quorum
            )));
        }
        if !(t.max_track_error > 0.0) {
            return Err(Error::InvalidConfig(
                "tracking.max_track_error must be positive".into(),
            ));
        }
        let f = &self.flow;
        if f.window_size < 3 || f.window_size % 2 == 0 {
            return Err(Error::InvalidConfig(format!(
                "flow.window_size must be odd and >= 3, got {}",
                f.window_size
            )));
        }
        if f.pyramid_levels == 0 {
            return Err(Error::InvalidConfig("flow.pyramid_levels must be at least 1".into()));
        }
        if !(self.rigid.inlier_threshold > 0.0) {
            return Err(Error::InvalidConfig("rigid.inlier_threshold must be positive".into()));
        }
        Ok(())
    }
}
