//! Subject Tracking Library
//!
//! Sits between the external detector/tracker and the behavior state
//! machine:
//! - Tracked-entity model and box geometry
//! - Detector adapter boundary with confidence filtering
//! - Bed locator with a confirmed, periodically refreshed cache
//! - Subject selection (manual override, automatic strategies, grace frames)

pub mod bed;
pub mod detector;
pub mod entity;
pub mod selector;

pub use bed::{BedLocator, BedLocatorConfig, BedStatus};
pub use detector::{ConfidenceFilter, Detector, NoopDetector};
pub use entity::{BoundingBox, ClassLabel, Point, TrackedEntity};
pub use selector::{
    LargestConfidence, ManualOnly, ManualPick, SelectionEvent, SelectionMode, SelectionStrategy,
    SmallestArea, SubjectSelector, SubjectState,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tracking error types
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Invalid tracking configuration: {0}")]
    Config(String),
}

/// Automatic selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Smallest person is taken to be the child
    #[default]
    SmallestArea,
    LargestConfidence,
    /// Never bind automatically
    ManualOnly,
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn SelectionStrategy> {
        match self {
            StrategyKind::SmallestArea => Box::new(SmallestArea),
            StrategyKind::LargestConfidence => Box::new(LargestConfidence),
            StrategyKind::ManualOnly => Box::new(ManualOnly),
        }
    }
}

/// Subject selector configuration
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Minimum confidence for automatic candidates
    pub confidence_threshold: f32,
    /// Frames a bound subject may be absent before it is released. A
    /// manual binding then falls back to AUTO; an automatic one is re-chosen.
    pub manual_grace_frames: u32,
    pub strategy: StrategyKind,
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(TrackingError::Config(format!(
                "confidence threshold {} outside 0.0-1.0",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_threshold() {
        let config = SelectorConfig {
            confidence_threshold: 1.5,
            manual_grace_frames: 30,
            strategy: StrategyKind::SmallestArea,
        };
        assert!(matches!(config.validate(), Err(TrackingError::Config(_))));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(StrategyKind::SmallestArea.build().name(), "smallest_area");
        assert_eq!(StrategyKind::ManualOnly.build().name(), "manual_only");
    }
}
