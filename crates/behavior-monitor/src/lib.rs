//! Behavior Monitor
//!
//! Infers the subject's behavior from its box history:
//! - Sleep/wake from sustained stillness and movement
//! - Fall risk from position relative to a bed-derived safe zone
//! - Human-readable sleep summary for status displays

pub mod machine;
pub mod state;
pub mod summary;
pub mod zone;

pub use machine::BehaviorStateMachine;
pub use state::{Behavior, BehaviorEvent, BehaviorState};
pub use summary::{format_sleep_time, BehaviorLabel, SleepSummary};
pub use zone::SafeZone;

use std::time::Duration;
use thiserror::Error;

/// Behavior monitor error types
#[derive(Error, Debug)]
pub enum BehaviorError {
    #[error("Invalid behavior configuration: {0}")]
    Config(String),
}

/// Behavior thresholds. No defaults: values come from the monitor settings.
#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// Centre displacement (pixels) that counts as movement
    pub movement_threshold: f32,
    /// Stillness needed before the subject is considered asleep
    pub sleep_time: Duration,
    /// Fraction of the bed trimmed from each side to form the safe zone
    pub safe_margin_ratio: f32,
    /// Consecutive frames outside the safe zone before a fall-risk event
    pub risk_frames_threshold: u32,
    pub sleep_detection_enabled: bool,
    /// Derive the safe zone from the bed; otherwise fall risk is never raised
    pub use_bed_safe_zone: bool,
}

impl BehaviorConfig {
    pub fn validate(&self) -> Result<(), BehaviorError> {
        if self.movement_threshold.is_nan() || self.movement_threshold <= 0.0 {
            return Err(BehaviorError::Config("movement threshold must be positive".into()));
        }
        if self.sleep_time.is_zero() {
            return Err(BehaviorError::Config("sleep time must be positive".into()));
        }
        if !(0.0..0.5).contains(&self.safe_margin_ratio) {
            return Err(BehaviorError::Config(format!(
                "safe margin ratio {} must be in [0, 0.5)",
                self.safe_margin_ratio
            )));
        }
        if self.risk_frames_threshold == 0 {
            return Err(BehaviorError::Config("risk frame threshold must be at least 1".into()));
        }
        Ok(())
    }
}
