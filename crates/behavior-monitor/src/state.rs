//! Behavior state types

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Inferred behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Behavior {
    Awake,
    Asleep,
    #[default]
    Unknown,
}

/// Transition events raised by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BehaviorEvent {
    Sleep,
    Wake,
    FallRisk,
}

/// State machine record
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorState {
    pub state: Behavior,
    /// Only moves on a transition
    pub state_entered_at: Instant,
    /// Sub-threshold drift (pixels) since the current still period began
    pub movement_accumulator: f32,
    /// Time without movement
    pub still_duration: Duration,
    pub fall_risk: bool,
    /// Consecutive frames with the subject outside the safe zone
    pub risk_frame_count: u32,
}

impl BehaviorState {
    pub fn new(now: Instant) -> Self {
        Self {
            state: Behavior::Unknown,
            state_entered_at: now,
            movement_accumulator: 0.0,
            still_duration: Duration::ZERO,
            fall_risk: false,
            risk_frame_count: 0,
        }
    }
}
