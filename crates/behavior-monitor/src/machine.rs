//! Behavior state machine
//!
//! Fed once per processed frame with the subject's box (or its absence).
//! Sleep/wake and fall risk are evaluated independently; sleep/wake can be
//! switched off at runtime while fall risk keeps running.

use crate::state::{Behavior, BehaviorEvent, BehaviorState};
use crate::summary::{BehaviorLabel, SleepSummary};
use crate::zone::SafeZone;
use crate::{BehaviorConfig, BehaviorError};
use std::time::{Duration, Instant};
use subject_tracking::{BoundingBox, Point};
use tracing::{debug, info, warn};

pub struct BehaviorStateMachine {
    config: BehaviorConfig,
    state: BehaviorState,
    sleep_enabled: bool,
    /// Behavior to resume when the subject reappears
    last_known: Option<Behavior>,
    last_center: Option<Point>,
    last_observed_at: Option<Instant>,
    /// Track the accumulated state belongs to
    subject: Option<u64>,
}

impl BehaviorStateMachine {
    pub fn new(config: BehaviorConfig, now: Instant) -> Result<Self, BehaviorError> {
        config.validate()?;
        Ok(Self {
            sleep_enabled: config.sleep_detection_enabled,
            config,
            state: BehaviorState::new(now),
            last_known: None,
            last_center: None,
            last_observed_at: None,
            subject: None,
        })
    }

    /// Safe zone for the given bed, if safe-zone checking is on
    pub fn safe_zone_for(&self, bed: Option<&BoundingBox>) -> Option<SafeZone> {
        if !self.config.use_bed_safe_zone {
            return None;
        }
        bed.map(|b| SafeZone::from_bed(b, self.config.safe_margin_ratio))
    }

    /// Advance by one frame
    pub fn observe(
        &mut self,
        subject: Option<&BoundingBox>,
        safe_zone: Option<&SafeZone>,
        now: Instant,
    ) -> Vec<BehaviorEvent> {
        let mut events = Vec::new();

        let Some(bbox) = subject else {
            // Accumulators freeze; the gap is not counted as stillness
            if self.state.state != Behavior::Unknown {
                self.last_known = Some(self.state.state);
                self.transition(Behavior::Unknown, now);
            }
            self.last_observed_at = None;
            return events;
        };

        let center = bbox.center();
        let elapsed = self
            .last_observed_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        let displacement = self.last_center.map_or(0.0, |c| c.distance(&center));
        self.last_observed_at = Some(now);
        self.last_center = Some(center);

        if self.sleep_enabled {
            self.update_sleep(displacement, elapsed, now, &mut events);
        }
        self.update_risk(center, safe_zone, &mut events);

        events
    }

    fn update_sleep(
        &mut self,
        displacement: f32,
        elapsed: Duration,
        now: Instant,
        events: &mut Vec<BehaviorEvent>,
    ) {
        if self.state.state == Behavior::Unknown {
            let resumed = self.last_known.take().unwrap_or(Behavior::Awake);
            self.transition(resumed, now);
        }

        if displacement >= self.config.movement_threshold {
            self.state.still_duration = Duration::ZERO;
            self.state.movement_accumulator = 0.0;
            if self.state.state == Behavior::Asleep {
                info!(displacement, "Subject moving after sleep");
                self.transition(Behavior::Awake, now);
                events.push(BehaviorEvent::Wake);
            }
            return;
        }

        self.state.still_duration += elapsed;
        self.state.movement_accumulator += displacement;
        if self.state.state == Behavior::Awake && self.state.still_duration >= self.config.sleep_time {
            info!(still_for = ?self.state.still_duration, "Subject stationary long enough to be asleep");
            self.transition(Behavior::Asleep, now);
            events.push(BehaviorEvent::Sleep);
        }
    }

    fn update_risk(&mut self, center: Point, zone: Option<&SafeZone>, events: &mut Vec<BehaviorEvent>) {
        let outside = zone.is_some_and(|z| !z.contains(center));
        if !outside {
            if self.state.fall_risk {
                debug!("Subject back inside safe zone");
            }
            self.state.risk_frame_count = 0;
            self.state.fall_risk = false;
            return;
        }

        self.state.risk_frame_count = self.state.risk_frame_count.saturating_add(1);
        if self.state.risk_frame_count == self.config.risk_frames_threshold {
            warn!(x = center.x, y = center.y, "Subject near bed edge");
            self.state.fall_risk = true;
            events.push(BehaviorEvent::FallRisk);
        }
    }

    fn transition(&mut self, to: Behavior, now: Instant) {
        debug!(from = ?self.state.state, to = ?to, "Behavior transition");
        metrics::counter!("behavior_transitions_total").increment(1);
        self.state.state = to;
        self.state.state_entered_at = now;
    }

    /// Note the currently selected track. A different person than the one
    /// observed so far starts from a clean slate, so the jump between two
    /// people never reads as movement. `None` (nobody bound) changes nothing.
    pub fn set_subject(&mut self, track_id: Option<u64>, now: Instant) {
        let Some(id) = track_id else {
            return;
        };
        if let Some(previous) = self.subject {
            if previous != id {
                info!(from = previous, to = id, "Subject changed");
                self.reset(now);
            }
        }
        self.subject = Some(id);
    }

    /// Stop crediting time until the next observation, e.g. across skipped frames
    pub fn freeze_clock(&mut self) {
        self.last_observed_at = None;
    }

    /// Turn sleep/wake inference on or off. Off clears sleep state.
    pub fn set_sleep_detection(&mut self, enabled: bool, now: Instant) {
        if self.sleep_enabled == enabled {
            return;
        }
        self.sleep_enabled = enabled;
        info!(enabled, "Sleep/wake detection toggled");
        if !enabled {
            self.clear_sleep(now);
        }
    }

    pub fn sleep_detection_enabled(&self) -> bool {
        self.sleep_enabled
    }

    /// Forget everything learned about the current subject
    pub fn reset(&mut self, now: Instant) {
        self.clear_sleep(now);
        self.state.fall_risk = false;
        self.state.risk_frame_count = 0;
        self.last_center = None;
        info!("Behavior state reset");
    }

    fn clear_sleep(&mut self, now: Instant) {
        if self.state.state != Behavior::Unknown {
            self.transition(Behavior::Unknown, now);
        }
        self.state.still_duration = Duration::ZERO;
        self.state.movement_accumulator = 0.0;
        self.last_known = None;
        self.last_observed_at = None;
    }

    pub fn state(&self) -> &BehaviorState {
        &self.state
    }

    pub fn summary(&self) -> SleepSummary {
        let label = match (self.sleep_enabled, self.state.state) {
            (false, _) => BehaviorLabel::Disabled,
            (true, Behavior::Unknown) => BehaviorLabel::NoChild,
            (true, Behavior::Asleep) => BehaviorLabel::Sleep,
            (true, Behavior::Awake) => BehaviorLabel::Awake,
        };
        let sleep_time = match label {
            BehaviorLabel::Sleep => self.state.still_duration,
            _ => Duration::ZERO,
        };
        SleepSummary {
            label,
            sleep_time,
            fall_risk: self.state.fall_risk,
        }
    }
}
