//! Bed locator
//!
//! Bed detections are noisy and the bed rarely moves, so the box is
//! cached. A detection only replaces the cache once it has been seen in a
//! stable position for `confirm_threshold` detections; the cache is
//! refreshed every `redetect_interval_frames`.

use crate::entity::{BoundingBox, ClassLabel, TrackedEntity};
use serde::Serialize;
use tracing::{debug, info};

/// Bed locator tuning
#[derive(Debug, Clone)]
pub struct BedLocatorConfig {
    /// Frames between bed re-detections once cached
    pub redetect_interval_frames: u64,
    /// Stable detections needed before a box is cached
    pub confirm_threshold: u32,
    /// Allowed corner shift, as a ratio of the smaller frame dimension
    pub shift_tolerance_ratio: f32,
    /// Minimum margin around the bed for candidate people (pixels)
    pub min_area_margin: f32,
    /// Margin around the bed as a ratio of bed width
    pub area_margin_ratio: f32,
}

impl Default for BedLocatorConfig {
    fn default() -> Self {
        Self {
            redetect_interval_frames: 7200,
            confirm_threshold: 1,
            shift_tolerance_ratio: 0.1,
            min_area_margin: 50.0,
            area_margin_ratio: 0.08,
        }
    }
}

/// Snapshot of the locator for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedStatus {
    pub cached: bool,
    pub bed_box: Option<BoundingBox>,
    pub frames_confirmed: u32,
    pub frames_since_detection: u64,
}

/// Caches the bed position across frames
pub struct BedLocator {
    config: BedLocatorConfig,
    cached: Option<BoundingBox>,
    candidate: Option<BoundingBox>,
    frames_confirmed: u32,
    frames_since_detection: u64,
}

impl BedLocator {
    pub fn new(config: BedLocatorConfig) -> Self {
        Self {
            config,
            cached: None,
            candidate: None,
            frames_confirmed: 0,
            frames_since_detection: 0,
        }
    }

    /// Feed one frame's entities; returns the bed box in effect
    pub fn update(&mut self, entities: &[TrackedEntity], frame_size: (u32, u32)) -> Option<BoundingBox> {
        let should_detect = self.cached.is_none()
            || self.frames_since_detection >= self.config.redetect_interval_frames;
        self.frames_since_detection += 1;

        if !should_detect {
            return self.cached;
        }

        let Some(detected) = entities
            .iter()
            .find(|e| e.class == ClassLabel::Bed)
            .map(|e| e.bbox)
        else {
            if self.cached.is_some() {
                debug!("No bed this frame; using cached box");
            }
            return self.cached;
        };

        let tolerance = frame_size.0.min(frame_size.1) as f32 * self.config.shift_tolerance_ratio;
        let reference = self.candidate.or(self.cached);
        match reference {
            Some(previous) if Self::within(&previous, &detected, tolerance) => {
                self.frames_confirmed += 1;
            }
            Some(_) => {
                info!("Bed position shift detected; restarting validation");
                self.frames_confirmed = 1;
            }
            None => self.frames_confirmed = 1,
        }
        self.candidate = Some(detected);

        if self.frames_confirmed >= self.config.confirm_threshold {
            if self.cached.is_none() {
                info!(?detected, "Bed located");
            }
            self.cached = Some(detected);
            self.frames_since_detection = 0;
        }
        self.cached
    }

    fn within(a: &BoundingBox, b: &BoundingBox, tolerance: f32) -> bool {
        (a.x - b.x).abs() < tolerance
            && (a.y - b.y).abs() < tolerance
            && (a.right() - b.right()).abs() < tolerance
            && (a.bottom() - b.bottom()).abs() < tolerance
    }

    /// Cached bed box, if any
    pub fn bed(&self) -> Option<BoundingBox> {
        self.cached
    }

    /// Area around the bed in which people are considered candidates
    pub fn candidate_area(&self, frame_size: (u32, u32)) -> Option<BoundingBox> {
        let bed = self.cached?;
        let margin = (bed.width * self.config.area_margin_ratio)
            .floor()
            .max(self.config.min_area_margin);
        Some(bed.expand(margin, (frame_size.0 as f32, frame_size.1 as f32)))
    }

    pub fn reset(&mut self) {
        self.cached = None;
        self.candidate = None;
        self.frames_confirmed = 0;
        self.frames_since_detection = 0;
        info!("Bed cache reset");
    }

    pub fn status(&self) -> BedStatus {
        BedStatus {
            cached: self.cached.is_some(),
            bed_box: self.cached,
            frames_confirmed: self.frames_confirmed,
            frames_since_detection: self.frames_since_detection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Point;

    fn bed(x: f32, y: f32) -> TrackedEntity {
        TrackedEntity {
            track_id: 900,
            bbox: BoundingBox::new(x, y, 300.0, 200.0),
            class: ClassLabel::Bed,
            confidence: 0.8,
        }
    }

    const FRAME: (u32, u32) = (1280, 720);

    #[test]
    fn test_caches_first_detection() {
        let mut locator = BedLocator::new(BedLocatorConfig::default());
        assert_eq!(locator.update(&[], FRAME), None);
        let located = locator.update(&[bed(100.0, 100.0)], FRAME);
        assert_eq!(located, Some(BoundingBox::new(100.0, 100.0, 300.0, 200.0)));

        // Cached box is kept without re-detecting
        assert_eq!(locator.update(&[bed(500.0, 400.0)], FRAME), located);
        assert_eq!(locator.status().frames_since_detection, 1);
    }

    #[test]
    fn test_shift_restarts_validation() {
        let config = BedLocatorConfig {
            confirm_threshold: 2,
            ..BedLocatorConfig::default()
        };
        let mut locator = BedLocator::new(config);

        assert_eq!(locator.update(&[bed(100.0, 100.0)], FRAME), None);
        assert_eq!(locator.update(&[bed(400.0, 100.0)], FRAME), None);
        assert_eq!(locator.status().frames_confirmed, 1);

        let located = locator.update(&[bed(410.0, 105.0)], FRAME);
        assert_eq!(located.map(|b| b.x), Some(410.0));
    }

    #[test]
    fn test_redetects_after_interval() {
        let config = BedLocatorConfig {
            redetect_interval_frames: 3,
            ..BedLocatorConfig::default()
        };
        let mut locator = BedLocator::new(config);
        locator.update(&[bed(100.0, 100.0)], FRAME);
        locator.update(&[], FRAME);
        locator.update(&[], FRAME);
        locator.update(&[], FRAME);
        let moved = locator.update(&[bed(120.0, 100.0)], FRAME);
        assert_eq!(moved.map(|b| b.x), Some(120.0));
        assert_eq!(locator.status().frames_since_detection, 0);
    }

    #[test]
    fn test_candidate_area_surrounds_bed() {
        let mut locator = BedLocator::new(BedLocatorConfig::default());
        assert_eq!(locator.candidate_area(FRAME), None);
        locator.update(&[bed(100.0, 100.0)], FRAME);

        let area = locator.candidate_area(FRAME).unwrap();
        assert!(area.contains(Point::new(70.0, 70.0)));
        assert!(!area.contains(Point::new(910.0, 510.0)));
    }

    #[test]
    fn test_reset_clears_cache() {
        let mut locator = BedLocator::new(BedLocatorConfig::default());
        locator.update(&[bed(100.0, 100.0)], FRAME);
        locator.reset();
        assert_eq!(locator.bed(), None);
        assert!(!locator.status().cached);
    }
}
