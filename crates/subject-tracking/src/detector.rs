//! Detector/tracker adapter boundary
//!
//! The model and tracking algorithm live outside this workspace. They
//! plug in through [`Detector`]; [`ConfidenceFilter`] applies the
//! configured threshold before anything reaches the selector.

use crate::entity::TrackedEntity;
use crate::TrackingError;
use stream_capture::VideoFrame;
use tracing::{debug, warn};

/// Produces tracked entities for a frame
pub trait Detector: Send {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<TrackedEntity>, TrackingError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<TrackedEntity>, TrackingError> {
        (**self).detect(frame)
    }
}

/// Drops entities below a confidence threshold
pub struct ConfidenceFilter<D> {
    inner: D,
    threshold: f32,
}

impl<D: Detector> ConfidenceFilter<D> {
    pub fn new(inner: D, threshold: f32) -> Self {
        Self { inner, threshold }
    }
}

impl<D: Detector> Detector for ConfidenceFilter<D> {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<TrackedEntity>, TrackingError> {
        let mut entities = self.inner.detect(frame)?;
        let before = entities.len();
        entities.retain(|e| e.confidence >= self.threshold);

        let dropped = before - entities.len();
        if dropped > 0 {
            debug!(dropped, threshold = self.threshold, "Low-confidence detections filtered");
        }
        Ok(entities)
    }
}

/// Stand-in used when no detection backend is configured
pub struct NoopDetector;

impl NoopDetector {
    pub fn new() -> Self {
        warn!("No detection backend configured. Every frame will report no entities.");
        Self
    }
}

impl Default for NoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for NoopDetector {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<TrackedEntity>, TrackingError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::BoundingBox;

    struct Fixed(Vec<TrackedEntity>);

    impl Detector for Fixed {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Vec<TrackedEntity>, TrackingError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_filters_below_threshold() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let mut detector = ConfidenceFilter::new(
            Fixed(vec![
                TrackedEntity::person(1, bbox, 0.39),
                TrackedEntity::person(2, bbox, 0.4),
                TrackedEntity::person(3, bbox, 0.9),
            ]),
            0.4,
        );
        let frame = VideoFrame::filled(2, 2, [0, 0, 0]);
        let ids: Vec<u64> = detector
            .detect(&frame)
            .unwrap()
            .iter()
            .map(|e| e.track_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_boxed_detector() {
        let mut detector: Box<dyn Detector> = Box::new(NoopDetector::new());
        let frame = VideoFrame::filled(2, 2, [0, 0, 0]);
        assert!(detector.detect(&frame).unwrap().is_empty());
    }
}
