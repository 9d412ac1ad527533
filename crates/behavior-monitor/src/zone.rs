//! Bed-derived safe zone

use serde::Serialize;
use subject_tracking::{BoundingBox, Point};

/// Area inside the bed where the subject is not at risk
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafeZone {
    pub area: BoundingBox,
}

impl SafeZone {
    /// Bed box shrunk inward by `margin_ratio` on each side
    pub fn from_bed(bed: &BoundingBox, margin_ratio: f32) -> Self {
        Self {
            area: bed.shrink(margin_ratio),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.area.contains(p)
    }
}
