//! Tracked entities and box geometry

use serde::{Deserialize, Serialize};

/// Point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Inclusive on all edges
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Inset each side by `ratio` of the box's own width/height
    pub fn shrink(&self, ratio: f32) -> BoundingBox {
        let dx = self.width * ratio;
        let dy = self.height * ratio;
        BoundingBox::new(
            self.x + dx,
            self.y + dy,
            (self.width - 2.0 * dx).max(0.0),
            (self.height - 2.0 * dy).max(0.0),
        )
    }

    /// Grow each side by `margin` pixels, clamped to `[0, bounds]`
    pub fn expand(&self, margin: f32, bounds: (f32, f32)) -> BoundingBox {
        let x1 = (self.x - margin).max(0.0);
        let y1 = (self.y - margin).max(0.0);
        let x2 = (self.right() + margin).min(bounds.0);
        let y2 = (self.bottom() + margin).min(bounds.1);
        BoundingBox::from_corners(x1, y1, x2.max(x1), y2.max(y1))
    }
}

/// Entity class reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Person,
    Bed,
    Furniture,
}

/// One detector/tracker output for a single frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Identity from the tracker; may be reassigned on re-acquisition
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub class: ClassLabel,
    /// 0.0 - 1.0
    pub confidence: f32,
}

impl TrackedEntity {
    pub fn person(track_id: u64, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id,
            bbox,
            class: ClassLabel::Person,
            confidence,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class == ClassLabel::Person
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_by_ratio() {
        let bed = BoundingBox::from_corners(100.0, 100.0, 400.0, 400.0);
        let zone = bed.shrink(0.15);
        assert!((zone.x - 145.0).abs() < 1e-3);
        assert!((zone.y - 145.0).abs() < 1e-3);
        assert!((zone.right() - 355.0).abs() < 1e-3);
        assert!((zone.bottom() - 355.0).abs() < 1e-3);
    }

    #[test]
    fn test_expand_is_clamped() {
        let bed = BoundingBox::new(10.0, 20.0, 100.0, 50.0);
        let area = bed.expand(50.0, (140.0, 480.0));
        assert_eq!(area.x, 0.0);
        assert_eq!(area.y, 0.0);
        assert_eq!(area.right(), 140.0);
        assert_eq!(area.bottom(), 120.0);
    }

    #[test]
    fn test_contains_edges() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains(Point::new(10.0, 10.0)));
        assert!(!b.contains(Point::new(10.1, 5.0)));
        assert_eq!(b.center(), Point::new(5.0, 5.0));
    }
}
