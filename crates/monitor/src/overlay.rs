//! Annotated frame rendering

use behavior_monitor::SafeZone;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use stream_capture::VideoFrame;
use subject_tracking::{BoundingBox, TrackedEntity};

const BED_COLOR: Rgb<u8> = Rgb([255, 128, 0]);
const SAFE_ZONE_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const PERSON_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const SUBJECT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const CENTER_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const RISK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const SLEEP_COLOR: Rgb<u8> = Rgb([90, 90, 255]);

const RISK_BORDER_PX: u32 = 6;

/// What to draw on a frame
#[derive(Debug, Default)]
pub struct OverlayScene<'a> {
    pub bed: Option<&'a BoundingBox>,
    pub safe_zone: Option<&'a SafeZone>,
    pub entities: &'a [TrackedEntity],
    /// Subject box, if visible this frame
    pub subject: Option<&'a BoundingBox>,
    pub fall_risk: bool,
    pub asleep: bool,
}

/// Draw `scene` over a copy of `frame`. `None` for malformed frames.
pub fn render(frame: &VideoFrame, scene: &OverlayScene<'_>) -> Option<VideoFrame> {
    let mut img = frame.to_rgb_image()?;
    let bounds = img.dimensions();

    if let Some(rect) = scene.bed.and_then(|b| to_rect(b, bounds)) {
        draw_hollow_rect_mut(&mut img, rect, BED_COLOR);
    }
    if let Some(rect) = scene.safe_zone.and_then(|z| to_rect(&z.area, bounds)) {
        draw_hollow_rect_mut(&mut img, rect, SAFE_ZONE_COLOR);
    }
    for person in scene.entities.iter().filter(|e| e.is_person()) {
        if let Some(rect) = to_rect(&person.bbox, bounds) {
            draw_hollow_rect_mut(&mut img, rect, PERSON_COLOR);
        }
    }

    if let Some(subject) = scene.subject {
        draw_thick_rect(&mut img, subject, 2, SUBJECT_COLOR);
        let c = subject.center();
        draw_filled_circle_mut(&mut img, (c.x as i32, c.y as i32), 4, CENTER_COLOR);
    }

    if scene.fall_risk {
        let full = BoundingBox::new(0.0, 0.0, bounds.0 as f32, bounds.1 as f32);
        draw_thick_rect(&mut img, &full, RISK_BORDER_PX, RISK_COLOR);
    }
    if scene.asleep {
        let x = bounds.0.saturating_sub(16) as i32;
        draw_filled_circle_mut(&mut img, (x, 16), 8, SLEEP_COLOR);
    }

    Some(frame.with_rgb_image(img))
}

fn draw_thick_rect(img: &mut RgbImage, bbox: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    let bounds = img.dimensions();
    for i in 0..thickness {
        let inset = i as f32;
        let inner = BoundingBox::new(
            bbox.x + inset,
            bbox.y + inset,
            bbox.width - 2.0 * inset,
            bbox.height - 2.0 * inset,
        );
        if let Some(rect) = to_rect(&inner, bounds) {
            draw_hollow_rect_mut(img, rect, color);
        }
    }
}

/// Clamp a box to the image; `None` if nothing of it is left
fn to_rect(bbox: &BoundingBox, (w, h): (u32, u32)) -> Option<Rect> {
    let x0 = bbox.x.max(0.0);
    let y0 = bbox.y.max(0.0);
    let x1 = bbox.right().min(w as f32);
    let y1 = bbox.bottom().min(h as f32);
    let (rw, rh) = (x1 - x0, y1 - y0);
    if rw.is_nan() || rh.is_nan() || rw < 1.0 || rh < 1.0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size(rw as u32, rh as u32))
}
