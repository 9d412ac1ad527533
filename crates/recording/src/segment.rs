//! Segment boundaries and file layout

use crate::RecordingMode;
use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One recording file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSegment {
    pub file_path: PathBuf,
    /// Local wall-clock time the segment was opened
    pub opened_at: NaiveDateTime,
    pub date_bucket: String,
    pub time_block: String,
    pub mode: RecordingMode,
}

/// Why a segment was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RotationReason {
    Duration,
    TimeBlock,
    DateChange,
    ModeSwitch,
    WriteFailure,
    Shutdown,
}

/// `YYYY-MM-DD`
pub fn date_bucket(at: &NaiveDateTime) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// `HH-HH` block containing `at`, e.g. `06-12` for 6-hour blocks
pub fn time_block(at: &NaiveDateTime, block_hours: u32) -> String {
    let block_hours = block_hours.max(1);
    let start = (at.hour() / block_hours) * block_hours;
    format!("{:02}-{:02}", start, start + block_hours)
}

/// Decides segment boundaries and paths
#[derive(Debug, Clone)]
pub struct SegmentPolicy {
    root: PathBuf,
    source_prefix: String,
    extension: String,
    segment_duration: Duration,
    time_block_hours: u32,
}

impl SegmentPolicy {
    pub fn new(
        root: impl Into<PathBuf>,
        source_prefix: impl Into<String>,
        extension: impl Into<String>,
        segment_duration: Duration,
        time_block_hours: u32,
    ) -> Self {
        Self {
            root: root.into(),
            source_prefix: source_prefix.into(),
            extension: extension.into(),
            segment_duration,
            time_block_hours,
        }
    }

    /// Describe a new segment opened at `at`
    pub fn open_segment(&self, mode: RecordingMode, at: NaiveDateTime) -> RecordingSegment {
        let date_bucket = date_bucket(&at);
        let time_block = time_block(&at, self.time_block_hours);
        let prefix = match mode {
            RecordingMode::Raw => self.source_prefix.clone(),
            RecordingMode::Annotated => format!("{}-annotated", self.source_prefix),
        };
        let dir = self.root.join(&date_bucket).join(&time_block);
        let stem = format!("{}_{}", prefix, at.format("%H%M%S"));

        RecordingSegment {
            file_path: unique_path(&dir, &stem, &self.extension),
            opened_at: at,
            date_bucket,
            time_block,
            mode,
        }
    }

    /// Boundary crossed by `segment` at `now`, if any
    pub fn rotation_due(&self, segment: &RecordingSegment, now: NaiveDateTime) -> Option<RotationReason> {
        let elapsed = now.signed_duration_since(segment.opened_at);
        if elapsed.to_std().map_or(false, |e| e >= self.segment_duration) {
            return Some(RotationReason::Duration);
        }
        if date_bucket(&now) != segment.date_bucket {
            return Some(RotationReason::DateChange);
        }
        if time_block(&now, self.time_block_hours) != segment.time_block {
            return Some(RotationReason::TimeBlock);
        }
        None
    }
}

/// `dir/stem.ext`, or `dir/stem-N.ext` if that file already exists
pub(crate) fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}-{n}.{extension}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn policy(root: &Path) -> SegmentPolicy {
        SegmentPolicy::new(root, "camera", "avi", Duration::from_secs(30 * 60), 6)
    }

    #[test]
    fn test_time_blocks() {
        assert_eq!(time_block(&at(0, 0, 0), 6), "00-06");
        assert_eq!(time_block(&at(13, 59, 0), 6), "12-18");
        assert_eq!(time_block(&at(23, 0, 0), 6), "18-24");
        assert_eq!(time_block(&at(7, 0, 0), 24), "00-24");
    }

    #[test]
    fn test_segment_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let seg = policy(dir.path()).open_segment(RecordingMode::Raw, at(14, 5, 9));
        assert_eq!(
            seg.file_path,
            dir.path().join("2024-05-01").join("12-18").join("camera_140509.avi")
        );

        let annotated = policy(dir.path()).open_segment(RecordingMode::Annotated, at(14, 5, 9));
        assert!(annotated
            .file_path
            .ends_with("2024-05-01/12-18/camera-annotated_140509.avi"));
    }

    #[test]
    fn test_existing_file_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = policy(dir.path()).open_segment(RecordingMode::Raw, at(1, 0, 0));
        std::fs::create_dir_all(first.file_path.parent().unwrap()).unwrap();
        std::fs::write(&first.file_path, b"x").unwrap();

        let second = policy(dir.path()).open_segment(RecordingMode::Raw, at(1, 0, 0));
        assert!(second.file_path.ends_with("camera_010000-1.avi"));
    }

    #[test]
    fn test_rotation_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let seg = policy.open_segment(RecordingMode::Raw, at(5, 45, 0));

        assert_eq!(policy.rotation_due(&seg, at(5, 59, 59)), None);
        assert_eq!(policy.rotation_due(&seg, at(6, 0, 0)), Some(RotationReason::TimeBlock));

        let seg = policy.open_segment(RecordingMode::Raw, at(1, 0, 0));
        assert_eq!(policy.rotation_due(&seg, at(1, 30, 0)), Some(RotationReason::Duration));

        let seg = policy.open_segment(RecordingMode::Raw, at(23, 50, 0));
        let next_day = NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        assert_eq!(policy.rotation_due(&seg, next_day), Some(RotationReason::DateChange));
    }

    #[test]
    fn test_clock_going_back_does_not_rotate_by_duration() {
        let dir = tempfile::tempdir().unwrap();
        let policy = policy(dir.path());
        let seg = policy.open_segment(RecordingMode::Raw, at(2, 30, 0));
        assert_eq!(policy.rotation_due(&seg, at(2, 0, 0)), None);
    }
}
