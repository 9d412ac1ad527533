//! One-shot JPEG snapshots

use crate::segment::unique_path;
use crate::RecordingError;
use chrono::NaiveDateTime;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use stream_capture::VideoFrame;
use tracing::info;

/// Write `frame` as `dir/snapshot_HHMMSS.jpg` and return the path
pub fn save_snapshot(frame: &VideoFrame, dir: &Path, at: NaiveDateTime) -> Result<PathBuf, RecordingError> {
    let image = frame
        .to_rgb_image()
        .ok_or_else(|| RecordingError::Encode("frame buffer does not match its geometry".into()))?;

    std::fs::create_dir_all(dir)?;
    let path = unique_path(dir, &at.format("snapshot_%H%M%S").to_string(), "jpg");
    image
        .save_with_format(&path, ImageFormat::Jpeg)
        .map_err(|e| RecordingError::Encode(e.to_string()))?;

    info!(path = %path.display(), "Snapshot saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stream_capture::frame::decode_jpeg;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(21, 4, 5)
            .unwrap()
    }

    #[test]
    fn test_snapshot_is_readable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let frame = VideoFrame::filled(32, 24, [200, 40, 40]);

        let path = save_snapshot(&frame, dir.path(), at()).unwrap();
        assert!(path.ends_with("snapshot_210405.jpg"));

        let decoded = decode_jpeg(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 24));
    }

    #[test]
    fn test_same_second_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let frame = VideoFrame::filled(8, 8, [0, 0, 0]);
        let first = save_snapshot(&frame, dir.path(), at()).unwrap();
        let second = save_snapshot(&frame, dir.path(), at()).unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("snapshot_210405-1.jpg"));
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut frame = VideoFrame::filled(8, 8, [0, 0, 0]);
        frame.data.truncate(10);
        assert!(matches!(
            save_snapshot(&frame, dir.path(), at()),
            Err(RecordingError::Encode(_))
        ));
    }
}
