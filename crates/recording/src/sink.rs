//! Segment sinks
//!
//! A sink receives the frames of one segment on the writer thread.
//! Sinks are opened lazily with the segment's first frame so the
//! container geometry is known.

use crate::RecordingError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use stream_capture::VideoFrame;
use tracing::{debug, warn};

/// Files smaller than this after finalizing are reported as suspicious
const MIN_SEGMENT_BYTES: u64 = 1000;

/// Receives the frames of one segment
pub trait SegmentSink: Send {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), RecordingError>;

    /// Flush and close the container. Calling it again is a no-op.
    fn finalize(&mut self) -> Result<(), RecordingError>;
}

/// Opens sinks for new segments
pub trait SinkFactory: Send + 'static {
    fn open(&self, path: &Path, first: &VideoFrame, fps: f64) -> Result<Box<dyn SegmentSink>, RecordingError>;
}

/// Encodes segments to MJPEG through an `ffmpeg` child process
#[derive(Debug, Clone)]
pub struct FfmpegSinkFactory {
    ffmpeg_bin: String,
}

impl FfmpegSinkFactory {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    fn encoder_command(&self, path: &Path, first: &VideoFrame, fps: f64) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-y", "-nostdin", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", first.format.ffmpeg_name()])
            .arg("-s")
            .arg(format!("{}x{}", first.width, first.height))
            .arg("-r")
            .arg(format!("{fps}"))
            .args(["-i", "pipe:0", "-an", "-c:v", "mjpeg", "-q:v", "3"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, path: &Path, first: &VideoFrame, fps: f64) -> Result<Box<dyn SegmentSink>, RecordingError> {
        let write_err = |reason: String| RecordingError::Write {
            path: path.to_path_buf(),
            reason,
        };

        let mut child = self
            .encoder_command(path, first, fps)
            .spawn()
            .map_err(|e| write_err(format!("cannot run {}: {e}", self.ffmpeg_bin)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| write_err("encoder has no stdin".into()))?;

        debug!(path = %path.display(), width = first.width, height = first.height, "Encoder started");
        Ok(Box::new(FfmpegSink {
            path: path.to_path_buf(),
            width: first.width,
            height: first.height,
            child: Some(child),
            stdin: Some(stdin),
        }))
    }
}

struct FfmpegSink {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl SegmentSink for FfmpegSink {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<(), RecordingError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| RecordingError::Write {
            path: self.path.clone(),
            reason: "segment already finalized".into(),
        })?;

        let resized;
        let frame = if frame.width != self.width || frame.height != self.height {
            resized = frame.resize(self.width, self.height);
            &resized
        } else {
            frame
        };

        stdin.write_all(&frame.data).map_err(|e| RecordingError::Write {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn finalize(&mut self) -> Result<(), RecordingError> {
        // Closing stdin lets the encoder write the trailer
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait()?;
        if !status.success() {
            return Err(RecordingError::Write {
                path: self.path.clone(),
                reason: format!("encoder exited with {status}"),
            });
        }

        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() < MIN_SEGMENT_BYTES => {
                warn!(path = %self.path.display(), bytes = meta.len(), "Video file too small");
            }
            Ok(meta) => {
                debug!(path = %self.path.display(), bytes = meta.len(), "Segment saved");
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Video file missing after finalize: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_command_args() {
        let factory = FfmpegSinkFactory::new("ffmpeg");
        let frame = VideoFrame::filled(640, 360, [0, 0, 0]);
        let cmd = factory.encoder_command(Path::new("/tmp/out.avi"), &frame, 30.0);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "640x360"));
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "rgb24"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "mjpeg"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.avi"));
    }

    #[test]
    fn test_missing_encoder_is_write_error() {
        let factory = FfmpegSinkFactory::new("/nonexistent/ffmpeg-binary");
        let frame = VideoFrame::filled(4, 4, [0, 0, 0]);
        let result = factory.open(Path::new("/tmp/never.avi"), &frame, 30.0);
        assert!(matches!(result, Err(RecordingError::Write { .. })));
    }
}
