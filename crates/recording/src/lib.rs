//! Recording Layer
//!
//! Persists the stream as time-segmented files:
//! - Deterministic `date/time-block/prefix_HHMMSS.ext` layout
//! - Rotation on segment length, time-block change or date change
//! - Frames queued to a dedicated writer thread, bounded and non-blocking
//! - Segments finalized on rotation, mode switch, shutdown or drop
//! - One-shot JPEG snapshots

mod router;
mod segment;
mod sink;
mod snapshot;
mod writer;

pub use router::{RecordingRouter, RecordingStatus};
pub use segment::{date_bucket, time_block, RecordingSegment, RotationReason, SegmentPolicy};
pub use sink::{FfmpegSinkFactory, SegmentSink, SinkFactory};
pub use snapshot::save_snapshot;
pub use writer::SegmentSummary;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Recording errors
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Write to {path} failed: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encode(String),

    #[error("No frame available")]
    NoFrame,

    #[error("Segment writer has stopped")]
    WriterStopped,

    #[error("Invalid recording configuration: {0}")]
    Config(String),
}

/// Content type of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingMode {
    Raw,
    Annotated,
}

impl RecordingMode {
    pub(crate) fn index(self) -> usize {
        match self {
            RecordingMode::Raw => 0,
            RecordingMode::Annotated => 1,
        }
    }

    pub fn toggled(self) -> RecordingMode {
        match self {
            RecordingMode::Raw => RecordingMode::Annotated,
            RecordingMode::Annotated => RecordingMode::Raw,
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingMode::Raw => f.write_str("raw"),
            RecordingMode::Annotated => f.write_str("annotated"),
        }
    }
}

/// Recording configuration
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Root of the `date/time-block` tree
    pub recordings_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub source_prefix: String,
    pub extension: String,
    pub segment_duration: Duration,
    pub time_block_hours: u32,
    /// Mode written at start; toggled at runtime
    pub primary_mode: RecordingMode,
    /// Keep a raw segment alongside an annotated primary
    pub save_raw: bool,
    /// Nominal frame rate written into the container
    pub fps: f64,
    pub queue_capacity: usize,
    /// How long `write` may wait for queue space before dropping the frame
    pub enqueue_timeout: Duration,
}

impl RecordingConfig {
    pub fn validate(&self) -> Result<(), RecordingError> {
        if self.segment_duration.is_zero() {
            return Err(RecordingError::Config("segment length must be positive".into()));
        }
        if !(1..=24).contains(&self.time_block_hours) {
            return Err(RecordingError::Config(format!(
                "time block of {} hours is outside 1-24",
                self.time_block_hours
            )));
        }
        if self.queue_capacity == 0 {
            return Err(RecordingError::Config("writer queue capacity must be at least 1".into()));
        }
        if self.fps.is_nan() || self.fps <= 0.0 {
            return Err(RecordingError::Config("frame rate must be positive".into()));
        }
        if self.source_prefix.is_empty() || self.source_prefix.contains(['/', '\\']) {
            return Err(RecordingError::Config(format!(
                "invalid source prefix {:?}",
                self.source_prefix
            )));
        }
        Ok(())
    }

    /// Modes recorded when the primary mode is `primary`
    pub fn active_modes(&self, primary: RecordingMode) -> Vec<RecordingMode> {
        let mut modes = vec![primary];
        if self.save_raw && primary != RecordingMode::Raw {
            modes.insert(0, RecordingMode::Raw);
        }
        modes
    }
}
