//! Segment writer
//!
//! Runs on its own thread and owns every open sink. Each open segment is
//! an [`ActiveSegment`] guard: dropping it finalizes the container, so
//! segments are closed on rotation, shutdown, channel close and unwinding
//! alike.

use crate::segment::{RecordingSegment, RotationReason, SegmentPolicy};
use crate::sink::{SegmentSink, SinkFactory};
use crate::{RecordingError, RecordingMode};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stream_capture::VideoFrame;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Wait before retrying a segment that could not be opened
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) enum WriterCommand {
    Frame {
        mode: RecordingMode,
        frame: Arc<VideoFrame>,
        at: NaiveDateTime,
    },
    Finalize {
        mode: RecordingMode,
        reason: RotationReason,
    },
    Shutdown {
        ack: oneshot::Sender<Vec<SegmentSummary>>,
    },
}

/// A closed segment
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub segment: RecordingSegment,
    pub frames: u64,
    pub degraded: bool,
    pub reason: RotationReason,
}

/// Counters shared with the router
#[derive(Debug, Default)]
pub(crate) struct WriterShared {
    pub frames_written: AtomicU64,
    pub segments_finalized: AtomicU64,
    pub write_failures: AtomicU64,
    pub degraded: AtomicBool,
    pub active: Mutex<[Option<PathBuf>; 2]>,
}

impl WriterShared {
    fn set_active(&self, mode: RecordingMode, path: Option<PathBuf>) {
        if let Ok(mut active) = self.active.lock() {
            active[mode.index()] = path;
        }
    }

    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.active
            .lock()
            .map(|a| a.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

struct ActiveSegment {
    segment: RecordingSegment,
    sink: Option<Box<dyn SegmentSink>>,
    frames: u64,
    degraded: bool,
}

impl ActiveSegment {
    fn write(&mut self, frame: &VideoFrame) -> Result<(), RecordingError> {
        match self.sink.as_mut() {
            Some(sink) => sink.write_frame(frame),
            None => Err(RecordingError::Write {
                path: self.segment.file_path.clone(),
                reason: "segment closed".into(),
            }),
        }
    }

    fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.finalize() {
                warn!(path = %self.segment.file_path.display(), "Failed to finalize segment: {}", e);
                self.degraded = true;
            }
        }
    }

    fn finish(mut self, reason: RotationReason) -> SegmentSummary {
        self.close();
        SegmentSummary {
            segment: self.segment.clone(),
            frames: self.frames,
            degraded: self.degraded,
            reason,
        }
    }
}

impl Drop for ActiveSegment {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) struct SegmentWriter {
    factory: Box<dyn SinkFactory>,
    policy: SegmentPolicy,
    fps: f64,
    active: [Option<ActiveSegment>; 2],
    retry_after: [Option<Instant>; 2],
    shared: Arc<WriterShared>,
}

impl SegmentWriter {
    pub fn new(
        factory: Box<dyn SinkFactory>,
        policy: SegmentPolicy,
        fps: f64,
        shared: Arc<WriterShared>,
    ) -> Self {
        Self {
            factory,
            policy,
            fps,
            active: [None, None],
            retry_after: [None, None],
            shared,
        }
    }

    /// Drain commands until shutdown or until every sender is gone
    pub fn run(mut self, mut rx: mpsc::Receiver<WriterCommand>) {
        debug!("Segment writer started");
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                WriterCommand::Frame { mode, frame, at } => self.write(mode, &frame, at),
                WriterCommand::Finalize { mode, reason } => {
                    self.finalize(mode, reason);
                }
                WriterCommand::Shutdown { ack } => {
                    let summaries = self.finalize_all(RotationReason::Shutdown);
                    let _ = ack.send(summaries);
                    debug!("Segment writer stopped");
                    return;
                }
            }
        }
        self.finalize_all(RotationReason::Shutdown);
        debug!("Segment writer stopped: router dropped");
    }

    pub fn write(&mut self, mode: RecordingMode, frame: &VideoFrame, at: NaiveDateTime) {
        let i = mode.index();

        let due = self.active[i].as_ref().and_then(|active| {
            if active.degraded {
                Some(RotationReason::WriteFailure)
            } else {
                self.policy.rotation_due(&active.segment, at)
            }
        });
        if let Some(reason) = due {
            self.finalize(mode, reason);
        }

        if self.active[i].is_none() {
            if self.retry_after[i].is_some_and(|t| Instant::now() < t) {
                return;
            }
            match self.open(mode, frame, at) {
                Ok(active) => {
                    self.retry_after[i] = None;
                    self.active[i] = Some(active);
                }
                Err(e) => {
                    error!(%mode, "Cannot open segment: {}", e);
                    self.retry_after[i] = Some(Instant::now() + OPEN_RETRY_DELAY);
                    return;
                }
            }
        }

        let Some(active) = self.active[i].as_mut() else {
            return;
        };
        match active.write(frame) {
            Ok(()) => {
                active.frames += 1;
                self.shared.frames_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("{}; rotating to a fresh segment", e);
                active.degraded = true;
                self.shared.write_failures.fetch_add(1, Ordering::Relaxed);
                self.shared.degraded.store(true, Ordering::Relaxed);
                metrics::counter!("recording_write_failures_total").increment(1);
            }
        }
    }

    fn open(
        &mut self,
        mode: RecordingMode,
        first: &VideoFrame,
        at: NaiveDateTime,
    ) -> Result<ActiveSegment, RecordingError> {
        let segment = self.policy.open_segment(mode, at);
        if let Some(dir) = segment.file_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let sink = self.factory.open(&segment.file_path, first, self.fps)?;

        info!(path = %segment.file_path.display(), %mode, "Recording started");
        self.shared.set_active(mode, Some(segment.file_path.clone()));
        self.shared.degraded.store(false, Ordering::Relaxed);
        Ok(ActiveSegment {
            segment,
            sink: Some(sink),
            frames: 0,
            degraded: false,
        })
    }

    pub fn finalize(&mut self, mode: RecordingMode, reason: RotationReason) -> Option<SegmentSummary> {
        let active = self.active[mode.index()].take()?;
        let summary = active.finish(reason);

        self.shared.set_active(mode, None);
        self.shared.segments_finalized.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("recording_segments_finalized_total").increment(1);
        info!(
            path = %summary.segment.file_path.display(),
            frames = summary.frames,
            degraded = summary.degraded,
            ?reason,
            "Segment finalized"
        );
        Some(summary)
    }

    pub fn finalize_all(&mut self, reason: RotationReason) -> Vec<SegmentSummary> {
        [RecordingMode::Raw, RecordingMode::Annotated]
            .into_iter()
            .filter_map(|mode| self.finalize(mode, reason))
            .collect()
    }
}
