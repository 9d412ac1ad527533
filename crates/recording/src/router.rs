//! Recording router
//!
//! Front end of the recording layer, owned by the frame pipeline. Frames
//! are handed to the segment writer thread through a bounded queue; a
//! full queue costs the pipeline at most `enqueue_timeout` before the
//! frame is dropped.

use crate::segment::{RotationReason, SegmentPolicy};
use crate::sink::SinkFactory;
use crate::snapshot::save_snapshot;
use crate::writer::{SegmentSummary, SegmentWriter, WriterCommand, WriterShared};
use crate::{RecordingConfig, RecordingError, RecordingMode};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stream_capture::VideoFrame;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Point-in-time view of the recorder
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub paused: bool,
    pub mode: RecordingMode,
    pub active_modes: Vec<RecordingMode>,
    pub active_segments: Vec<PathBuf>,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub segments_finalized: u64,
    pub write_failures: u64,
    /// The most recent write failed; a fresh segment opens on the next frame
    pub degraded: bool,
}

pub struct RecordingRouter {
    config: RecordingConfig,
    primary: RecordingMode,
    paused: bool,
    tx: mpsc::Sender<WriterCommand>,
    shared: Arc<WriterShared>,
    thread: Option<JoinHandle<()>>,
    latest: Option<Arc<VideoFrame>>,
    frames_dropped: u64,
}

impl RecordingRouter {
    /// Validate `config` and start the writer thread
    pub fn new(config: RecordingConfig, factory: impl SinkFactory) -> Result<Self, RecordingError> {
        config.validate()?;

        let policy = SegmentPolicy::new(
            &config.recordings_dir,
            &config.source_prefix,
            &config.extension,
            config.segment_duration,
            config.time_block_hours,
        );
        let shared = Arc::new(WriterShared::default());
        let writer = SegmentWriter::new(Box::new(factory), policy, config.fps, Arc::clone(&shared));
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let thread = std::thread::Builder::new()
            .name("segment-writer".into())
            .spawn(move || writer.run(rx))?;

        info!(
            dir = %config.recordings_dir.display(),
            mode = %config.primary_mode,
            save_raw = config.save_raw,
            "Recording router started"
        );
        Ok(Self {
            primary: config.primary_mode,
            config,
            paused: false,
            tx,
            shared,
            thread: Some(thread),
            latest: None,
            frames_dropped: 0,
        })
    }

    /// Queue a frame for every active mode.
    ///
    /// `annotated` is the overlay rendering of `raw`; when it is missing the
    /// annotated segment skips this frame. While paused nothing is queued
    /// but the frame is still kept for snapshots.
    pub async fn write(
        &mut self,
        raw: Arc<VideoFrame>,
        annotated: Option<Arc<VideoFrame>>,
        now: NaiveDateTime,
    ) -> Result<(), RecordingError> {
        self.latest = Some(annotated.clone().unwrap_or_else(|| Arc::clone(&raw)));
        if self.paused {
            return Ok(());
        }

        for mode in self.config.active_modes(self.primary) {
            let frame = match mode {
                RecordingMode::Raw => Arc::clone(&raw),
                RecordingMode::Annotated => match &annotated {
                    Some(frame) => Arc::clone(frame),
                    None => continue,
                },
            };
            self.enqueue(WriterCommand::Frame { mode, frame, at: now }).await?;
        }
        Ok(())
    }

    async fn enqueue(&mut self, cmd: WriterCommand) -> Result<(), RecordingError> {
        match self.tx.send_timeout(cmd, self.config.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.frames_dropped += 1;
                metrics::counter!("recording_frames_dropped_total").increment(1);
                debug!(dropped = self.frames_dropped, "Writer queue full, frame dropped");
                Ok(())
            }
            Err(SendTimeoutError::Closed(_)) => Err(RecordingError::WriterStopped),
        }
    }

    /// Stop queuing frames. Open segments stay open.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            info!("Recording paused");
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            info!("Recording resumed");
        }
    }

    /// Returns whether recording is now paused
    pub fn toggle_pause(&mut self) -> bool {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn mode(&self) -> RecordingMode {
        self.primary
    }

    /// Switch between raw and annotated recording.
    ///
    /// Segments of modes that are no longer recorded are finalized; the
    /// new mode opens its segment with the next frame.
    pub async fn toggle_mode(&mut self) -> Result<RecordingMode, RecordingError> {
        let before = self.config.active_modes(self.primary);
        self.primary = self.primary.toggled();
        let after = self.config.active_modes(self.primary);

        for mode in before.into_iter().filter(|m| !after.contains(m)) {
            self.tx
                .send(WriterCommand::Finalize {
                    mode,
                    reason: RotationReason::ModeSwitch,
                })
                .await
                .map_err(|_| RecordingError::WriterStopped)?;
        }

        info!(mode = %self.primary, "Recording mode switched");
        Ok(self.primary)
    }

    /// Save the most recent frame as a JPEG under the snapshots directory
    pub async fn snapshot(&self, now: NaiveDateTime) -> Result<PathBuf, RecordingError> {
        let frame = self.latest.clone().ok_or(RecordingError::NoFrame)?;
        let dir = self.config.snapshots_dir.clone();
        tokio::task::spawn_blocking(move || save_snapshot(&frame, &dir, now))
            .await
            .map_err(|e| RecordingError::Encode(e.to_string()))?
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            paused: self.paused,
            mode: self.primary,
            active_modes: self.config.active_modes(self.primary),
            active_segments: self.shared.active_paths(),
            frames_written: self.shared.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped,
            segments_finalized: self.shared.segments_finalized.load(Ordering::Relaxed),
            write_failures: self.shared.write_failures.load(Ordering::Relaxed),
            degraded: self.shared.degraded.load(Ordering::Relaxed),
        }
    }

    /// Finalize every open segment and stop the writer thread.
    ///
    /// Waits at most `grace` for the queue to drain. Calling it again
    /// returns an empty list.
    pub async fn shutdown(&mut self, grace: Duration) -> Vec<SegmentSummary> {
        let Some(thread) = self.thread.take() else {
            return Vec::new();
        };

        let (ack, done) = oneshot::channel();
        let tx = self.tx.clone();
        let drained = tokio::time::timeout(grace, async move {
            tx.send(WriterCommand::Shutdown { ack }).await.ok()?;
            done.await.ok()
        })
        .await;

        match drained {
            Ok(Some(summaries)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                info!(segments = summaries.len(), "Recording stopped");
                summaries
            }
            Ok(None) => {
                warn!("Segment writer exited before shutdown");
                Vec::new()
            }
            Err(_) => {
                warn!("Segment writer did not drain within {:?}", grace);
                Vec::new()
            }
        }
    }
}
