//! Control handle for the running pipeline
//!
//! Commands are applied by the pipeline between frames, so they never
//! race with frame processing.

use crate::pipeline::PipelineStatus;
use crate::MonitorError;
use alerting::{NotificationEntry, NotificationLog};
use recording::RecordingError;
use std::path::PathBuf;
use subject_tracking::Point;
use tokio::sync::{mpsc, oneshot, watch};

/// Requests to the frame pipeline
#[derive(Debug)]
pub enum MonitorCommand {
    /// Bind the person whose box contains the point
    SelectAt(Point),
    SelectTrack(u64),
    /// Back to automatic selection; behavior state is reset
    ClearSelection,
    ToggleSleepDetection,
    ToggleRecordingMode,
    TogglePause,
    ResetBedCache,
    Snapshot(oneshot::Sender<Result<PathBuf, RecordingError>>),
    Shutdown,
}

/// Cloneable handle to a running pipeline
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
    status: watch::Receiver<PipelineStatus>,
    history: NotificationLog,
}

impl MonitorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<MonitorCommand>,
        status: watch::Receiver<PipelineStatus>,
        history: NotificationLog,
    ) -> Self {
        Self { tx, status, history }
    }

    pub async fn send(&self, cmd: MonitorCommand) -> Result<(), MonitorError> {
        self.tx.send(cmd).await.map_err(|_| MonitorError::PipelineStopped)
    }

    pub async fn select_at(&self, x: f32, y: f32) -> Result<(), MonitorError> {
        self.send(MonitorCommand::SelectAt(Point::new(x, y))).await
    }

    pub async fn select_track(&self, track_id: u64) -> Result<(), MonitorError> {
        self.send(MonitorCommand::SelectTrack(track_id)).await
    }

    pub async fn clear_selection(&self) -> Result<(), MonitorError> {
        self.send(MonitorCommand::ClearSelection).await
    }

    /// Save the latest frame; resolves once the file is written
    pub async fn snapshot(&self) -> Result<PathBuf, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::Snapshot(reply)).await?;
        let saved = rx.await.map_err(|_| MonitorError::PipelineStopped)?;
        Ok(saved?)
    }

    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.send(MonitorCommand::Shutdown).await
    }

    /// Latest published status
    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    /// Delivered notifications, newest first. Readable after the pipeline stops.
    pub fn notifications(&self, limit: usize) -> Vec<NotificationEntry> {
        self.history.recent(limit)
    }

    pub fn clear_notifications(&self) {
        self.history.clear();
    }
}
