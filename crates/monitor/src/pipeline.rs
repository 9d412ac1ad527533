//! Frame pipeline
//!
//! One frame at a time, in a fixed order:
//! connector → detector → bed locator → selector → behavior → alerts →
//! overlay → recorder.
//!
//! Each iteration targets `1 / target_fps`. A slow frame is followed
//! immediately by the next one instead of sleeping, so delays never
//! compound. Interrupted reads skip the frame and freeze the behavior
//! clock; only an exhausted reconnect ends the loop with an error.

use crate::handle::{MonitorCommand, MonitorHandle};
use crate::overlay::{self, OverlayScene};
use crate::settings::MonitorSettings;
use crate::MonitorError;
use alerting::{Alert, AlertDispatcher, AlertKind, NotificationLog, Notifier};
use behavior_monitor::{format_sleep_time, Behavior, BehaviorEvent, BehaviorLabel, BehaviorStateMachine};
use chrono::Local;
use recording::{RecordingRouter, RecordingStatus, SinkFactory};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_capture::{ConnectionState, StreamConnector, StreamError, TransportFactory, VideoFrame};
use subject_tracking::{
    BedLocator, BedLocatorConfig, BedStatus, ConfidenceFilter, Detector, ManualPick, SelectionEvent,
    SubjectSelector, SubjectState,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Pending control commands before senders wait
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    /// Iterations that took longer than the frame interval
    pub deadline_misses: u64,
    pub worst_frame_time: Duration,
}

/// Published after every iteration
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub connection: ConnectionState,
    pub behavior: BehaviorLabel,
    /// `"{h}h {m}m"` or `"{m}m"`
    pub sleep_time: String,
    pub fall_risk: bool,
    pub sleep_detection_enabled: bool,
    pub subject: SubjectState,
    pub recording: RecordingStatus,
    pub bed: BedStatus,
    pub stats: FrameStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

pub struct FramePipeline<F: TransportFactory, D: Detector> {
    connector: StreamConnector<F>,
    detector: ConfidenceFilter<D>,
    bed: BedLocator,
    selector: SubjectSelector,
    behavior: BehaviorStateMachine,
    alerts: AlertDispatcher,
    recorder: RecordingRouter,
    commands: mpsc::Receiver<MonitorCommand>,
    status_tx: watch::Sender<PipelineStatus>,
    stats: FrameStats,
    frame_interval: Duration,
    grace: Duration,
    restrict_to_bed_area: bool,
    recorder_failed: bool,
    clock: Clock,
}

impl<F: TransportFactory, D: Detector> FramePipeline<F, D> {
    /// Build every component from `settings` and open the stream.
    ///
    /// Configuration problems are reported before any connection attempt.
    /// A notification history of `notification_history` entries is attached
    /// next to `notifiers` and exposed through the returned handle.
    pub async fn start<S: SinkFactory>(
        settings: &MonitorSettings,
        factory: F,
        detector: D,
        sinks: S,
        mut notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Result<(Self, MonitorHandle), MonitorError> {
        settings.validate()?;
        let history = NotificationLog::new(settings.notification_history);
        notifiers.push(Arc::new(history.clone()));

        let behavior = BehaviorStateMachine::new(settings.behavior_config(), Instant::now())
            .map_err(|e| MonitorError::Configuration(e.to_string()))?;
        let selector = SubjectSelector::new(settings.selector_config());
        let alerts = AlertDispatcher::new(settings.alert_config(), notifiers)?;
        let recorder = RecordingRouter::new(settings.recording_config(), sinks)?;
        let connector = StreamConnector::open(
            factory,
            settings.stream_source(),
            settings.connector_config(),
        )
        .await?;

        let bed = BedLocator::new(BedLocatorConfig::default());
        let (cmd_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let initial = PipelineStatus {
            connection: connector.state(),
            behavior: behavior.summary().label,
            sleep_time: format_sleep_time(Duration::ZERO),
            fall_risk: false,
            sleep_detection_enabled: behavior.sleep_detection_enabled(),
            subject: selector.state().clone(),
            recording: recorder.status(),
            bed: bed.status(),
            stats: FrameStats::default(),
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let pipeline = Self {
            connector,
            detector: ConfidenceFilter::new(detector, settings.confidence_threshold),
            bed,
            selector,
            behavior,
            alerts,
            recorder,
            commands,
            status_tx,
            stats: FrameStats::default(),
            frame_interval: settings.frame_interval(),
            grace: settings.shutdown_grace(),
            restrict_to_bed_area: settings.restrict_to_bed_area,
            recorder_failed: false,
            clock: Box::new(Instant::now),
        };
        Ok((pipeline, MonitorHandle::new(cmd_tx, status_rx, history)))
    }

    /// Replace the time source used for behavior and alert timing
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Run until a shutdown command or a fatal stream error, then shut
    /// down the stream, the recorder and alert delivery in that order.
    pub async fn run(mut self) -> Result<(), MonitorError> {
        info!(
            interval_ms = self.frame_interval.as_millis() as u64,
            "Frame pipeline running"
        );

        let result = loop {
            let started = tokio::time::Instant::now();
            match self.step().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
            self.pace(started.elapsed()).await;
        };

        self.shutdown().await;
        result
    }

    /// Apply queued commands and process one frame
    pub(crate) async fn step(&mut self) -> Result<Flow, MonitorError> {
        while let Ok(cmd) = self.commands.try_recv() {
            if self.apply(cmd).await == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }

        match self.connector.next_frame().await {
            Ok(frame) => self.process(frame).await,
            Err(e) if e.is_transient() => self.skip(&e),
            Err(e) => {
                error!("Stream lost: {}", e);
                return Err(e.into());
            }
        }

        self.publish();
        Ok(Flow::Continue)
    }

    async fn pace(&mut self, elapsed: Duration) {
        if elapsed > self.stats.worst_frame_time {
            self.stats.worst_frame_time = elapsed;
        }
        if elapsed < self.frame_interval {
            tokio::time::sleep(self.frame_interval - elapsed).await;
        } else {
            self.stats.deadline_misses += 1;
            metrics::counter!("pipeline_deadline_misses_total").increment(1);
            debug!(elapsed_ms = elapsed.as_millis() as u64, "Frame over budget");
        }
    }

    async fn process(&mut self, frame: VideoFrame) {
        let now = (self.clock)();
        let frame_size = (frame.width, frame.height);

        let entities = match self.detector.detect(&frame) {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Detection failed, frame skipped: {}", e);
                self.count_skipped();
                self.behavior.freeze_clock();
                self.record(Arc::new(frame), None).await;
                return;
            }
        };

        let bed = self.bed.update(&entities, frame_size);
        let auto_area = if self.restrict_to_bed_area {
            self.bed.candidate_area(frame_size)
        } else {
            None
        };
        if let Some(event) = self.selector.update_within(&entities, auto_area.as_ref()) {
            self.raise_selection(&event, now);
        }

        self.behavior.set_subject(self.selector.state().track_id, now);
        let subject = self.selector.state().visible_bbox().copied();
        let zone = self.behavior.safe_zone_for(bed.as_ref());
        for event in self.behavior.observe(subject.as_ref(), zone.as_ref(), now) {
            self.raise_behavior(event, now);
        }

        let annotated = {
            let state = self.behavior.state();
            let scene = OverlayScene {
                bed: bed.as_ref(),
                safe_zone: zone.as_ref(),
                entities: &entities,
                subject: subject.as_ref(),
                fall_risk: state.fall_risk,
                asleep: state.state == Behavior::Asleep,
            };
            overlay::render(&frame, &scene).map(Arc::new)
        };

        self.stats.frames_processed += 1;
        metrics::counter!("pipeline_frames_processed_total").increment(1);
        self.record(Arc::new(frame), annotated).await;
    }

    fn skip(&mut self, e: &StreamError) {
        debug!("Frame skipped: {}", e);
        self.count_skipped();
        self.behavior.freeze_clock();
    }

    fn count_skipped(&mut self) {
        self.stats.frames_skipped += 1;
        metrics::counter!("pipeline_frames_skipped_total").increment(1);
    }

    async fn record(&mut self, raw: Arc<VideoFrame>, annotated: Option<Arc<VideoFrame>>) {
        match self.recorder.write(raw, annotated, Local::now().naive_local()).await {
            Ok(()) => self.recorder_failed = false,
            Err(e) => {
                if !self.recorder_failed {
                    error!("Recording unavailable: {}", e);
                }
                self.recorder_failed = true;
            }
        }
    }

    fn raise_behavior(&mut self, event: BehaviorEvent, now: Instant) {
        let alert = match event {
            BehaviorEvent::Sleep => Alert::new(
                AlertKind::Sleep,
                "Child asleep",
                format!(
                    "No movement for {}",
                    format_sleep_time(self.behavior.state().still_duration)
                ),
            ),
            BehaviorEvent::Wake => Alert::new(AlertKind::Wake, "Child awake", "Movement detected"),
            BehaviorEvent::FallRisk => Alert::new(
                AlertKind::Risk,
                "Fall risk",
                "Child is close to the edge of the bed",
            ),
        };
        let track_id = self.selector.state().track_id;
        self.alerts.dispatch(alert.with_metadata(json!({ "track_id": track_id })), now);
    }

    fn raise_selection(&mut self, event: &SelectionEvent, now: Instant) {
        let alert = match event {
            SelectionEvent::ManualBound { track_id } => Alert::new(
                AlertKind::Selection,
                "Subject selected",
                format!("Tracking person {track_id}"),
            )
            .with_metadata(json!({ "track_id": track_id })),
            SelectionEvent::PickMissed(_) => Alert::new(
                AlertKind::Selection,
                "Nothing selected",
                "No person at the selected position",
            ),
            SelectionEvent::FellBackToAuto { lost_track_id } => Alert::new(
                AlertKind::Selection,
                "Subject lost",
                format!("Person {lost_track_id} is no longer visible; selecting automatically"),
            )
            .with_metadata(json!({ "track_id": lost_track_id })),
            SelectionEvent::Cleared => Alert::new(
                AlertKind::Selection,
                "Selection cleared",
                "Selecting automatically",
            ),
        };
        self.alerts.dispatch(alert, now);
    }

    async fn apply(&mut self, cmd: MonitorCommand) -> Flow {
        let now = (self.clock)();
        debug!(?cmd, "Applying command");
        match cmd {
            MonitorCommand::SelectAt(point) => self.selector.pick(ManualPick::Point(point)),
            MonitorCommand::SelectTrack(id) => self.selector.pick(ManualPick::TrackId(id)),
            MonitorCommand::ClearSelection => {
                let event = self.selector.clear();
                self.behavior.reset(now);
                self.raise_selection(&event, now);
            }
            MonitorCommand::ToggleSleepDetection => {
                let enabled = !self.behavior.sleep_detection_enabled();
                self.behavior.set_sleep_detection(enabled, now);
            }
            MonitorCommand::ToggleRecordingMode => {
                if let Err(e) = self.recorder.toggle_mode().await {
                    warn!("Cannot switch recording mode: {}", e);
                }
            }
            MonitorCommand::TogglePause => {
                self.recorder.toggle_pause();
            }
            MonitorCommand::ResetBedCache => self.bed.reset(),
            MonitorCommand::Snapshot(reply) => {
                let saved = self.recorder.snapshot(Local::now().naive_local()).await;
                let _ = reply.send(saved);
            }
            MonitorCommand::Shutdown => {
                info!("Shutdown requested");
                return Flow::Stop;
            }
        }
        self.publish();
        Flow::Continue
    }

    fn status(&self) -> PipelineStatus {
        let summary = self.behavior.summary();
        PipelineStatus {
            connection: self.connector.state(),
            behavior: summary.label,
            sleep_time: format_sleep_time(summary.sleep_time),
            fall_risk: summary.fall_risk,
            sleep_detection_enabled: self.behavior.sleep_detection_enabled(),
            subject: self.selector.state().clone(),
            recording: self.recorder.status(),
            bed: self.bed.status(),
            stats: self.stats.clone(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    async fn shutdown(mut self) {
        info!("Pipeline shutting down");
        let started = tokio::time::Instant::now();

        if tokio::time::timeout(self.grace, self.connector.close()).await.is_err() {
            warn!("Stream did not close within {:?}", self.grace);
        }
        let segments = self
            .recorder
            .shutdown(self.grace.saturating_sub(started.elapsed()))
            .await;
        self.publish();

        self.alerts
            .shutdown(self.grace.saturating_sub(started.elapsed()))
            .await;
        info!(
            segments = segments.len(),
            frames = self.stats.frames_processed,
            skipped = self.stats.frames_skipped,
            "Pipeline stopped"
        );
    }
}
