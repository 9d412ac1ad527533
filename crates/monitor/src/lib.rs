//! Cradle Monitor
//!
//! Wires the stream connector, detector adapter, subject selector,
//! behavior state machine, alert dispatcher and recording router into one
//! per-frame pipeline, and exposes a control handle for the outer layers.

pub mod handle;
pub mod logging;
pub mod overlay;
pub mod pipeline;
pub mod settings;

pub use handle::{MonitorCommand, MonitorHandle};
pub use logging::{init_logging, LogFormat};
pub use pipeline::{FrameStats, FramePipeline, PipelineStatus};
pub use settings::MonitorSettings;

use thiserror::Error;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Stream error: {0}")]
    Stream(#[from] stream_capture::StreamError),

    #[error("Alerting error: {0}")]
    Alert(#[from] alerting::AlertError),

    #[error("Recording error: {0}")]
    Recording(#[from] recording::RecordingError),

    #[error("Pipeline is not running")]
    PipelineStopped,
}
