//! Cradle Monitor - Main Entry Point
//!
//! Usage: `cradle-monitor [CONFIG]`. Settings are read from `CONFIG` (or
//! `config/monitor.toml` when present) and `MONITOR_*` environment variables.

use alerting::{LogNotifier, Notifier};
use anyhow::Context;
use monitor::{init_logging, FramePipeline, MonitorSettings};
use recording::FfmpegSinkFactory;
use std::path::PathBuf;
use std::sync::Arc;
use stream_capture::FfmpegSource;
use subject_tracking::NoopDetector;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = MonitorSettings::load(config_path.as_deref())
        .with_context(|| match &config_path {
            Some(p) => format!("loading settings from {}", p.display()),
            None => "loading settings".to_string(),
        })?;

    init_logging(&settings.log_level, settings.log_format)?;

    info!("=== Cradle Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        source = %settings.stream_source(),
        fps = settings.target_fps,
        recordings = %settings.recording_config().recordings_dir.display(),
        "Starting monitor..."
    );

    let source = FfmpegSource::new(
        settings.ffmpeg_bin.clone(),
        settings.ffprobe_bin.clone(),
        settings.rtsp_transport,
    )
    .with_output_fps(settings.target_fps);
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];

    let (pipeline, handle) = FramePipeline::start(
        &settings,
        source,
        NoopDetector::new(),
        FfmpegSinkFactory::new(settings.ffmpeg_bin.clone()),
        notifiers,
    )
    .await
    .context("starting frame pipeline")?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        info!("Interrupt received");
        let _ = handle.shutdown().await;
    });

    pipeline.run().await.context("frame pipeline stopped")?;
    info!("Monitor stopped");
    Ok(())
}
