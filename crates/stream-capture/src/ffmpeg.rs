//! ffmpeg-backed RTSP transport
//!
//! The source is probed with ffprobe for its geometry, then decoded by an
//! ffmpeg child process writing raw frames to stdout.

use crate::connector::{FrameTransport, TransportFactory};
use crate::frame::{PixelFormat, VideoFrame};
use crate::session::StreamSource;
use crate::StreamError;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// RTSP lower transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    #[default]
    Tcp,
    Udp,
}

impl RtspTransport {
    fn as_arg(self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract the first video stream's dimensions from ffprobe JSON output
fn parse_geometry(json: &str) -> Result<(u32, u32), StreamError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| StreamError::Probe(format!("invalid ffprobe output: {e}")))?;

    probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref().map_or(true, |t| t == "video"))
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        })
        .ok_or_else(|| StreamError::Probe("no video stream with known dimensions".into()))
}

/// Transport factory that decodes a stream through ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    transport: RtspTransport,
    format: PixelFormat,
    output_fps: Option<f64>,
}

impl FfmpegSource {
    pub fn new(
        ffmpeg_bin: impl Into<String>,
        ffprobe_bin: impl Into<String>,
        transport: RtspTransport,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            transport,
            format: PixelFormat::Rgb24,
            output_fps: None,
        }
    }

    /// Ask ffmpeg to resample the stream to a fixed rate
    pub fn with_output_fps(mut self, fps: f64) -> Self {
        self.output_fps = Some(fps);
        self
    }

    async fn probe_geometry(&self, source: &StreamSource) -> Result<(u32, u32), StreamError> {
        let output = Command::new(&self.ffprobe_bin)
            .args(["-v", "error", "-rtsp_transport", self.transport.as_arg()])
            .args(["-select_streams", "v:0", "-show_streams", "-print_format", "json"])
            .arg(source.uri())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StreamError::Connection {
                source_uri: source.redacted(),
                reason: format!("cannot run {}: {e}", self.ffprobe_bin),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .replace(source.uri(), &source.redacted());
            return Err(StreamError::Connection {
                source_uri: source.redacted(),
                reason: stderr.trim().to_string(),
            });
        }

        parse_geometry(&String::from_utf8_lossy(&output.stdout))
    }

    fn decoder_command(&self, source: &StreamSource) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-nostdin", "-loglevel", "error"])
            .args(["-rtsp_transport", self.transport.as_arg()])
            .arg("-i")
            .arg(source.uri())
            .args(["-an", "-f", "rawvideo", "-pix_fmt", self.format.ffmpeg_name()]);
        if let Some(fps) = self.output_fps {
            cmd.arg("-r").arg(format!("{fps}"));
        }
        cmd.arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl TransportFactory for FfmpegSource {
    type Transport = FfmpegTransport;

    async fn connect(&self, source: &StreamSource) -> Result<FfmpegTransport, StreamError> {
        let (width, height) = self.probe_geometry(source).await?;
        debug!(width, height, source = %source, "Probed stream geometry");

        let mut child = self
            .decoder_command(source)
            .spawn()
            .map_err(|e| StreamError::Connection {
                source_uri: source.redacted(),
                reason: format!("cannot run {}: {e}", self.ffmpeg_bin),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| StreamError::Connection {
            source_uri: source.redacted(),
            reason: "decoder has no stdout".into(),
        })?;

        info!(width, height, transport = ?self.transport, "Decoder started");
        Ok(FfmpegTransport::new(child, stdout, width, height, self.format))
    }
}

/// Raw frames read from an ffmpeg child process
pub struct FfmpegTransport {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer: Vec<u8>,
    filled: usize,
    sequence: u64,
    started: Instant,
}

impl FfmpegTransport {
    fn new(child: Child, stdout: ChildStdout, width: u32, height: u32, format: PixelFormat) -> Self {
        let frame_len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            child,
            stdout,
            width,
            height,
            format,
            buffer: vec![0; frame_len],
            filled: 0,
            sequence: 0,
            started: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameTransport for FfmpegTransport {
    async fn read_frame(&mut self) -> Result<VideoFrame, StreamError> {
        // `read` is cancel-safe and the fill offset lives on self, so a
        // timed-out call keeps its partial frame.
        while self.filled < self.buffer.len() {
            let n = self
                .stdout
                .read(&mut self.buffer[self.filled..])
                .await
                .map_err(|e| StreamError::Interrupted(e.to_string()))?;
            if n == 0 {
                return Err(StreamError::Interrupted("decoder stream ended".into()));
            }
            self.filled += n;
        }

        self.filled = 0;
        let frame_len = self.buffer.len();
        let data = std::mem::replace(&mut self.buffer, vec![0; frame_len]);
        self.sequence += 1;

        Ok(VideoFrame {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp_ns: self.started.elapsed().as_nanos() as u64,
            sequence: self.sequence,
        })
    }

    async fn close(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        debug!("Decoder stopped");
    }
}
