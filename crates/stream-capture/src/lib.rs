//! Stream Capture Library for the Cradle Monitor
//!
//! Owns the camera transport and supplies decoded frames.
//! Supports:
//! - Bounded-time session establishment
//! - Per-frame read timeouts with consecutive-failure counting
//! - Background reconnect with exponential backoff and atomic hand-off
//! - ffmpeg-backed RTSP decoding

pub mod connector;
pub mod ffmpeg;
pub mod frame;
pub mod session;

pub use connector::{FrameTransport, StreamConnector, TransportFactory};
pub use ffmpeg::{FfmpegSource, FfmpegTransport, RtspTransport};
pub use frame::{PixelFormat, VideoFrame};
pub use session::{ConnectionState, StreamSession, StreamSource};

use std::time::Duration;
use thiserror::Error;

/// Stream error types
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to connect to {source_uri}: {reason}")]
    Connection { source_uri: String, reason: String },

    #[error("Connection to {0} timed out after {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Stream probe failed: {0}")]
    Probe(String),

    #[error("Invalid connector configuration: {0}")]
    Config(String),
}

impl StreamError {
    /// Transient errors are recovered by skipping the frame
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Interrupted(_))
    }
}

/// Exponential backoff for reconnect attempts
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Attempts before the session is declared lost
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bound on establishing a transport
    pub open_timeout: Duration,
    /// Bound on waiting for a single frame
    pub frame_timeout: Duration,
    /// Consecutive read failures before the session is marked failed
    pub max_failures: u32,
    /// Reconnect schedule
    pub backoff: BackoffPolicy,
}

impl ConnectorConfig {
    /// Reject values that would make the connector spin or never fail
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.open_timeout.is_zero() || self.frame_timeout.is_zero() {
            return Err(StreamError::Config("timeouts must be non-zero".into()));
        }
        if self.max_failures == 0 {
            return Err(StreamError::Config("max_failures must be at least 1".into()));
        }
        if self.backoff.max_attempts == 0 {
            return Err(StreamError::Config("reconnect attempts must be at least 1".into()));
        }
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(StreamError::Config(
                "max reconnect delay is below the initial delay".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_secs(6));
        assert_eq!(policy.delay_for(3), Duration::from_secs(24));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_only_interruption_is_transient() {
        assert!(StreamError::Interrupted("eof".into()).is_transient());
        assert!(!StreamError::ReconnectExhausted { attempts: 5 }.is_transient());
    }
}
