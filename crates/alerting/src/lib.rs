//! Alerting System
//!
//! Turns behavior and selection transitions into notifications:
//! - Per-kind cooldown gate backed by a fixed table
//! - Fire-and-forget delivery on a background worker with a bounded timeout
//! - Notifiers: structured log, in-memory history

mod dispatcher;
mod notifier;

pub use dispatcher::{AlertDispatcher, AlertGate, AlertRecord, DispatchOutcome};
pub use notifier::{LogNotifier, NotificationEntry, NotificationLog, Notifier};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Alert configuration errors
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Invalid alert configuration: {0}")]
    Config(String),
}

/// Notification transport failures. Logged by the worker, never propagated.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification transport failed: {0}")]
    Transport(String),

    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Alert kinds, one cooldown record each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Sleep,
    Wake,
    Risk,
    Selection,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::Sleep,
        AlertKind::Wake,
        AlertKind::Risk,
        AlertKind::Selection,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            AlertKind::Sleep => 0,
            AlertKind::Wake => 1,
            AlertKind::Risk => 2,
            AlertKind::Selection => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Sleep => "sleep",
            AlertKind::Wake => "wake",
            AlertKind::Risk => "risk",
            AlertKind::Selection => "selection",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub raised_at: DateTime<Local>,
}

impl Alert {
    pub fn new(kind: AlertKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            metadata: serde_json::Value::Null,
            raised_at: Local::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Cooldowns and delivery bounds
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub sleep_cooldown: Duration,
    pub wake_cooldown: Duration,
    pub risk_cooldown: Duration,
    pub selection_cooldown: Duration,
    /// Bound on a single notifier call
    pub notify_timeout: Duration,
    /// Alerts waiting for the worker before new ones are dropped
    pub queue_capacity: usize,
}

impl AlertConfig {
    pub fn cooldown(&self, kind: AlertKind) -> Duration {
        match kind {
            AlertKind::Sleep => self.sleep_cooldown,
            AlertKind::Wake => self.wake_cooldown,
            AlertKind::Risk => self.risk_cooldown,
            AlertKind::Selection => self.selection_cooldown,
        }
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        if self.notify_timeout.is_zero() {
            return Err(AlertError::Config("notify timeout must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AlertError::Config("alert queue capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_order() {
        for (i, kind) in AlertKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_alert_serializes_kind() {
        let alert = Alert::new(AlertKind::Risk, "Fall risk", "near edge");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "RISK");
        assert_eq!(json["metadata"], serde_json::Value::Null);
    }
}
