//! Notification collaborators

use crate::{Alert, AlertKind, NotifyError};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Delivers an alert somewhere. Called off the frame loop, possibly blocking.
pub trait Notifier: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log; used when no other transport is configured
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        info!(
            kind = %alert.kind,
            title = %alert.title,
            metadata = %alert.metadata,
            "{}", alert.message
        );
        Ok(())
    }
}

/// Entry kept in the notification history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEntry {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub raised_at: chrono::DateTime<chrono::Local>,
}

/// Bounded in-memory history of delivered alerts. Clones share the history.
#[derive(Clone)]
pub struct NotificationLog {
    entries: Arc<Mutex<VecDeque<NotificationEntry>>>,
    capacity: usize,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<NotificationEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Notifier for NotificationLog {
    fn name(&self) -> &str {
        "history"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| NotifyError::Transport("history lock poisoned".into()))?;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(NotificationEntry {
            kind: alert.kind,
            title: alert.title.clone(),
            message: alert.message.clone(),
            raised_at: alert.raised_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let log = NotificationLog::new(2);
        for i in 0..3 {
            log.notify(&Alert::new(AlertKind::Wake, "Awake", format!("wake {i}")))
                .unwrap();
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "wake 2");
        assert_eq!(recent[1].message, "wake 1");
    }

    #[test]
    fn test_clear_shared_between_clones() {
        let log = NotificationLog::new(5);
        let view = log.clone();
        log.notify(&Alert::new(AlertKind::Sleep, "Asleep", "zzz")).unwrap();
        assert_eq!(view.len(), 1);
        view.clear();
        assert!(log.is_empty());
    }
}
