//! Alert Dispatcher Implementation

use crate::notifier::Notifier;
use crate::{Alert, AlertConfig, AlertError, AlertKind, NotifyError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cooldown state for one alert kind
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub kind: AlertKind,
    pub last_fired_at: Option<Instant>,
    pub cooldown: Duration,
    pub fired: u64,
    pub suppressed: u64,
}

/// Per-kind cooldown table
#[derive(Debug, Clone)]
pub struct AlertGate {
    records: [AlertRecord; 4],
}

impl AlertGate {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            records: AlertKind::ALL.map(|kind| AlertRecord {
                kind,
                last_fired_at: None,
                cooldown: config.cooldown(kind),
                fired: 0,
                suppressed: 0,
            }),
        }
    }

    /// Whether `kind` may fire at `now`
    pub fn is_open(&self, kind: AlertKind, now: Instant) -> bool {
        let record = &self.records[kind.index()];
        match record.last_fired_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= record.cooldown,
        }
    }

    fn mark_fired(&mut self, kind: AlertKind, now: Instant) {
        let record = &mut self.records[kind.index()];
        record.last_fired_at = Some(now);
        record.fired += 1;
    }

    fn mark_suppressed(&mut self, kind: AlertKind) {
        self.records[kind.index()].suppressed += 1;
    }

    pub fn record(&self, kind: AlertKind) -> &AlertRecord {
        &self.records[kind.index()]
    }
}

/// What `dispatch` did with an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued for delivery
    Fired,
    /// Inside the kind's cooldown
    Suppressed,
    /// Delivery queue full; the cooldown was not consumed
    Dropped,
}

/// Gates alerts by cooldown and hands them to a delivery worker
pub struct AlertDispatcher {
    gate: AlertGate,
    tx: mpsc::Sender<Alert>,
    worker: JoinHandle<()>,
}

impl AlertDispatcher {
    /// Must be called inside a tokio runtime
    pub fn new(config: AlertConfig, notifiers: Vec<Arc<dyn Notifier>>) -> Result<Self, AlertError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let names: Vec<&str> = notifiers.iter().map(|n| n.name()).collect();
        info!(notifiers = ?names, "Alert dispatcher started");

        let worker = tokio::spawn(delivery_worker(rx, notifiers, config.notify_timeout));
        Ok(Self {
            gate: AlertGate::new(&config),
            tx,
            worker,
        })
    }

    /// Fire `alert` unless its kind is cooling down. Never waits on delivery.
    pub fn dispatch(&mut self, alert: Alert, now: Instant) -> DispatchOutcome {
        let kind = alert.kind;
        if !self.gate.is_open(kind, now) {
            self.gate.mark_suppressed(kind);
            metrics::counter!("alerts_suppressed_total", "kind" => kind.as_str()).increment(1);
            debug!(%kind, "Alert suppressed: in cooldown period");
            return DispatchOutcome::Suppressed;
        }

        match self.tx.try_send(alert) {
            Ok(()) => {
                self.gate.mark_fired(kind, now);
                metrics::counter!("alerts_fired_total", "kind" => kind.as_str()).increment(1);
                info!(%kind, "Alert fired");
                DispatchOutcome::Fired
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                metrics::counter!("alerts_dropped_total", "kind" => kind.as_str()).increment(1);
                warn!(%kind, "Alert dropped: delivery queue unavailable");
                DispatchOutcome::Dropped
            }
        }
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    /// Stop accepting alerts and let the worker drain for at most `grace`
    pub async fn shutdown(self, grace: Duration) {
        let Self { tx, mut worker, .. } = self;
        drop(tx);
        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!("Alert delivery did not drain within {:?}", grace);
            worker.abort();
        }
    }
}

/// Delivers each alert to every notifier in turn.
///
/// A call that exceeds `notify_timeout` cannot be cancelled: its blocking
/// thread runs until `notify` returns. Each notifier holds a single permit
/// for the lifetime of that thread, so while a timed-out call is still
/// running, later alerts skip that notifier instead of stacking threads.
async fn delivery_worker(
    mut rx: mpsc::Receiver<Alert>,
    notifiers: Vec<Arc<dyn Notifier>>,
    notify_timeout: Duration,
) {
    let in_flight: Vec<Arc<Semaphore>> = notifiers.iter().map(|_| Arc::new(Semaphore::new(1))).collect();

    while let Some(alert) = rx.recv().await {
        let alert = Arc::new(alert);
        for (notifier, slot) in notifiers.iter().zip(&in_flight) {
            let Ok(permit) = Arc::clone(slot).try_acquire_owned() else {
                metrics::counter!("notifications_skipped_total").increment(1);
                warn!(
                    notifier = notifier.name(),
                    kind = %alert.kind,
                    "Notification skipped: previous call still running"
                );
                continue;
            };
            let call = {
                let notifier = Arc::clone(notifier);
                let alert = Arc::clone(&alert);
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    notifier.notify(&alert)
                })
            };

            match tokio::time::timeout(notify_timeout, call).await {
                Ok(Ok(Ok(()))) => {
                    debug!(notifier = notifier.name(), kind = %alert.kind, "Notification delivered");
                }
                Ok(Ok(Err(e))) => {
                    metrics::counter!("notification_failures_total").increment(1);
                    warn!(notifier = notifier.name(), "{}", e);
                }
                Ok(Err(e)) => {
                    metrics::counter!("notification_failures_total").increment(1);
                    warn!(notifier = notifier.name(), "Notifier panicked: {}", e);
                }
                Err(_) => {
                    metrics::counter!("notification_failures_total").increment(1);
                    let e = NotifyError::Timeout(notify_timeout);
                    warn!(notifier = notifier.name(), "{}", e);
                }
            }
        }
    }
    debug!("Alert delivery worker stopped");
}
