//! Stream connector: session lifecycle, failure counting and reconnect
//!
//! The connector owns the transport. Reads are bounded by the frame
//! timeout; consecutive failures past `max_failures` mark the session
//! `Failed` and hand the stale transport to a background task that closes
//! it and retries with exponential backoff. The new transport is handed
//! back through a oneshot channel and installed on the next read, so the
//! caller never sees a half-built session.

use crate::frame::VideoFrame;
use crate::session::{ConnectionState, StreamSession, StreamSource};
use crate::{BackoffPolicy, ConnectorConfig, StreamError};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// An established stream that yields decoded frames
pub trait FrameTransport: Send + 'static {
    /// Read the next frame. Must be cancel-safe: the connector wraps it in a timeout.
    fn read_frame(&mut self) -> impl Future<Output = Result<VideoFrame, StreamError>> + Send;

    /// Release the underlying resources
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates transports for a source
pub trait TransportFactory: Clone + Send + Sync + 'static {
    type Transport: FrameTransport;

    fn connect(
        &self,
        source: &StreamSource,
    ) -> impl Future<Output = Result<Self::Transport, StreamError>> + Send;
}

type Handoff<T> = oneshot::Receiver<Result<T, StreamError>>;

/// Stream connector owning one session
pub struct StreamConnector<F: TransportFactory> {
    factory: F,
    config: ConnectorConfig,
    session: StreamSession,
    transport: Option<F::Transport>,
    pending: Option<Handoff<F::Transport>>,
    reconnect_task: Option<JoinHandle<()>>,
    exhausted: Option<u32>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<F: TransportFactory> StreamConnector<F> {
    /// Establish a session, failing if the transport is not up within `open_timeout`
    pub async fn open(
        factory: F,
        source: StreamSource,
        config: ConnectorConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let mut connector = Self {
            factory,
            config,
            session: StreamSession::new(source),
            transport: None,
            pending: None,
            reconnect_task: None,
            exhausted: None,
            state_tx,
        };

        connector.set_state(ConnectionState::Connecting);
        info!(
            session = %connector.session.id,
            source = %connector.session.source,
            "Opening stream"
        );

        match connect_once(
            &connector.factory,
            &connector.session.source,
            connector.config.open_timeout,
        )
        .await
        {
            Ok(transport) => {
                connector.install(transport);
                Ok(connector)
            }
            Err(e) => {
                connector.set_state(ConnectionState::Failed);
                error!(source = %connector.session.source, "Cannot open stream: {}", e);
                Err(e)
            }
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Interrupted` for a missed frame or while a reconnect is in
    /// flight, and `ReconnectExhausted` once reconnecting has given up.
    pub async fn next_frame(&mut self) -> Result<VideoFrame, StreamError> {
        self.poll_handoff()?;

        let Some(transport) = self.transport.as_mut() else {
            return Err(StreamError::Interrupted("no transport".into()));
        };

        let frame_timeout = self.config.frame_timeout;
        let result = match timeout(frame_timeout, transport.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Interrupted(format!(
                "no frame within {frame_timeout:?}"
            ))),
        };

        match result {
            Ok(frame) => {
                self.session.consecutive_failures = 0;
                self.session.last_frame_at = Some(Instant::now());
                Ok(frame)
            }
            Err(e) => {
                let reason = match e {
                    StreamError::Interrupted(reason) => reason,
                    other => other.to_string(),
                };
                self.record_failure(&reason);
                Err(StreamError::Interrupted(reason))
            }
        }
    }

    /// Close the session and release the transport
    pub async fn close(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        self.pending = None;

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!(session = %self.session.id, "Stream closed");
    }

    /// Current session
    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// Observe connection-state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Whether a background reconnect is in flight
    pub fn reconnect_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.session.state != state {
            debug!(from = ?self.session.state, to = ?state, "Connection state change");
        }
        self.session.state = state;
        self.state_tx.send_replace(state);
    }

    fn install(&mut self, transport: F::Transport) {
        self.transport = Some(transport);
        self.session.consecutive_failures = 0;
        self.session.connections += 1;
        self.exhausted = None;
        self.set_state(ConnectionState::Connected);
        info!(
            session = %self.session.id,
            connections = self.session.connections,
            "Stream connected"
        );
    }

    fn poll_handoff(&mut self) -> Result<(), StreamError> {
        let Some(handoff) = self.pending.as_mut() else {
            return match self.exhausted {
                Some(attempts) => Err(StreamError::ReconnectExhausted { attempts }),
                None => Ok(()),
            };
        };

        match handoff.try_recv() {
            Ok(Ok(transport)) => {
                self.pending = None;
                self.reconnect_task = None;
                self.install(transport);
                Ok(())
            }
            Ok(Err(e)) => {
                self.pending = None;
                self.reconnect_task = None;
                self.exhausted = Some(self.config.backoff.max_attempts);
                Err(e)
            }
            Err(TryRecvError::Empty) => Err(StreamError::Interrupted("reconnect in progress".into())),
            Err(TryRecvError::Closed) => {
                self.pending = None;
                self.reconnect_task = None;
                let attempts = self.config.backoff.max_attempts;
                self.exhausted = Some(attempts);
                Err(StreamError::ReconnectExhausted { attempts })
            }
        }
    }

    fn record_failure(&mut self, reason: &str) {
        self.session.consecutive_failures += 1;
        metrics::counter!("stream_read_failures_total").increment(1);

        let failures = self.session.consecutive_failures;
        if failures < self.config.max_failures {
            debug!(failures, reason, "Frame read failed");
            return;
        }

        warn!(
            failures,
            reason, "Too many consecutive failures, scheduling reconnect"
        );
        self.set_state(ConnectionState::Failed);
        let stale = self.transport.take();
        self.schedule_reconnect(stale);
    }

    fn schedule_reconnect(&mut self, stale: Option<F::Transport>) {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(reconnect_loop(
            self.factory.clone(),
            self.session.source.clone(),
            self.config.backoff.clone(),
            self.config.open_timeout,
            stale,
            tx,
        ));
        self.pending = Some(rx);
        self.reconnect_task = Some(task);
    }
}

impl<F: TransportFactory> Drop for StreamConnector<F> {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

async fn connect_once<F: TransportFactory>(
    factory: &F,
    source: &StreamSource,
    open_timeout: Duration,
) -> Result<F::Transport, StreamError> {
    match timeout(open_timeout, factory.connect(source)).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::ConnectTimeout(source.redacted(), open_timeout)),
    }
}

async fn reconnect_loop<F: TransportFactory>(
    factory: F,
    source: StreamSource,
    backoff: BackoffPolicy,
    open_timeout: Duration,
    stale: Option<F::Transport>,
    handoff: oneshot::Sender<Result<F::Transport, StreamError>>,
) {
    if let Some(mut stale) = stale {
        stale.close().await;
    }

    for attempt in 0..backoff.max_attempts {
        metrics::counter!("stream_reconnect_attempts_total").increment(1);
        info!(
            attempt = attempt + 1,
            max_attempts = backoff.max_attempts,
            source = %source,
            "Attempting reconnect"
        );

        match connect_once(&factory, &source, open_timeout).await {
            Ok(transport) => {
                // Receiver gone means the connector was closed meanwhile
                if let Err(Ok(mut orphan)) = handoff.send(Ok(transport)) {
                    orphan.close().await;
                }
                return;
            }
            Err(e) => {
                let delay = backoff.delay_for(attempt);
                warn!(attempt = attempt + 1, "Reconnect failed: {}; retrying in {:?}", e, delay);
                if attempt + 1 < backoff.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    error!(
        source = %source,
        host = source.host().unwrap_or("unknown"),
        "Cannot reach camera after {} attempts; check address, credentials, network and power",
        backoff.max_attempts
    );
    let _ = handoff.send(Err(StreamError::ReconnectExhausted {
        attempts: backoff.max_attempts,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    enum Step {
        Frame,
        Fail,
        Hang,
    }

    struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Step>>>,
        sequence: u64,
    }

    impl FrameTransport for ScriptedTransport {
        async fn read_frame(&mut self) -> Result<VideoFrame, StreamError> {
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Frame);
            match step {
                Step::Frame => {
                    self.sequence += 1;
                    let mut frame = VideoFrame::filled(4, 4, [0, 0, 0]);
                    frame.sequence = self.sequence;
                    Ok(frame)
                }
                Step::Fail => Err(StreamError::Interrupted("scripted failure".into())),
                Step::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn close(&mut self) {}
    }

    #[derive(Clone)]
    struct ScriptedFactory {
        script: Arc<Mutex<VecDeque<Step>>>,
        connects: Arc<AtomicU32>,
        failing_connects: Arc<AtomicU32>,
        hang_on_connect: bool,
    }

    impl ScriptedFactory {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.into())),
                connects: Arc::new(AtomicU32::new(0)),
                failing_connects: Arc::new(AtomicU32::new(0)),
                hang_on_connect: false,
            }
        }

        fn fail_next_connects(&self, n: u32) {
            self.failing_connects.store(n, Ordering::SeqCst);
        }
    }

    impl TransportFactory for ScriptedFactory {
        type Transport = ScriptedTransport;

        async fn connect(&self, source: &StreamSource) -> Result<ScriptedTransport, StreamError> {
            if self.hang_on_connect {
                std::future::pending::<()>().await;
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(StreamError::Connection {
                    source_uri: source.redacted(),
                    reason: "refused".into(),
                });
            }
            Ok(ScriptedTransport {
                script: self.script.clone(),
                sequence: 0,
            })
        }
    }

    fn config(max_failures: u32, max_attempts: u32) -> ConnectorConfig {
        ConnectorConfig {
            open_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(2),
            max_failures,
            backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(8),
                max_attempts,
            },
        }
    }

    fn source() -> StreamSource {
        StreamSource::new("rtsp://user:pw@10.0.0.5:554/stream1")
    }

    #[tokio::test]
    async fn test_open_connects() {
        let factory = ScriptedFactory::new(vec![]);
        let connector = StreamConnector::open(factory.clone(), source(), config(4, 3))
            .await
            .unwrap();
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert_eq!(connector.session().connections, 1);
        assert_eq!(*connector.subscribe().borrow(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        let mut factory = ScriptedFactory::new(vec![]);
        factory.hang_on_connect = true;
        let result = StreamConnector::open(factory, source(), config(4, 3)).await;
        assert!(matches!(result, Err(StreamError::ConnectTimeout(_, _))));
    }

    #[tokio::test]
    async fn test_open_refused_is_connection_error() {
        let factory = ScriptedFactory::new(vec![]);
        factory.fail_next_connects(1);
        let result = StreamConnector::open(factory, source(), config(4, 3)).await;
        assert!(matches!(result, Err(StreamError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_failures_below_threshold_stay_connected() {
        let factory = ScriptedFactory::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Fail]);
        let mut connector = StreamConnector::open(factory, source(), config(4, 3))
            .await
            .unwrap();

        for _ in 0..3 {
            let err = connector.next_frame().await.unwrap_err();
            assert!(err.is_transient());
            assert_eq!(connector.state(), ConnectionState::Connected);
        }
        assert!(!connector.reconnect_pending());

        let err = connector.next_frame().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(connector.state(), ConnectionState::Failed);
        assert!(connector.reconnect_pending());
    }

    #[tokio::test]
    async fn test_frame_resets_failure_counter() {
        let factory = ScriptedFactory::new(vec![Step::Fail, Step::Fail, Step::Frame]);
        let mut connector = StreamConnector::open(factory, source(), config(4, 3))
            .await
            .unwrap();

        assert!(connector.next_frame().await.is_err());
        assert!(connector.next_frame().await.is_err());
        assert_eq!(connector.session().consecutive_failures, 2);

        connector.next_frame().await.unwrap();
        assert_eq!(connector.session().consecutive_failures, 0);
        assert!(connector.session().last_frame_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_counts_as_interruption() {
        let factory = ScriptedFactory::new(vec![Step::Hang]);
        let mut connector = StreamConnector::open(factory, source(), config(4, 3))
            .await
            .unwrap();

        let err = connector.next_frame().await.unwrap_err();
        assert!(matches!(err, StreamError::Interrupted(_)));
        assert_eq!(connector.session().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_hands_off_new_transport() {
        let factory = ScriptedFactory::new(vec![Step::Fail, Step::Fail]);
        let mut connector = StreamConnector::open(factory.clone(), source(), config(2, 5))
            .await
            .unwrap();
        factory.fail_next_connects(2);

        assert!(connector.next_frame().await.is_err());
        assert!(connector.next_frame().await.is_err());
        assert_eq!(connector.state(), ConnectionState::Failed);

        let mut frame = None;
        for _ in 0..100 {
            match connector.next_frame().await {
                Ok(f) => {
                    frame = Some(f);
                    break;
                }
                Err(e) => {
                    assert!(e.is_transient(), "unexpected error {e}");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }

        assert!(frame.is_some());
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert_eq!(connector.session().connections, 2);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_is_fatal() {
        let factory = ScriptedFactory::new(vec![Step::Fail]);
        let mut connector = StreamConnector::open(factory.clone(), source(), config(1, 3))
            .await
            .unwrap();
        factory.fail_next_connects(u32::MAX);

        assert!(connector.next_frame().await.unwrap_err().is_transient());

        let mut fatal = None;
        for _ in 0..200 {
            match connector.next_frame().await {
                Err(e) if !e.is_transient() => {
                    fatal = Some(e);
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(250)).await,
            }
        }

        assert!(matches!(
            fatal,
            Some(StreamError::ReconnectExhausted { attempts: 3 })
        ));
        assert_eq!(connector.state(), ConnectionState::Failed);
        assert!(matches!(
            connector.next_frame().await,
            Err(StreamError::ReconnectExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_disconnects() {
        let factory = ScriptedFactory::new(vec![]);
        let mut connector = StreamConnector::open(factory, source(), config(4, 3))
            .await
            .unwrap();
        let state = connector.subscribe();
        connector.close().await;
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}
