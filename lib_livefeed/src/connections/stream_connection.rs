//! # Stream Connection
//!
//! One supervised subscription per `Location`.
//!
//! ## Lifecycle:
//! - **Connecting**: the first socket is being opened. An open attempt that
//!   does not finish within `heartbeat_timeout` counts as a lost socket.
//! - **Open**: frames flow; every data or heartbeat frame re-arms the
//!   staleness watchdog.
//! - **Reconnecting**: the socket was lost (error, remote close or a silent
//!   watchdog window). After `reconnect_delay` a fresh socket is opened and
//!   the epoch is bumped. Nothing the old socket still delivers is accepted.
//! - **Closed**: closed by the caller, or given up (one-shot mode, invalid
//!   URL). Terminal.
//!
//! Callbacks run on the connection's supervisor task, never concurrently
//! with each other. `close()` waits for a callback in flight and guarantees
//! none fires afterwards.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connections::error::ConnectionError;
use crate::connections::transport::{Frame, FrameStream, Transport};
use crate::connections::url_factory::UrlFactory;
use crate::models::{Location, RawPayload};

/// Reconnect and staleness policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Max silence (no data, no heartbeat) before the socket is considered dead.
    pub heartbeat_timeout: Duration,
    /// Pause between losing a socket and opening the next one.
    pub reconnect_delay: Duration,
    /// `false` makes the first socket loss terminal.
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(3),
            auto_reconnect: true,
        }
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Opening the first socket.
    Connecting,
    /// A socket is open and live.
    Open,
    /// Waiting to open a replacement socket.
    Reconnecting,
    /// Closed for good.
    Closed,
}

/// Receives what one connection delivers.
pub trait StreamHandler<T>: Send + 'static {
    /// A decoded `Results` batch from the current socket.
    fn on_data(&mut self, batch: Vec<T>);

    /// The server proved liveness without data.
    fn on_heartbeat(&mut self) {}

    /// The connection gave up. Fires at most once and is the last callback.
    fn on_terminal_error(&mut self, _error: ConnectionError) {}

    /// Lifecycle transition, tagged with the epoch current at that moment.
    fn on_state_change(&mut self, _state: ConnectionState, _epoch: u64) {}
}

type DataFn<T> = Box<dyn FnMut(Vec<T>) + Send>;
type HeartbeatFn = Box<dyn FnMut() + Send>;
type TerminalFn = Box<dyn FnMut(ConnectionError) + Send>;

/// Closure-based `StreamHandler`.
pub struct Callbacks<T> {
    on_data: DataFn<T>,
    on_heartbeat: Option<HeartbeatFn>,
    on_terminal_error: Option<TerminalFn>,
}

impl<T: 'static> Callbacks<T> {
    /// Handler that only consumes data.
    pub fn new(on_data: impl FnMut(Vec<T>) + Send + 'static) -> Self {
        Self {
            on_data: Box::new(on_data),
            on_heartbeat: None,
            on_terminal_error: None,
        }
    }

    /// Adds a heartbeat callback.
    pub fn on_heartbeat(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_heartbeat = Some(Box::new(f));
        self
    }

    /// Adds a terminal error callback.
    pub fn on_terminal_error(mut self, f: impl FnMut(ConnectionError) + Send + 'static) -> Self {
        self.on_terminal_error = Some(Box::new(f));
        self
    }
}

impl<T: Send + 'static> StreamHandler<T> for Callbacks<T> {
    fn on_data(&mut self, batch: Vec<T>) {
        (self.on_data)(batch)
    }

    fn on_heartbeat(&mut self) {
        if let Some(f) = self.on_heartbeat.as_mut() {
            f()
        }
    }

    fn on_terminal_error(&mut self, error: ConnectionError) {
        if let Some(f) = self.on_terminal_error.as_mut() {
            f(error)
        }
    }
}

/// Opens supervised subscriptions over one transport, URL factory and policy.
#[derive(Clone)]
pub struct StreamConnection {
    transport: Arc<dyn Transport>,
    urls: Arc<dyn UrlFactory>,
    config: ConnectionConfig,
}

impl StreamConnection {
    /// Creates the factory.
    pub fn new(transport: impl Transport, urls: impl UrlFactory, config: ConnectionConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            urls: Arc::new(urls),
            config,
        }
    }

    /// The policy every opened connection follows.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a subscription for `location` and returns immediately.
    ///
    /// Must be called within a tokio runtime. Dropping the returned handle
    /// closes the connection.
    pub fn open<T, H>(&self, location: Location, handler: H) -> ConnectionHandle
    where
        T: DeserializeOwned + Send + 'static,
        H: StreamHandler<T>,
    {
        let handler: Box<dyn StreamHandler<T>> = Box::new(handler);
        let shared = Arc::new(Shared {
            location,
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Connecting),
            cancel: CancellationToken::new(),
            handler: ReentrantMutex::new(RefCell::new(handler)),
        });

        tokio::spawn(supervise(
            shared.clone(),
            self.transport.clone(),
            self.urls.clone(),
            self.config.clone(),
        ));

        ConnectionHandle { control: shared }
    }
}

/// Owner of one open subscription.
pub struct ConnectionHandle {
    control: Arc<dyn Control>,
}

impl ConnectionHandle {
    /// Stops the connection. Idempotent; no callback fires after it returns.
    pub fn close(&self) {
        self.control.close()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }

    /// Number of successful reconnects so far.
    pub fn epoch(&self) -> u64 {
        self.control.epoch()
    }

    /// The subscribed location.
    pub fn location(&self) -> &Location {
        self.control.location()
    }

    /// `true` once closed or given up.
    pub fn is_closed(&self) -> bool {
        self.control.state() == ConnectionState::Closed
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("location", self.location())
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.control.close();
    }
}

trait Control: Send + Sync {
    fn close(&self);
    fn state(&self) -> ConnectionState;
    fn epoch(&self) -> u64;
    fn location(&self) -> &Location;
}

struct Shared<T> {
    location: Location,
    epoch: AtomicU64,
    closed: AtomicBool,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
    // Held for the whole of every callback; re-entrant so a handler may
    // close its own connection.
    handler: ReentrantMutex<RefCell<Box<dyn StreamHandler<T>>>>,
}

impl<T: 'static> Shared<T> {
    /// Runs `f` against the handler unless the connection is closed or
    /// `epoch` has been superseded.
    fn deliver(&self, epoch: u64, f: impl FnOnce(&mut dyn StreamHandler<T>)) -> bool {
        let gate = self.handler.lock();
        if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        let Ok(mut handler) = gate.try_borrow_mut() else {
            return false;
        };
        f(&mut **handler);
        true
    }

    fn set_state(&self, state: ConnectionState, epoch: u64) {
        // Under the gate, so a concurrent `close()` always writes last.
        let _gate = self.handler.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = state;
        self.deliver(epoch, |h| h.on_state_change(state, epoch));
    }

    fn dispatch_text(&self, epoch: u64, text: &str)
    where
        T: DeserializeOwned,
    {
        match RawPayload::<T>::decode(text) {
            Ok(RawPayload::Heartbeat) => {
                self.deliver(epoch, |h| h.on_heartbeat());
            }
            Ok(RawPayload::Results(batch)) => {
                trace!(location = %self.location, epoch, items = batch.len(), "data");
                self.deliver(epoch, move |h| h.on_data(batch));
            }
            Err(e) => {
                warn!(location = %self.location, epoch, error = %e, "dropping undecodable payload");
            }
        }
    }

    /// Gives up: the Closed transition, then one terminal error as the
    /// last callback.
    fn fail(&self, error: ConnectionError) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        error!(location = %self.location, epoch, error = %error, "stream connection failed");
        let gate = self.handler.lock();
        self.set_state(ConnectionState::Closed, epoch);
        self.deliver(epoch, |h| h.on_terminal_error(error));
        self.closed.store(true, Ordering::SeqCst);
        drop(gate);
    }
}

impl<T: 'static> Control for Shared<T> {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        // Waits out a callback running on another thread.
        let _gate = self.handler.lock();
        *self.state.lock() = ConnectionState::Closed;
        debug!(location = %self.location, "stream connection closed");
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn location(&self) -> &Location {
        &self.location
    }
}

enum Inbound {
    Frame(Frame),
    Lost(ConnectionError),
}

async fn supervise<T>(
    shared: Arc<Shared<T>>,
    transport: Arc<dyn Transport>,
    urls: Arc<dyn UrlFactory>,
    config: ConnectionConfig,
) where
    T: DeserializeOwned + Send + 'static,
{
    let cancel = shared.cancel.clone();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<(u64, Inbound)>();
    let mut opened_once = false;
    let mut attempt: u32 = 0;

    shared.set_state(ConnectionState::Connecting, 0);

    loop {
        let url = match urls.build(&shared.location) {
            Ok(url) => url,
            Err(e) => {
                shared.fail(e);
                return;
            }
        };

        info!(location = %shared.location, %url, attempt, "connecting");
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = timeout(config.heartbeat_timeout, transport.connect(url)) => {
                result.unwrap_or(Err(ConnectionError::StalenessTimeout(config.heartbeat_timeout)))
            }
        };

        let lost = match connected {
            Ok(stream) => {
                let epoch = if opened_once {
                    shared.epoch.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    shared.epoch.load(Ordering::SeqCst)
                };
                opened_once = true;
                attempt = 0;
                shared.set_state(ConnectionState::Open, epoch);
                info!(location = %shared.location, epoch, "stream open");

                let socket_cancel = cancel.child_token();
                tokio::spawn(read_frames(stream, epoch, frame_tx.clone(), socket_cancel.clone()));
                let lost = pump(&shared, epoch, &mut frame_rx, &config, &cancel).await;
                socket_cancel.cancel();

                match lost {
                    Some(e) => e,
                    None => return,
                }
            }
            Err(e) => e,
        };

        if !config.auto_reconnect {
            shared.fail(lost);
            return;
        }

        attempt = attempt.saturating_add(1);
        warn!(
            location = %shared.location,
            error = %lost,
            attempt,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "stream lost, reconnecting"
        );
        shared.set_state(ConnectionState::Reconnecting, shared.epoch.load(Ordering::SeqCst));

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(config.reconnect_delay) => {}
        }
    }
}

/// Drives the watchdog for one socket. Returns why the socket was lost, or
/// `None` when the connection was closed.
async fn pump<T>(
    shared: &Shared<T>,
    epoch: u64,
    frames: &mut mpsc::UnboundedReceiver<(u64, Inbound)>,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
) -> Option<ConnectionError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut deadline = Instant::now() + config.heartbeat_timeout;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = sleep_until(deadline) => {
                warn!(
                    location = %shared.location,
                    epoch,
                    timeout_ms = config.heartbeat_timeout.as_millis() as u64,
                    "no data or heartbeat within window"
                );
                return Some(ConnectionError::StalenessTimeout(config.heartbeat_timeout));
            }
            inbound = frames.recv() => {
                let Some((frame_epoch, inbound)) = inbound else {
                    return Some(ConnectionError::Transport("frame channel closed".to_string()));
                };
                if frame_epoch != epoch {
                    trace!(location = %shared.location, frame_epoch, epoch, "dropping frame from superseded socket");
                    continue;
                }

                match inbound {
                    Inbound::Frame(Frame::Text(text)) => {
                        deadline = Instant::now() + config.heartbeat_timeout;
                        shared.dispatch_text(epoch, &text);
                    }
                    Inbound::Frame(Frame::Ping) => {
                        deadline = Instant::now() + config.heartbeat_timeout;
                        shared.deliver(epoch, |h| h.on_heartbeat());
                    }
                    Inbound::Frame(Frame::Close) => {
                        return Some(ConnectionError::Transport("closed by remote host".to_string()));
                    }
                    Inbound::Lost(e) => return Some(e),
                }
            }
        }
    }
}

async fn read_frames(
    mut stream: FrameStream,
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, Inbound)>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        let inbound = match next {
            Some(Ok(Frame::Close)) => Inbound::Lost(ConnectionError::Transport("closed by remote host".to_string())),
            Some(Ok(frame)) => Inbound::Frame(frame),
            Some(Err(e)) => Inbound::Lost(e),
            None => Inbound::Lost(ConnectionError::Transport("stream ended".to_string())),
        };
        let lost = matches!(inbound, Inbound::Lost(_));

        if tx.send((epoch, inbound)).is_err() || lost {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::memory::ChannelTransport;
    use futures_util::future::BoxFuture;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Tick {
        value: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Data(Vec<i64>),
        Heartbeat,
        Terminal(ConnectionError),
        State(ConnectionState, u64),
    }

    struct Recorder(mpsc::UnboundedSender<Event>);

    impl StreamHandler<Tick> for Recorder {
        fn on_data(&mut self, batch: Vec<Tick>) {
            let _ = self.0.send(Event::Data(batch.into_iter().map(|t| t.value).collect()));
        }
        fn on_heartbeat(&mut self) {
            let _ = self.0.send(Event::Heartbeat);
        }
        fn on_terminal_error(&mut self, error: ConnectionError) {
            let _ = self.0.send(Event::Terminal(error));
        }
        fn on_state_change(&mut self, state: ConnectionState, epoch: u64) {
            let _ = self.0.send(Event::State(state, epoch));
        }
    }

    fn fixed_url(location: &Location) -> Result<Url, ConnectionError> {
        Url::parse(&format!("ws://feed.test/{location}")).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))
    }

    fn config(auto_reconnect: bool) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(3),
            auto_reconnect,
        }
    }

    async fn next_non_state(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        loop {
            match rx.recv().await {
                Some(Event::State(..)) => continue,
                Some(event) => return event,
                None => panic!("handler dropped"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_data_and_heartbeats_in_order() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("A"), Recorder(tx));

        let socket = sockets.recv().await.unwrap();
        assert_eq!(socket.url.as_str(), "ws://feed.test/A");
        socket.send_text(r#"{"Results":[{"Value":1},{"Value":2}]}"#);
        socket.send_text("");
        socket.send_ping();
        socket.send_text("not json");
        socket.send_text(r#"{"Results":[{"Value":3}]}"#);

        assert_eq!(next_non_state(&mut events).await, Event::Data(vec![1, 2]));
        assert_eq!(next_non_state(&mut events).await, Event::Heartbeat);
        assert_eq!(next_non_state(&mut events).await, Event::Heartbeat);
        assert_eq!(next_non_state(&mut events).await, Event::Data(vec![3]));
        assert_eq!(handle.state(), ConnectionState::Open);
        assert_eq!(handle.epoch(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_triggers_reconnect_with_new_epoch() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::shard("B", 1), Recorder(tx));

        let first = sockets.recv().await.unwrap();
        let opened_at = Instant::now();
        let second = sockets.recv().await.unwrap();
        // 15s watchdog + 3s reconnect delay
        assert!(Instant::now() - opened_at >= Duration::from_secs(18));
        assert_eq!(handle.epoch(), 1);

        // Late frame from the abandoned socket is ignored.
        first.send_text(r#"{"Results":[{"Value":99}]}"#);
        second.send_text(r#"{"Results":[{"Value":7}]}"#);
        assert_eq!(next_non_state(&mut events).await, Event::Data(vec![7]));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_mode_reports_terminal_error_once() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(false));
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("C"), Recorder(tx));

        let socket = sockets.recv().await.unwrap();
        socket.send_close();

        match next_non_state(&mut events).await {
            Event::Terminal(ConnectionError::Transport(_)) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(handle.is_closed());
        assert!(sockets.try_recv().is_err());
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, Event::Terminal(_)), "terminal error fired twice");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connects_are_retried() {
        let (transport, mut sockets) = ChannelTransport::new();
        transport.refuse_next(2);
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (tx, _events) = mpsc::unbounded_channel();
        let started = Instant::now();
        let handle = connector.open(Location::node("A"), Recorder(tx));

        let _socket = sockets.recv().await.unwrap();
        assert!(Instant::now() - started >= Duration::from_secs(6));
        assert_eq!(handle.epoch(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_silences_callbacks_and_is_idempotent() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("A"), Recorder(tx));

        let socket = sockets.recv().await.unwrap();
        handle.close();
        handle.close();
        assert!(handle.is_closed());

        socket.send_text(r#"{"Results":[{"Value":1}]}"#);
        tokio::time::sleep(Duration::from_secs(60)).await;

        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, Event::State(..)), "callback after close: {event:?}");
        }
        assert!(sockets.try_recv().is_err());
        assert!(socket.is_client_gone());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_url_is_terminal() {
        let (transport, _sockets) = ChannelTransport::new();
        let broken = |_: &Location| -> Result<Url, ConnectionError> { Err(ConnectionError::InvalidUrl("nope".to_string())) };
        let connector = StreamConnection::new(transport, broken, config(true));
        let (tx, mut events) = mpsc::unbounded_channel();
        let _handle = connector.open(Location::node("A"), Recorder(tx));

        assert_eq!(
            next_non_state(&mut events).await,
            Event::Terminal(ConnectionError::InvalidUrl("nope".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_the_last_callback() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(false));
        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("C"), Recorder(tx));

        let socket = sockets.recv().await.unwrap();
        socket.send_close();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                Event::State(ConnectionState::Connecting, 0),
                Event::State(ConnectionState::Open, 0),
                Event::State(ConnectionState::Closed, 0),
                Event::Terminal(ConnectionError::Transport("closed by remote host".to_string())),
            ]
        );
        assert!(handle.is_closed());
    }

    struct Blackhole(Arc<AtomicUsize>);

    impl Transport for Blackhole {
        fn connect(&self, _url: Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(futures_util::future::pending::<Result<FrameStream, ConnectionError>>())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_open_times_out_and_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = StreamConnection::new(Blackhole(attempts.clone()), fixed_url, config(true));
        let (tx, _events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("A"), Recorder(tx));

        // Opens at 0s, 18s and 36s: 15s open timeout + 3s delay each.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handle.state(), ConnectionState::Reconnecting);
        assert_eq!(handle.epoch(), 0);

        let one_shot = StreamConnection::new(Blackhole(Arc::new(AtomicUsize::new(0))), fixed_url, config(false));
        let (tx, mut events) = mpsc::unbounded_channel();
        let _handle = one_shot.open(Location::node("B"), Recorder(tx));
        assert_eq!(
            next_non_state(&mut events).await,
            Event::Terminal(ConnectionError::StalenessTimeout(Duration::from_secs(15)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_alone_keep_the_socket_alive() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (tx, _events) = mpsc::unbounded_channel();
        let handle = connector.open(Location::node("A"), Recorder(tx));
        let socket = sockets.recv().await.unwrap();

        for beat in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            if beat % 2 == 0 {
                assert!(socket.send_ping());
            } else {
                assert!(socket.send_text("{}"));
            }
        }

        assert!(sockets.try_recv().is_err());
        assert_eq!(handle.epoch(), 0);
        assert_eq!(handle.state(), ConnectionState::Open);
    }

    struct Slow {
        entered: mpsc::UnboundedSender<()>,
        finished: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl StreamHandler<Tick> for Slow {
        fn on_data(&mut self, _batch: Vec<Tick>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            std::thread::sleep(Duration::from_millis(200));
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_waits_for_a_callback_in_flight() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(true));
        let (entered, mut entered_rx) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = connector.open(
            Location::node("A"),
            Slow {
                entered,
                finished: finished.clone(),
                calls: calls.clone(),
            },
        );

        let socket = sockets.recv().await.unwrap();
        socket.send_text(r#"{"Results":[{"Value":1}]}"#);
        entered_rx.recv().await.unwrap();

        handle.close();
        assert!(finished.load(Ordering::SeqCst), "close returned while a callback was running");
        assert_eq!(handle.state(), ConnectionState::Closed);

        socket.send_text(r#"{"Results":[{"Value":2}]}"#);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closure_callbacks_see_data_heartbeats_and_the_final_error() {
        let (transport, mut sockets) = ChannelTransport::new();
        let connector = StreamConnection::new(transport, fixed_url, config(false));
        let (tx, mut events) = mpsc::unbounded_channel();
        let (data_tx, beat_tx, error_tx) = (tx.clone(), tx.clone(), tx);
        let _handle = connector.open(
            Location::node("A"),
            Callbacks::new(move |batch: Vec<Tick>| {
                let _ = data_tx.send(Event::Data(batch.into_iter().map(|t| t.value).collect()));
            })
            .on_heartbeat(move || {
                let _ = beat_tx.send(Event::Heartbeat);
            })
            .on_terminal_error(move |error| {
                let _ = error_tx.send(Event::Terminal(error));
            }),
        );

        let socket = sockets.recv().await.unwrap();
        socket.send_text(r#"{"Results":[{"Value":4}]}"#);
        socket.send_ping();
        socket.fail("connection reset");

        assert_eq!(events.recv().await, Some(Event::Data(vec![4])));
        assert_eq!(events.recv().await, Some(Event::Heartbeat));
        assert_eq!(
            events.recv().await,
            Some(Event::Terminal(ConnectionError::Transport("connection reset".to_string())))
        );
    }
}
