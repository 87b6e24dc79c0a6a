//! Book synchronization session.
//!
//! A session owns one [`Channel`] at a time and is the single writer of
//! its [`BookStore`]. It bootstraps every connection the same way:
//! buffer updates while a snapshot is fetched, replay the buffered updates
//! that are newer than the snapshot, then apply live updates one at a
//! time. A sequence gap or an undecodable update triggers a resync from a
//! fresh snapshot on the same connection; a transport failure triggers a
//! reconnect with exponential backoff.
//!
//! ```no_run
//! # async fn run() -> bitx_stream::Result<()> {
//! use bitx_stream::config::fetch_config;
//! use bitx_stream::session::SessionBuilder;
//! use bitx_stream::snapshot::RestSnapshotFetcher;
//! use bitx_stream::websocket::WsConnector;
//!
//! let config = fetch_config()?;
//! let connector = WsConnector::new(&config.stream_url, config.credentials.clone());
//! let snapshots = RestSnapshotFetcher::new(
//!     &config.api_url,
//!     config.credentials.clone(),
//!     config.snapshot_timeout(),
//! )?;
//!
//! let session = SessionBuilder::new(config)
//!     .on_update(|delta| println!("applied {}", delta.sequence))
//!     .spawn(connector, snapshots)?;
//!
//! tokio::signal::ctrl_c().await.ok();
//! session.shutdown().await
//! # }
//! ```

mod backoff;
mod state;
mod stats;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use backoff::Backoff;
pub use state::SessionState;
pub use stats::{SessionStats, StatsSnapshot};

use crate::Result;
use crate::book::{ApplyOutcome, BookDelta, BookStore, BookView, OrderBook};
use crate::config::StreamConfig;
use crate::dispatch::{BookEvent, DeliveryMode, Dispatcher, Handler, Subscription};
use crate::error::{ErrorKind, StreamError};
use crate::models::update::UpdateMessage;
use crate::snapshot::SnapshotSource;
use crate::transport::{Channel, Connector};
use crate::websocket::{KEEPALIVE_FRAME, StreamMessage, parse_stream_message};

/// Configures callbacks and starts a session.
///
/// Recognized options: [`on_update`](Self::on_update),
/// [`on_book`](Self::on_book) and [`on_status`](Self::on_status).
pub struct SessionBuilder {
    config: StreamConfig,
    handlers: Vec<(DeliveryMode, Handler)>,
}

impl SessionBuilder {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            handlers: Vec::new(),
        }
    }

    /// Calls `handler` with the delta of every applied update.
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BookDelta) + Send + Sync + 'static,
    {
        self.handlers.push((
            DeliveryMode::Deltas,
            Arc::new(move |event: &BookEvent| {
                if let BookEvent::Delta(delta) = event {
                    handler(delta);
                }
            }),
        ));
        self
    }

    /// Calls `handler` with the whole book after every change.
    pub fn on_book<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BookView) + Send + Sync + 'static,
    {
        self.handlers.push((
            DeliveryMode::FullBook,
            Arc::new(move |event: &BookEvent| {
                if let BookEvent::Book(view) = event {
                    handler(view);
                }
            }),
        ));
        self
    }

    /// Calls `handler` on every state transition.
    pub fn on_status<F>(mut self, handler: F) -> Self
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.handlers.push((
            DeliveryMode::Status,
            Arc::new(move |event: &BookEvent| {
                if let BookEvent::Status(state) = event {
                    handler(*state);
                }
            }),
        ));
        self
    }

    /// Spawns the session onto the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if the configuration is invalid.
    pub fn spawn<C, S>(self, connector: C, snapshots: S) -> Result<SessionHandle>
    where
        C: Connector,
        S: SnapshotSource,
    {
        self.config.validate()?;

        let store = BookStore::new();
        let dispatcher = Dispatcher::new(self.config.queue_capacity, self.config.overflow);
        for (mode, handler) in self.handlers {
            dispatcher.register_handler(mode, handler);
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let cancel = CancellationToken::new();
        let stats = Arc::new(SessionStats::default());

        let runner = Runner {
            config: self.config,
            connector,
            snapshots,
            store: store.clone(),
            dispatcher: dispatcher.clone(),
            state_tx,
            cancel: cancel.clone(),
            stats: stats.clone(),
        };
        let task = tokio::spawn(runner.run());

        Ok(SessionHandle {
            store,
            dispatcher,
            state_rx,
            cancel,
            stats,
            task,
        })
    }
}

/// Caller's handle to a running session.
pub struct SessionHandle {
    store: BookStore,
    dispatcher: Dispatcher,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    stats: Arc<SessionStats>,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Waits until the session reaches `target` or terminates, returning
    /// the state it stopped at.
    pub async fn wait_for_state(&self, target: SessionState) -> SessionState {
        let mut rx = self.state_rx.clone();
        match rx
            .wait_for(|state| *state == target || state.is_terminal())
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Terminated,
        }
    }

    /// Consistent copy of the book, or `None` while not live.
    pub fn book(&self) -> Option<BookView> {
        self.store.view()
    }

    /// Shared store, for readers that want to hold on to it.
    pub fn store(&self) -> BookStore {
        self.store.clone()
    }

    /// Sequence of the last applied update.
    pub fn sequence(&self) -> i64 {
        self.store.sequence()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Registers a handler for events of `mode`.
    pub fn subscribe<F>(&self, mode: DeliveryMode, handler: F) -> Subscription
    where
        F: Fn(&BookEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register(mode, handler)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.dispatcher.unregister(subscription);
    }

    /// Token that stops the session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests shutdown and waits for the session to stop.
    ///
    /// # Errors
    ///
    /// Returns the fatal error the session stopped with, if any.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the session to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns the fatal error (auth rejection or exhausted snapshot
    /// retries) the session stopped with.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(StreamError::Transport(format!("session task failed: {e}"))),
        }
    }
}

/// Why a connection's drive loop ended.
enum Exit {
    Shutdown,
    Reconnect(StreamError),
    Fatal(StreamError),
}

impl Exit {
    fn from_error(e: StreamError) -> Self {
        if e.is_fatal() {
            Exit::Fatal(e)
        } else {
            Exit::Reconnect(e)
        }
    }
}

/// Why the live loop ended.
enum LiveExit {
    /// Resynchronize, keeping the updates that are still ahead of the book.
    Resync(Vec<UpdateMessage>),
    Exit(Exit),
}

/// Outcome of reading one frame from the channel.
enum Frame {
    Message(StreamMessage),
    Malformed,
    Closed(Exit),
}

struct Runner<C, S> {
    config: StreamConfig,
    connector: C,
    snapshots: S,
    store: BookStore,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    stats: Arc<SessionStats>,
}

impl<C: Connector, S: SnapshotSource> Runner<C, S> {
    async fn run(self) -> Result<()> {
        let mut backoff = Backoff::new(&self.config.backoff);
        let mut remote_failures = 0u32;
        let pair = self.config.pair.clone();

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            self.set_state(SessionState::Connecting);
            let connect = timeout(
                self.config.handshake_timeout(),
                self.connector.connect(&pair),
            );
            let connected = tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                res = connect => res.unwrap_or(Err(StreamError::Timeout("transport handshake"))),
            };

            let exit = match connected {
                Ok(mut channel) => {
                    info!(pair = %pair, "Stream connected");
                    let exit = self
                        .drive(&mut channel, &mut backoff, &mut remote_failures)
                        .await;
                    channel.close().await;
                    exit
                }
                Err(e) => Exit::from_error(e),
            };

            let e = match exit {
                Exit::Shutdown => break Ok(()),
                Exit::Fatal(e) => {
                    error!(pair = %pair, error = %e, "Session stopped");
                    break Err(e);
                }
                Exit::Reconnect(e) => e,
            };

            if e.kind() == ErrorKind::Remote {
                remote_failures += 1;
                if remote_failures > self.config.max_snapshot_retries {
                    error!(
                        pair = %pair,
                        attempts = remote_failures,
                        error = %e,
                        "Snapshot retry budget exhausted"
                    );
                    break Err(e);
                }
            }

            self.store.invalidate();
            self.set_state(SessionState::Disconnected);
            self.stats.record_reconnect();

            let delay = backoff.next_delay();
            warn!(
                pair = %pair,
                error = %e,
                backoff_ms = backoff::whole_millis(delay),
                "Connection lost, backing off"
            );
            tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                () = sleep(delay) => {}
            }
        };

        self.store.invalidate();
        self.set_state(SessionState::Terminated);
        self.dispatcher.close();
        info!(pair = %pair, "Session terminated");
        result
    }

    /// Bootstraps and streams one connection until it must be dropped.
    async fn drive(
        &self,
        channel: &mut C::Channel,
        backoff: &mut Backoff,
        remote_failures: &mut u32,
    ) -> Exit {
        let period = self.config.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut resyncing = false;
        let mut carried = Vec::new();
        loop {
            self.store.invalidate();
            if resyncing {
                self.stats.record_resync();
                self.set_state(SessionState::Resyncing);
            } else {
                self.set_state(SessionState::AwaitingSnapshot);
            }

            let pending = std::mem::take(&mut carried);
            let (book, pending) = match self.await_snapshot(channel, &mut keepalive, pending).await
            {
                Ok(bootstrap) => bootstrap,
                Err(exit) => return exit,
            };
            *remote_failures = 0;

            self.set_state(SessionState::Replaying);
            if let Err(remaining) = self.replay(book, pending) {
                carried = remaining;
                resyncing = true;
                continue;
            }

            self.store.mark_synced();
            self.set_state(SessionState::Live);
            backoff.reset();

            match self.stream_live(channel, &mut keepalive).await {
                LiveExit::Resync(remaining) => {
                    carried = remaining;
                    resyncing = true;
                }
                LiveExit::Exit(exit) => return exit,
            }
        }
    }

    /// Buffers inbound updates, after `pending`, while a snapshot is
    /// fetched.
    ///
    /// A snapshot frame arriving on the stream satisfies the wait as well.
    async fn await_snapshot(
        &self,
        channel: &mut C::Channel,
        keepalive: &mut Interval,
        mut pending: Vec<UpdateMessage>,
    ) -> std::result::Result<(OrderBook, Vec<UpdateMessage>), Exit> {
        let fetch = timeout(
            self.config.snapshot_timeout(),
            self.snapshots.fetch(&self.config.pair),
        );
        tokio::pin!(fetch);
        let mut idle_deadline = Instant::now() + self.config.idle_timeout();

        loop {
            enum Event {
                Cancelled,
                Fetched(std::result::Result<Result<OrderBook>, tokio::time::error::Elapsed>),
                Frame(Option<Result<String>>),
                Idle,
                Keepalive,
            }

            let event = tokio::select! {
                () = self.cancel.cancelled() => Event::Cancelled,
                res = &mut fetch => Event::Fetched(res),
                frame = channel.recv() => Event::Frame(frame),
                () = sleep_until(idle_deadline) => Event::Idle,
                _ = keepalive.tick() => Event::Keepalive,
            };

            match event {
                Event::Cancelled => return Err(Exit::Shutdown),
                Event::Fetched(Ok(Ok(book))) => {
                    debug!(
                        sequence = book.sequence(),
                        buffered = pending.len(),
                        "Snapshot fetched"
                    );
                    return Ok((book, pending));
                }
                Event::Fetched(Ok(Err(e))) => {
                    warn!(error = %e, "Snapshot fetch failed");
                    return Err(Exit::from_error(e));
                }
                Event::Fetched(Err(_)) => {
                    warn!("Snapshot fetch timed out");
                    return Err(Exit::Reconnect(StreamError::Timeout("snapshot")));
                }
                Event::Idle => return Err(Exit::Reconnect(StreamError::Timeout("stream frame"))),
                Event::Keepalive => {
                    if let Err(e) = channel.send(KEEPALIVE_FRAME.to_string()).await {
                        return Err(Exit::from_error(e));
                    }
                }
                Event::Frame(frame) => {
                    idle_deadline = Instant::now() + self.config.idle_timeout();
                    match self.read_frame(frame) {
                        Frame::Message(StreamMessage::Update(update)) => pending.push(update),
                        Frame::Message(StreamMessage::Snapshot(snapshot)) => {
                            info!(sequence = snapshot.sequence, "Using in-stream snapshot");
                            return Ok((OrderBook::from_snapshot(snapshot), pending));
                        }
                        Frame::Message(StreamMessage::Keepalive) | Frame::Malformed => {}
                        Frame::Closed(exit) => return Err(exit),
                    }
                }
            }
        }
    }

    /// Loads `book` and applies the buffered updates newer than it.
    ///
    /// On a gap, returns the updates from the first missing sequence on.
    fn replay(
        &self,
        book: OrderBook,
        mut pending: Vec<UpdateMessage>,
    ) -> std::result::Result<(), Vec<UpdateMessage>> {
        let base = book.sequence();
        self.store.load(book);
        self.publish_reset();

        pending.sort_by_key(|update| update.sequence);
        let discarded = pending.iter().filter(|u| u.sequence <= base).count();
        debug!(
            base,
            buffered = pending.len(),
            discarded,
            "Replaying buffered updates"
        );
        self.stats.record_stale(discarded as u64);

        pending.retain(|u| u.sequence > base);
        match pending.iter().position(|update| self.apply(update).is_gap()) {
            Some(gap) => Err(pending.split_off(gap)),
            None => Ok(()),
        }
    }

    async fn stream_live(&self, channel: &mut C::Channel, keepalive: &mut Interval) -> LiveExit {
        let mut idle_deadline = Instant::now() + self.config.idle_timeout();

        loop {
            enum Event {
                Cancelled,
                Frame(Option<Result<String>>),
                Idle,
                Keepalive,
            }

            let event = tokio::select! {
                () = self.cancel.cancelled() => Event::Cancelled,
                frame = channel.recv() => Event::Frame(frame),
                () = sleep_until(idle_deadline) => Event::Idle,
                _ = keepalive.tick() => Event::Keepalive,
            };

            match event {
                Event::Cancelled => return LiveExit::Exit(Exit::Shutdown),
                Event::Idle => {
                    return LiveExit::Exit(Exit::Reconnect(StreamError::Timeout("stream frame")));
                }
                Event::Keepalive => {
                    if let Err(e) = channel.send(KEEPALIVE_FRAME.to_string()).await {
                        return LiveExit::Exit(Exit::from_error(e));
                    }
                }
                Event::Frame(frame) => {
                    idle_deadline = Instant::now() + self.config.idle_timeout();
                    match self.read_frame(frame) {
                        Frame::Message(StreamMessage::Update(update)) => {
                            if self.apply(&update).is_gap() {
                                return LiveExit::Resync(vec![update]);
                            }
                        }
                        Frame::Message(StreamMessage::Snapshot(snapshot)) => {
                            let current = self.store.sequence();
                            if snapshot.sequence < current {
                                self.stats.record_stale(1);
                                debug!(
                                    sequence = snapshot.sequence,
                                    current,
                                    "Discarding stale in-stream snapshot"
                                );
                                continue;
                            }
                            info!(sequence = snapshot.sequence, "Reloading from in-stream snapshot");
                            self.store.load(OrderBook::from_snapshot(snapshot));
                            self.store.mark_synced();
                            self.publish_reset();
                        }
                        Frame::Message(StreamMessage::Keepalive) => debug!("Keepalive"),
                        Frame::Malformed => {
                            warn!("Undecodable frame while live, resynchronizing");
                            return LiveExit::Resync(Vec::new());
                        }
                        Frame::Closed(exit) => return LiveExit::Exit(exit),
                    }
                }
            }
        }
    }

    /// Classifies one result of [`Channel::recv`].
    fn read_frame(&self, frame: Option<Result<String>>) -> Frame {
        match frame {
            None => Frame::Closed(Exit::Reconnect(StreamError::Transport(
                "stream closed".into(),
            ))),
            Some(Err(e)) => Frame::Closed(Exit::from_error(e)),
            Some(Ok(text)) => match parse_stream_message(&text) {
                Ok(message) => Frame::Message(message),
                Err(e) => {
                    self.stats.record_decode_error();
                    warn!(error = %e, "Discarding undecodable frame");
                    Frame::Malformed
                }
            },
        }
    }

    /// Applies one update and publishes the result.
    fn apply(&self, update: &UpdateMessage) -> ApplyOutcome {
        let outcome = self.store.apply(update);
        match &outcome {
            ApplyOutcome::Applied(delta) => {
                self.stats.record_applied();
                self.dispatcher
                    .publish(BookEvent::Delta(Arc::new(delta.clone())));
                if self.dispatcher.wants(DeliveryMode::FullBook) {
                    let view = self.store.with_book(OrderBook::view);
                    self.dispatcher.publish(BookEvent::Book(Arc::new(view)));
                }
            }
            ApplyOutcome::Stale { .. } => self.stats.record_stale(1),
            ApplyOutcome::Gap { expected, received } => {
                self.stats.record_gap();
                warn!(
                    pair = %self.config.pair,
                    expected,
                    received,
                    "Sequence gap detected"
                );
            }
        }
        outcome
    }

    /// Tells subscribers the book was reloaded from a snapshot.
    fn publish_reset(&self) {
        let wants_deltas = self.dispatcher.wants(DeliveryMode::Deltas);
        let wants_book = self.dispatcher.wants(DeliveryMode::FullBook);
        if !wants_deltas && !wants_book {
            return;
        }

        let view = Arc::new(self.store.with_book(OrderBook::view));
        if wants_deltas {
            self.dispatcher.publish(BookEvent::Snapshot(view.clone()));
        }
        if wants_book {
            self.dispatcher.publish(BookEvent::Book(view));
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(
                pair = %self.config.pair,
                from = %previous,
                to = %state,
                "Session state changed"
            );
            self.dispatcher.publish(BookEvent::Status(state));
        }
    }
}
