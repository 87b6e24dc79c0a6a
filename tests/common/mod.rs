//! Shared test utilities: in-memory transport and scripted snapshots.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bitx_stream::book::{OrderBook, OrderEntry};
use bitx_stream::config::StreamConfig;
use bitx_stream::models::book::BookSnapshot;
use bitx_stream::models::update::UpdateMessage;
use bitx_stream::transport::{Channel, Connector};
use bitx_stream::{Result, StreamError};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::{Notify, mpsc};

/// Live BitX REST endpoint.
pub const BITX_API_URL: &str = "https://api.luno.com";

pub const TEST_PAIR: &str = "XBTZAR";

/// Configuration with short timeouts and no backoff jitter.
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::for_pair(TEST_PAIR);
    config.handshake_timeout_ms = 1_000;
    config.snapshot_timeout_ms = 2_000;
    config.idle_timeout_ms = 10_000;
    config.keepalive_interval_ms = 5_000;
    config.backoff.initial_ms = 10;
    config.backoff.max_ms = 50;
    config.backoff.jitter = false;
    config
}

/// Snapshot at sequence 10 with one bid `"a"` at 100 x 5.
pub fn book_at_10() -> OrderBook {
    OrderBook::from_snapshot(BookSnapshot {
        sequence: 10,
        bids: vec![OrderEntry::new("a", dec!(100), dec!(5))],
        asks: vec![],
    })
}

pub fn frame(update: &UpdateMessage) -> Result<String> {
    Ok(serde_json::to_string(update).expect("Failed to serialize update"))
}

/// Test side of a [`MockChannel`].
pub struct Server {
    frames: mpsc::UnboundedSender<Result<String>>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl Server {
    pub fn push(&self, update: &UpdateMessage) {
        self.frames
            .send(frame(update))
            .expect("Session dropped its channel");
    }

    pub fn push_raw(&self, text: &str) {
        self.frames
            .send(Ok(text.to_string()))
            .expect("Session dropped its channel");
    }

    pub fn push_error(&self, error: StreamError) {
        self.frames
            .send(Err(error))
            .expect("Session dropped its channel");
    }

    /// Next frame the session sent, if one arrives within a second.
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .ok()
            .flatten()
    }
}

pub struct MockChannel {
    frames: mpsc::UnboundedReceiver<Result<String>>,
    sent: mpsc::UnboundedSender<String>,
}

impl Channel for MockChannel {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.recv().await
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.sent
            .send(text)
            .map_err(|_| StreamError::Transport("peer gone".into()))
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}

/// Creates a connected channel pair.
pub fn channel() -> (MockChannel, Server) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    (
        MockChannel {
            frames: frames_rx,
            sent: sent_tx,
        },
        Server {
            frames: frames_tx,
            sent: sent_rx,
        },
    )
}

/// Connector that hands out queued connection results in order.
///
/// A `None` plan, or an empty queue, makes the connect never complete.
#[derive(Clone, Default)]
pub struct MockConnector {
    plans: Arc<Mutex<VecDeque<Option<Result<MockChannel>>>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful connection and returns its server side.
    pub fn accept(&self) -> Server {
        let (channel, server) = channel();
        self.plans.lock().push_back(Some(Ok(channel)));
        server
    }

    pub fn reject(&self, error: StreamError) {
        self.plans.lock().push_back(Some(Err(error)));
    }

    /// Queues a connect attempt that never completes.
    pub fn hang(&self) {
        self.plans.lock().push_back(None);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Channel = MockChannel;

    async fn connect(&self, _pair: &str) -> Result<MockChannel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().pop_front();
        match plan {
            Some(Some(result)) => result,
            _ => std::future::pending().await,
        }
    }
}

enum Step {
    Ready(Result<OrderBook>),
    Gated(Arc<Notify>, Result<OrderBook>),
}

/// Snapshot source that replays queued results in order.
///
/// Once the queue is empty, further fetches never complete.
#[derive(Clone, Default)]
pub struct ScriptedSnapshots {
    steps: Arc<Mutex<VecDeque<Step>>>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self, result: Result<OrderBook>) {
        self.steps.lock().push_back(Step::Ready(result));
    }

    /// Queues a result that is returned only after the returned gate is
    /// notified.
    pub fn gated(&self, result: Result<OrderBook>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.steps
            .lock()
            .push_back(Step::Gated(gate.clone(), result));
        gate
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl bitx_stream::snapshot::SnapshotSource for ScriptedSnapshots {
    async fn fetch(&self, _pair: &str) -> Result<OrderBook> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Ready(result)) => result,
            Some(Step::Gated(gate, result)) => {
                gate.notified().await;
                result
            }
            None => std::future::pending().await,
        }
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
