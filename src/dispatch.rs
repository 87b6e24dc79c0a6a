//! Fan-out of book events to subscribers.
//!
//! Every subscription owns a bounded queue drained by its own task. Handlers
//! run on Tokio's blocking pool, one batch at a time per subscription, so a
//! slow handler never holds up the session. When a queue is full the
//! configured [`Overflow`] policy decides which event is dropped.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::book::{BookDelta, BookView};
use crate::session::SessionState;

/// Event delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Changes made by one applied update.
    Delta(Arc<BookDelta>),
    /// The book was (re)loaded from a snapshot; later deltas apply on top.
    Snapshot(Arc<BookView>),
    /// The whole book after an applied update or snapshot.
    Book(Arc<BookView>),
    /// The session changed state.
    Status(SessionState),
}

impl BookEvent {
    /// Delivery mode this event is routed to.
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Self::Delta(_) | Self::Snapshot(_) => DeliveryMode::Deltas,
            Self::Book(_) => DeliveryMode::FullBook,
            Self::Status(_) => DeliveryMode::Status,
        }
    }
}

/// What a subscription wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// [`BookEvent::Delta`] per update plus [`BookEvent::Snapshot`] on
    /// every (re)synchronization.
    Deltas,
    /// [`BookEvent::Book`] after every change.
    FullBook,
    /// [`BookEvent::Status`] on every state transition.
    Status,
}

/// Behaviour of a full subscriber queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overflow {
    /// Evict the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
}

/// Subscriber callback. Runs on a blocking pool thread, never concurrently
/// with itself.
pub type Handler = Arc<dyn Fn(&BookEvent) + Send + Sync>;

struct Slot {
    id: u64,
    mode: DeliveryMode,
    capacity: usize,
    overflow: Overflow,
    handler: Handler,
    queue: Mutex<VecDeque<BookEvent>>,
    notify: Notify,
    active: AtomicBool,
    dropped: AtomicU64,
}

impl Slot {
    fn push(&self, event: BookEvent) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(
                        subscription = self.id,
                        dropped,
                        policy = ?self.overflow,
                        "Subscriber queue full, dropping events"
                    );
                }
                match self.overflow {
                    Overflow::DropOldest => {
                        queue.pop_front();
                    }
                    Overflow::DropNewest => return,
                }
            }
            queue.push_back(event);
        }

        self.notify.notify_one();
    }

    fn deliver(&self, batch: Vec<BookEvent>) {
        let handler: &(dyn Fn(&BookEvent) + Send + Sync) = self.handler.as_ref();
        for event in batch {
            if !self.active.load(Ordering::Acquire) {
                return;
            }
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(subscription = self.id, "Subscriber handler panicked");
            }
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.queue.lock().clear();
        self.notify.notify_one();
    }
}

async fn run_worker(slot: Arc<Slot>) {
    loop {
        let batch: Vec<BookEvent> = slot.queue.lock().drain(..).collect();
        if !slot.active.load(Ordering::Acquire) {
            break;
        }
        if batch.is_empty() {
            slot.notify.notified().await;
            continue;
        }

        let worker = slot.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || worker.deliver(batch)).await {
            warn!(subscription = slot.id, error = %e, "Subscriber delivery aborted");
            break;
        }
    }
    debug!(subscription = slot.id, "Subscriber worker stopped");
}

/// Handle to one registration with a [`Dispatcher`].
#[derive(Clone)]
pub struct Subscription {
    slot: Arc<Slot>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn mode(&self) -> DeliveryMode {
        self.slot.mode
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Events queued but not yet handed to the handler.
    pub fn pending(&self) -> usize {
        self.slot.queue.lock().len()
    }

    pub fn is_active(&self) -> bool {
        self.slot.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id)
            .field("mode", &self.slot.mode)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Delivers book events to registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    slots: RwLock<Vec<Arc<Slot>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
    overflow: Overflow,
}

impl Dispatcher {
    /// Creates a dispatcher whose subscriptions queue up to `capacity`
    /// events each.
    pub fn new(capacity: usize, overflow: Overflow) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
                overflow,
            }),
        }
    }

    /// Registers `handler` for events of `mode`.
    ///
    /// Spawns the subscription's worker, so it must be called from within a
    /// Tokio runtime. After [`close`](Self::close) the returned
    /// subscription is already inactive.
    pub fn register<F>(&self, mode: DeliveryMode, handler: F) -> Subscription
    where
        F: Fn(&BookEvent) + Send + Sync + 'static,
    {
        self.register_handler(mode, Arc::new(handler))
    }

    pub fn register_handler(&self, mode: DeliveryMode, handler: Handler) -> Subscription {
        let slot = Arc::new(Slot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            mode,
            capacity: self.inner.capacity,
            overflow: self.inner.overflow,
            handler,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            active: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });

        {
            let mut slots = self.inner.slots.write();
            if self.inner.closed.load(Ordering::Acquire) {
                slot.active.store(false, Ordering::Release);
                return Subscription { slot };
            }
            slots.push(slot.clone());
        }

        debug!(subscription = slot.id, mode = ?mode, "Registered subscriber");
        tokio::spawn(run_worker(slot.clone()));
        Subscription { slot }
    }

    /// Stops delivery to `subscription`.
    ///
    /// A handler already running finishes, but is not invoked again.
    pub fn unregister(&self, subscription: &Subscription) {
        self.inner
            .slots
            .write()
            .retain(|slot| slot.id != subscription.slot.id);
        subscription.slot.deactivate();
        debug!(subscription = subscription.slot.id, "Unregistered subscriber");
    }

    /// Returns `true` if any active subscription wants `mode`.
    pub fn wants(&self, mode: DeliveryMode) -> bool {
        self.inner.slots.read().iter().any(|slot| slot.mode == mode)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.read().len()
    }

    /// Queues `event` for every subscription of the matching mode.
    pub fn publish(&self, event: BookEvent) {
        let mode = event.mode();
        for slot in self.inner.slots.read().iter() {
            if slot.mode == mode {
                slot.push(event.clone());
            }
        }
    }

    /// Deactivates every subscription and releases their queues.
    pub fn close(&self) {
        let slots = {
            let mut slots = self.inner.slots.write();
            self.inner.closed.store(true, Ordering::Release);
            std::mem::take(&mut *slots)
        };
        for slot in &slots {
            slot.deactivate();
        }
        debug!(released = slots.len(), "Dispatcher closed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    fn delta(sequence: i64) -> BookEvent {
        BookEvent::Delta(Arc::new(BookDelta {
            sequence,
            ..BookDelta::default()
        }))
    }

    fn sequence_of(event: &BookEvent) -> i64 {
        match event {
            BookEvent::Delta(d) => d.sequence,
            _ => -1,
        }
    }

    /// Gives handler threads time to run events that should not arrive.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn eventually(cond: impl Fn() -> bool) {
        for _ in 0..1_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("Condition not reached");
    }

    #[tokio::test]
    async fn delivers_in_order_to_matching_mode() {
        let dispatcher = Dispatcher::new(16, Overflow::DropOldest);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(AtomicUsize::new(0));

        let sink = seen.clone();
        dispatcher.register(DeliveryMode::Deltas, move |e| sink.lock().push(sequence_of(e)));
        let counter = statuses.clone();
        dispatcher.register(DeliveryMode::Status, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for seq in 1..=5 {
            dispatcher.publish(delta(seq));
        }
        dispatcher.publish(BookEvent::Status(SessionState::Live));
        eventually(|| seen.lock().len() == 5 && statuses.load(Ordering::SeqCst) == 1).await;

        assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
        assert_eq!(statuses.load(Ordering::SeqCst), 1);
    }

    /// Registers a handler that blocks on event 1 until `gate` gets a
    /// permit, so the queue behind it can be filled deterministically.
    fn blocked_subscriber(
        dispatcher: &Dispatcher,
        gate: Arc<tokio::sync::Semaphore>,
        started: Arc<AtomicBool>,
        seen: Arc<Mutex<Vec<i64>>>,
    ) -> Subscription {
        dispatcher.register(DeliveryMode::Deltas, move |e| {
            if sequence_of(e) == 1 {
                started.store(true, Ordering::SeqCst);
                while gate.try_acquire().is_err() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            seen.lock().push(sequence_of(e));
        })
    }

    async fn fill_behind_blocked(overflow: Overflow) -> (Subscription, Vec<i64>) {
        let dispatcher = Dispatcher::new(2, overflow);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let started = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = blocked_subscriber(&dispatcher, gate.clone(), started.clone(), seen.clone());

        dispatcher.publish(delta(1));
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for seq in 2..=5 {
            dispatcher.publish(delta(seq));
        }
        assert_eq!(sub.dropped(), 2);

        gate.add_permits(1);
        for _ in 0..1_000 {
            if seen.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let seen = seen.lock().clone();
        (sub, seen)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_drops_oldest_and_counts() {
        let (sub, seen) = fill_behind_blocked(Overflow::DropOldest).await;
        assert_eq!(seen, vec![1, 4, 5]);
        assert_eq!(sub.dropped(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_newest_keeps_queued_events() {
        let (_, seen) = fill_behind_blocked(Overflow::DropNewest).await;
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let dispatcher = Dispatcher::new(16, Overflow::DropOldest);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let sub = dispatcher.register(DeliveryMode::Deltas, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.publish(delta(1));
        eventually(|| count.load(Ordering::SeqCst) == 1).await;
        dispatcher.unregister(&sub);
        dispatcher.publish(delta(2));
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!sub.is_active());
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn panicking_handler_keeps_receiving() {
        let dispatcher = Dispatcher::new(16, Overflow::DropOldest);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        dispatcher.register(DeliveryMode::Deltas, move |e| {
            counter.fetch_add(1, Ordering::SeqCst);
            if sequence_of(e) == 1 {
                panic!("handler failure");
            }
        });

        dispatcher.publish(delta(1));
        dispatcher.publish(delta(2));
        eventually(|| count.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn slow_handler_does_not_stall_publisher() {
        let dispatcher = Dispatcher::new(16, Overflow::DropOldest);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        dispatcher.register(DeliveryMode::Deltas, move |e| {
            std::thread::sleep(Duration::from_millis(200));
            sink.lock().push(sequence_of(e));
        });

        let start = std::time::Instant::now();
        dispatcher.publish(delta(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        for seq in 2..=3 {
            dispatcher.publish(delta(seq));
            tokio::task::yield_now().await;
        }
        assert!(start.elapsed() < Duration::from_millis(150));

        for _ in 0..2_000 {
            if seen.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn close_releases_subscriptions() {
        let dispatcher = Dispatcher::new(16, Overflow::DropOldest);
        let sub = dispatcher.register(DeliveryMode::FullBook, |_| {});
        assert!(dispatcher.wants(DeliveryMode::FullBook));

        dispatcher.close();

        assert!(!sub.is_active());
        assert!(!dispatcher.wants(DeliveryMode::FullBook));
        let late = dispatcher.register(DeliveryMode::Deltas, |_| {});
        assert!(!late.is_active());
    }
}
