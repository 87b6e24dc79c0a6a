//! Lock-guarded order book shared between the session and its readers.

use std::sync::Arc;

use parking_lot::RwLock;

use super::reconcile::{self, ApplyOutcome};
use super::{BookView, OrderBook};
use crate::models::update::UpdateMessage;

/// Shared handle to the live order book of one trading pair.
///
/// Cloning is cheap and every clone refers to the same book. Only the
/// session that owns the store mutates it; each mutation holds the write
/// lock for one whole update, so readers never observe a half-applied
/// message.
#[derive(Debug, Clone, Default)]
pub struct BookStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    book: OrderBook,
    synced: bool,
}

impl BookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price-ordered copy of the book, or `None` while the store is not
    /// synchronized with the exchange.
    pub fn view(&self) -> Option<BookView> {
        let state = self.inner.read();
        state.synced.then(|| state.book.view())
    }

    /// Runs `f` against the book under the read lock, regardless of
    /// synchronization state.
    pub fn with_book<R>(&self, f: impl FnOnce(&OrderBook) -> R) -> R {
        f(&self.inner.read().book)
    }

    /// Sequence number the book currently reflects.
    pub fn sequence(&self) -> i64 {
        self.inner.read().book.sequence()
    }

    pub fn is_synced(&self) -> bool {
        self.inner.read().synced
    }

    /// Replaces the book with a fresh snapshot, hidden from readers until
    /// [`mark_synced`](Self::mark_synced).
    pub(crate) fn load(&self, book: OrderBook) {
        let mut state = self.inner.write();
        state.book = book;
        state.synced = false;
    }

    /// Exposes the book to readers.
    pub(crate) fn mark_synced(&self) {
        self.inner.write().synced = true;
    }

    /// Hides the book from readers until it is synchronized again.
    ///
    /// The contents are kept as they were.
    pub(crate) fn invalidate(&self) {
        self.inner.write().synced = false;
    }

    /// Applies one update under the write lock.
    pub(crate) fn apply(&self, update: &UpdateMessage) -> ApplyOutcome {
        let mut state = self.inner.write();
        reconcile::apply(&mut state.book, update)
    }
}
