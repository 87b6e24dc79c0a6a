//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the session task.
#[derive(Debug, Default)]
pub struct SessionStats {
    applied: AtomicU64,
    stale: AtomicU64,
    gaps: AtomicU64,
    decode_errors: AtomicU64,
    resyncs: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Updates applied to the book.
    pub applied: u64,
    /// Updates discarded as already reflected.
    pub stale: u64,
    /// Sequence gaps detected.
    pub gaps: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Snapshot re-fetches without reconnecting.
    pub resyncs: u64,
    /// Transport reconnect attempts.
    pub reconnects: u64,
}

impl SessionStats {
    pub(crate) fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self, count: u64) {
        self.stale.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_gap(&self) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            gaps: self.gaps.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
