//! Update-application algorithm.
//!
//! Sequencing is the only correctness anchor: an update is applied only
//! when its sequence is exactly one past the book's. Prices and volumes
//! are taken verbatim from the exchange.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{OrderBook, OrderEntry, Side};
use crate::models::update::{CreateUpdate, TradeUpdate, UpdateMessage};

/// Result of offering one update to a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update was applied; the book now sits at its sequence.
    Applied(BookDelta),
    /// The update is at or behind the book and was discarded.
    Stale { sequence: i64, current: i64 },
    /// One or more updates are missing; the book must be resynchronized.
    Gap { expected: i64, received: i64 },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// Exactly which orders one applied update touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookDelta {
    pub sequence: i64,
    pub timestamp: i64,
    /// Trades that hit a resting order, in message order.
    pub trades: Vec<TradeFill>,
    /// The order inserted by the create sub-field.
    pub created: Option<(Side, OrderEntry)>,
    /// Orders taken off the book, by trade exhaustion or delete.
    pub removed: Vec<RemovedOrder>,
}

impl BookDelta {
    /// Returns `true` if no order was touched.
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.created.is_none() && self.removed.is_empty()
    }
}

/// A trade applied against a resting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFill {
    pub order_id: String,
    pub side: Side,
    pub base: Decimal,
    pub counter: Decimal,
    /// Volume left on the order after the trade; zero or less means removed.
    pub remaining: Decimal,
}

/// An order removed from the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedOrder {
    pub order_id: String,
    pub side: Side,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Trades consumed the full volume.
    Filled,
    /// A delete update named the order.
    Deleted,
}

/// Offers one update to `book`.
///
/// Sub-fields are processed in the fixed order trades, create, delete and
/// the book's sequence is advanced only after all of them. Stale updates
/// and gaps leave the book untouched.
pub fn apply(book: &mut OrderBook, update: &UpdateMessage) -> ApplyOutcome {
    let current = book.sequence();

    if update.sequence <= current {
        debug!(sequence = update.sequence, current, "Discarding stale update");
        return ApplyOutcome::Stale {
            sequence: update.sequence,
            current,
        };
    }

    let Some(expected) = current.checked_add(1) else {
        return ApplyOutcome::Stale {
            sequence: update.sequence,
            current,
        };
    };
    if update.sequence > expected {
        return ApplyOutcome::Gap {
            expected,
            received: update.sequence,
        };
    }

    let mut delta = BookDelta {
        sequence: update.sequence,
        timestamp: update.timestamp,
        ..BookDelta::default()
    };

    for trade in &update.trade_updates {
        apply_trade(book, trade, &mut delta);
    }

    if let Some(create) = &update.create_update {
        apply_create(book, create, update.sequence, &mut delta);
    }

    if let Some(delete) = &update.delete_update {
        if let Some(side) = book.locate(&delete.order_id) {
            book.side_mut(side).remove(&delete.order_id);
            delta.removed.push(RemovedOrder {
                order_id: delete.order_id.clone(),
                side,
                reason: RemovalReason::Deleted,
            });
        } else {
            debug!(
                order_id = delete.order_id,
                sequence = update.sequence,
                "Delete for absent order"
            );
        }
    }

    book.set_sequence(update.sequence);
    ApplyOutcome::Applied(delta)
}

/// Offers a batch of updates in ascending sequence order.
///
/// Stops at the first gap, which is returned as the final outcome.
pub fn apply_all<'a, I>(book: &mut OrderBook, updates: I) -> Vec<ApplyOutcome>
where
    I: IntoIterator<Item = &'a UpdateMessage>,
{
    let mut ordered: Vec<&UpdateMessage> = updates.into_iter().collect();
    ordered.sort_by_key(|u| u.sequence);

    let mut outcomes = Vec::with_capacity(ordered.len());
    for update in ordered {
        let outcome = apply(book, update);
        let gap = outcome.is_gap();
        outcomes.push(outcome);
        if gap {
            break;
        }
    }
    outcomes
}

fn apply_trade(book: &mut OrderBook, trade: &TradeUpdate, delta: &mut BookDelta) {
    let Some(side) = book.locate(&trade.order_id) else {
        warn!(
            order_id = trade.order_id,
            sequence = delta.sequence,
            "Trade references unknown order, skipping"
        );
        return;
    };

    let orders = book.side_mut(side);
    let remaining = match orders.get_mut(&trade.order_id) {
        Some(order) => {
            order.volume -= trade.base;
            order.volume
        }
        None => return,
    };

    delta.trades.push(TradeFill {
        order_id: trade.order_id.clone(),
        side,
        base: trade.base,
        counter: trade.counter,
        remaining,
    });

    if remaining <= Decimal::ZERO {
        orders.remove(&trade.order_id);
        delta.removed.push(RemovedOrder {
            order_id: trade.order_id.clone(),
            side,
            reason: RemovalReason::Filled,
        });
    }
}

fn apply_create(book: &mut OrderBook, create: &CreateUpdate, sequence: i64, delta: &mut BookDelta) {
    if book.locate(&create.order_id).is_some() {
        warn!(
            order_id = create.order_id,
            sequence, "Duplicate create for existing order, ignoring"
        );
        return;
    }

    let entry = OrderEntry::new(create.order_id.clone(), create.price, create.volume);
    book.side_mut(create.side)
        .insert(create.order_id.clone(), entry.clone());
    delta.created = Some((create.side, entry));
}
