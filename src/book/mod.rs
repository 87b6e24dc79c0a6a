//! Local order book state.
//!
//! - [`OrderBook`] - the mutable id-keyed book for both sides
//! - [`reconcile`] - the update-application algorithm
//! - [`store`] - the lock-guarded store shared with readers

pub mod reconcile;
pub mod store;

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::book::BookSnapshot;

pub use reconcile::{ApplyOutcome, BookDelta, RemovalReason, RemovedOrder, TradeFill};
pub use store::BookStore;

/// Side of the book an order rests on (wire names: `"BID"`, `"ASK"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "BID",
            Side::Ask => "ASK",
        }
    }
}

/// A single resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: String,
    pub price: Decimal,
    pub volume: Decimal,
}

impl OrderEntry {
    pub fn new(id: impl Into<String>, price: Decimal, volume: Decimal) -> Self {
        Self {
            id: id.into(),
            price,
            volume,
        }
    }
}

/// Id-keyed order book for one trading pair, tagged with the sequence
/// number of the last update it reflects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBook {
    sequence: i64,
    bids: HashMap<String, OrderEntry>,
    asks: HashMap<String, OrderEntry>,
}

impl OrderBook {
    /// Creates an empty book at the given sequence.
    pub fn new(sequence: i64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    /// Builds a book from a decoded snapshot.
    ///
    /// Orders with a non-positive volume are skipped.
    pub fn from_snapshot(snapshot: BookSnapshot) -> Self {
        let mut book = Self::new(snapshot.sequence);
        for order in snapshot.bids {
            book.load(Side::Bid, order);
        }
        for order in snapshot.asks {
            book.load(Side::Ask, order);
        }
        book
    }

    fn load(&mut self, side: Side, order: OrderEntry) {
        if order.volume > Decimal::ZERO {
            self.side_mut(side).insert(order.id.clone(), order);
        }
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: i64) {
        self.sequence = sequence;
    }

    /// Returns the id-keyed orders of one side.
    pub fn side(&self, side: Side) -> &HashMap<String, OrderEntry> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub(crate) fn side_mut(&mut self, side: Side) -> &mut HashMap<String, OrderEntry> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Finds which side holds an order id.
    pub fn locate(&self, id: &str) -> Option<Side> {
        if self.bids.contains_key(id) {
            Some(Side::Bid)
        } else if self.asks.contains_key(id) {
            Some(Side::Ask)
        } else {
            None
        }
    }

    pub fn get(&self, id: &str) -> Option<&OrderEntry> {
        self.bids.get(id).or_else(|| self.asks.get(id))
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Orders of one side in book priority: bids by descending price,
    /// asks by ascending price, ties broken by id.
    pub fn sorted(&self, side: Side) -> Vec<OrderEntry> {
        let mut orders: Vec<OrderEntry> = self.side(side).values().cloned().collect();
        match side {
            Side::Bid => orders.sort_by(|a, b| b.price.cmp(&a.price).then_with(|| a.id.cmp(&b.id))),
            Side::Ask => orders.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id))),
        }
        orders
    }

    /// Captures an immutable, price-ordered copy of the book.
    pub fn view(&self) -> BookView {
        BookView {
            sequence: self.sequence,
            bids: self.sorted(Side::Bid),
            asks: self.sorted(Side::Ask),
        }
    }
}

/// Aggregated volume resting at one price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: Decimal,
    pub orders: usize,
}

/// Read-only, price-ordered copy of an [`OrderBook`] at one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookView {
    pub sequence: i64,
    /// Descending price.
    pub bids: Vec<OrderEntry>,
    /// Ascending price.
    pub asks: Vec<OrderEntry>,
}

impl BookView {
    pub fn best_bid(&self) -> Option<&OrderEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderEntry> {
        self.asks.first()
    }

    /// Best ask minus best bid, if both sides are populated.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Aggregates one side into price levels, in book priority.
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        let orders = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };

        let mut levels: BTreeMap<Decimal, PriceLevel> = BTreeMap::new();
        for order in orders {
            let level = levels.entry(order.price).or_insert(PriceLevel {
                price: order.price,
                volume: Decimal::ZERO,
                orders: 0,
            });
            level.volume += order.volume;
            level.orders += 1;
        }

        let levels = levels.into_values();
        match side {
            Side::Bid => levels.rev().collect(),
            Side::Ask => levels.collect(),
        }
    }
}
