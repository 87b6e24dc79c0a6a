//! Incremental update models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::Side;

/// A sequenced update from the stream.
///
/// Any combination of the three sub-fields may be present; they are
/// applied in the order trades, create, delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(with = "crate::models::sequence")]
    pub sequence: i64,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "crate::models::nullable_vec")]
    pub trade_updates: Vec<TradeUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_update: Option<CreateUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_update: Option<DeleteUpdate>,
}

impl UpdateMessage {
    /// Creates an empty update at the given sequence.
    pub fn new(sequence: i64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    pub fn with_trade(mut self, order_id: impl Into<String>, base: Decimal, counter: Decimal) -> Self {
        self.trade_updates.push(TradeUpdate {
            order_id: order_id.into(),
            base,
            counter,
        });
        self
    }

    pub fn with_create(
        mut self,
        order_id: impl Into<String>,
        side: Side,
        price: Decimal,
        volume: Decimal,
    ) -> Self {
        self.create_update = Some(CreateUpdate {
            order_id: order_id.into(),
            side,
            price,
            volume,
        });
        self
    }

    pub fn with_delete(mut self, order_id: impl Into<String>) -> Self {
        self.delete_update = Some(DeleteUpdate {
            order_id: order_id.into(),
        });
        self
    }
}

/// Volume matched against a resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub order_id: String,
    /// Traded amount in the base currency; reduces the order's volume.
    pub base: Decimal,
    /// Traded amount in the counter currency.
    pub counter: Decimal,
}

/// A new resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUpdate {
    pub order_id: String,
    #[serde(rename = "type")]
    pub side: Side,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Removal of a resting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUpdate {
    pub order_id: String,
}
