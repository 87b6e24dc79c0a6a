//! Order book snapshot models.

use serde::{Deserialize, Serialize};

use crate::book::OrderEntry;

/// Full book snapshot, as sent by the REST endpoint and as the first
/// frame of a stream connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    #[serde(with = "crate::models::sequence")]
    pub sequence: i64,
    #[serde(default, deserialize_with = "crate::models::nullable_vec")]
    pub asks: Vec<OrderEntry>,
    #[serde(default, deserialize_with = "crate::models::nullable_vec")]
    pub bids: Vec<OrderEntry>,
}
