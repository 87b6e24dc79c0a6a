//! Live order book mirror for the BitX/Luno streaming API.
//!
//! A [`session`] keeps a local copy of one pair's order book in lockstep
//! with the exchange: it fetches a snapshot, replays the stream updates
//! buffered meanwhile, applies each later update in sequence order, and
//! resynchronizes whenever a gap appears. Readers query the shared
//! [`BookStore`] and subscribers receive [`BookEvent`]s through the
//! [`Dispatcher`](dispatch::Dispatcher).

pub mod book;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod websocket;

pub use book::{BookDelta, BookStore, BookView, OrderBook, OrderEntry, Side};
pub use config::StreamConfig;
pub use dispatch::{BookEvent, DeliveryMode, Subscription};
pub use error::{ErrorKind, Result, StreamError};
pub use session::{SessionBuilder, SessionHandle, SessionState};
