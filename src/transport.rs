//! Duplex message channel abstraction consumed by the session.
//!
//! [`Connector`] opens a channel for one trading pair, performing whatever
//! handshake and credential exchange the transport needs. [`Channel`]
//! yields inbound text frames in arrival order. The WebSocket
//! implementation lives in [`crate::websocket`].

use std::future::Future;

use crate::Result;

/// An open, authenticated message channel.
pub trait Channel: Send {
    /// Waits for the next inbound text frame.
    ///
    /// Returns `None` once the channel has closed cleanly.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;

    /// Sends one text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Closes the channel; pending and future `recv` calls end.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens [`Channel`]s to the exchange.
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel + 'static;

    /// Connects and authenticates a stream for `pair`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Auth`](crate::StreamError::Auth) if the
    /// credentials were rejected, or a transport-class error otherwise.
    fn connect(&self, pair: &str) -> impl Future<Output = Result<Self::Channel>> + Send;
}
