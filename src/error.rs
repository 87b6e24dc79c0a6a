//! Crate-level error types.
//!
//! [`StreamError`] unifies every error source (configuration, transport,
//! REST, decoding, exchange-reported failures) behind a single enum so the
//! session can decide how to recover with one call to [`StreamError::kind`]
//! while callers keep using the `?` operator.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection dropped or could not be established.
    #[error("transport error: {0}")]
    Transport(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An HTTP request to the REST API failed before a response was read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A handshake, snapshot fetch or read exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A message or response body did not have the expected shape.
    #[error("malformed message: {0}")]
    Decode(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The exchange answered with an application-level error.
    #[error("exchange error: {0}")]
    Remote(String),

    /// The exchange rejected the supplied credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),
}

/// Recovery class of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reconnect with backoff.
    Transport,
    /// Discard the offending message; for updates this forces a resync.
    Decode,
    /// Retry with backoff until the retry budget is exhausted.
    Remote,
    /// Fatal, never retried.
    Auth,
    /// Fatal, raised before any connection is attempted.
    Config,
}

impl StreamError {
    /// Classifies the error for the session's recovery decision.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) | Self::Http(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::WebSocket(e) => match e {
                tungstenite::Error::Http(response)
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    ErrorKind::Auth
                }
                _ => ErrorKind::Transport,
            },
            Self::Decode(_) | Self::Json(_) => ErrorKind::Decode,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Auth(_) => ErrorKind::Auth,
        }
    }

    /// Returns `true` if the session must stop instead of reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth | ErrorKind::Config)
    }
}
