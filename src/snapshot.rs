//! Full-book snapshot retrieval.
//!
//! [`SnapshotSource`] is the seam the session fetches through;
//! [`RestSnapshotFetcher`] implements it against the BitX REST API. No
//! retries happen here, the session owns retry policy.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

use crate::Result;
use crate::book::OrderBook;
use crate::error::StreamError;
use crate::models::book::BookSnapshot;
use crate::models::{Credentials, ErrorResponse};

const USER_AGENT: &str = concat!("bitx-stream/", env!("CARGO_PKG_VERSION"));
const ORDERBOOK_PATH: &str = "/api/1/orderbook";

/// Source of a full book plus the sequence number it reflects.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetches the current book for `pair` as one atomic read.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error on network failure,
    /// [`StreamError::Decode`] on a malformed payload,
    /// [`StreamError::Auth`] if the credentials are rejected, and
    /// [`StreamError::Remote`] when the exchange reports an error.
    fn fetch(&self, pair: &str) -> impl Future<Output = Result<OrderBook>> + Send;
}

/// Fetches snapshots with `GET <api_url>/api/1/orderbook?pair=<pair>`.
#[derive(Debug, Clone)]
pub struct RestSnapshotFetcher {
    client: reqwest::Client,
    api_url: String,
    credentials: Option<Credentials>,
}

impl RestSnapshotFetcher {
    /// Builds a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            credentials,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{ORDERBOOK_PATH}", self.api_url.trim_end_matches('/'))
    }
}

impl SnapshotSource for RestSnapshotFetcher {
    async fn fetch(&self, pair: &str) -> Result<OrderBook> {
        let mut request = self.client.get(self.endpoint()).query(&[("pair", pair)]);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(
                &credentials.api_key_id,
                Some(credentials.api_key_secret.as_str()),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if matches!(status.as_u16(), 401 | 403) {
            return Err(StreamError::Auth(format!("snapshot request rejected: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(StreamError::Remote(format!("HTTP {status}: {body}")));
        }

        let snapshot = decode_snapshot(&body)?;
        info!(pair, sequence = snapshot.sequence, "Fetched order book snapshot");
        Ok(OrderBook::from_snapshot(snapshot))
    }
}

/// Decodes a snapshot response body, surfacing exchange-reported errors.
///
/// # Errors
///
/// Returns [`StreamError::Remote`] if the body carries a non-empty
/// `error`, or [`StreamError::Decode`] if it is not a snapshot.
pub fn decode_snapshot(body: &str) -> Result<BookSnapshot> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| StreamError::Decode(format!("invalid snapshot body: {e}")))?;

    let envelope: ErrorResponse = serde_json::from_value(value.clone()).unwrap_or_default();
    if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
        let code = envelope.error_code.unwrap_or_default();
        return Err(StreamError::Remote(format!("{error} {code}").trim().to_string()));
    }

    let snapshot: BookSnapshot = serde_json::from_value(value)
        .map_err(|e| StreamError::Decode(format!("invalid snapshot body: {e}")))?;
    debug!(
        sequence = snapshot.sequence,
        bids = snapshot.bids.len(),
        asks = snapshot.asks.len(),
        "Decoded snapshot"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_path() {
        let fetcher =
            RestSnapshotFetcher::new("https://api.luno.com/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(fetcher.endpoint(), "https://api.luno.com/api/1/orderbook");
    }

    #[test]
    fn decodes_snapshot_body() {
        let snapshot = decode_snapshot(
            r#"{"sequence":"7","bids":[{"id":"b","price":"10","volume":"1"}],"asks":[]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.sequence, 7);
        assert_eq!(snapshot.bids.len(), 1);
    }

    #[test]
    fn error_field_is_remote_error() {
        let err = decode_snapshot(r#"{"error":"Invalid pair","error_code":"ErrInvalidPair"}"#)
            .unwrap_err();
        assert!(matches!(err, StreamError::Remote(ref m) if m.contains("Invalid pair")));
    }

    #[test]
    fn empty_error_field_is_ignored() {
        let snapshot = decode_snapshot(r#"{"error":"","sequence":"3","bids":[],"asks":[]}"#);
        assert!(snapshot.is_ok());
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(
            decode_snapshot("<html>"),
            Err(StreamError::Decode(_))
        ));
        assert!(matches!(
            decode_snapshot(r#"{"bids":[]}"#),
            Err(StreamError::Decode(_))
        ));
    }
}
