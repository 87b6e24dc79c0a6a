//! WebSocket transport for the BitX streaming API.
//!
//! - [`WsConnector`] - opens `<stream_url>/<pair>` and sends credentials
//! - [`WsChannel`] - the resulting [`Channel`]
//! - [`handler`] - classification of inbound frames

pub mod handler;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::Message;
use tungstenite::protocol::frame::coding::CloseCode;

use crate::Result;
use crate::error::StreamError;
use crate::models::Credentials;
use crate::transport::{Channel, Connector};

pub use handler::{StreamMessage, parse_stream_message};

/// Write half of a BitX stream connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a BitX stream connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Frame the server and client exchange as a keepalive.
pub const KEEPALIVE_FRAME: &str = "\"\"";

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`StreamError`] if the connection or TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Sends the credential envelope that opens every authenticated stream.
///
/// # Errors
///
/// Returns a [`StreamError`] if sending the message fails.
pub async fn authenticate(write: &mut WsWriter, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string(&credentials.message())?;
    write.send(Message::Text(json.into())).await?;
    debug!(api_key_id = credentials.api_key_id, "Sent credentials");

    Ok(())
}

/// Opens streams against a BitX WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    stream_url: String,
    credentials: Option<Credentials>,
}

impl WsConnector {
    #[must_use]
    pub fn new(stream_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            stream_url: stream_url.into(),
            credentials,
        }
    }

    /// Full stream URL for one pair.
    pub fn url_for(&self, pair: &str) -> String {
        format!("{}/{}", self.stream_url.trim_end_matches('/'), pair)
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self, pair: &str) -> Result<WsChannel> {
        let url = self.url_for(pair);
        info!(url = %url, "Connecting to stream");

        let (mut write, read) = connect(&url).await?;
        if let Some(credentials) = &self.credentials {
            authenticate(&mut write, credentials).await?;
        }

        Ok(WsChannel { write, read })
    }
}

/// An open BitX stream.
pub struct WsChannel {
    write: WsWriter,
    read: WsReader,
}

impl Channel for WsChannel {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        let reason = frame.reason.to_string();
                        if frame.code == CloseCode::Policy {
                            warn!(reason = %reason, "Stream closed by policy");
                            return Some(Err(StreamError::Auth(reason)));
                        }
                        info!(code = %frame.code, reason = %reason, "Stream closed by server");
                    }
                    return None;
                }
                Ok(_) => {} // Binary/Ping/Pong frames
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            debug!("Error closing stream: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_for_appends_pair() {
        let connector = WsConnector::new("wss://ws.luno.com/api/1/stream/", None);
        assert_eq!(
            connector.url_for("XBTZAR"),
            "wss://ws.luno.com/api/1/stream/XBTZAR"
        );
    }
}
