//! WebSocket helpers for the live gateway connection

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::{BenchError, Result};

/// Live gateway socket
pub type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Connect to a WebSocket endpoint
    ///
    /// # Errors
    ///
    /// Returns error if connection fails
    pub async fn connect_to_endpoint(url: &str) -> Result<GatewaySocket> {
        debug!("Connecting to {url}");
        connect_async(url)
            .await
            .map(|(ws_stream, _)| ws_stream)
            .map_err(|e| BenchError::Transport(format!("WebSocket connect failed: {e}")))
    }

    /// Frame bytes of a data message; control messages carry none
    #[must_use]
    pub fn message_to_bytes(msg: Message) -> Option<Vec<u8>> {
        match msg {
            Message::Text(text) => Some(text.into_bytes()),
            Message::Binary(data) => Some(data),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
        }
    }
}
