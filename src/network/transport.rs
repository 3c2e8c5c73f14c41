//! Frame sources a client event loop reads from
//!
//! A client either owns a live gateway socket or an in-process test
//! transport. The test transport is the deliberate injection point the
//! replay harness pushes captured frames into.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::websocket::{GatewaySocket, WebSocketHandler};
use crate::{BenchError, Result};

/// Create a connected test transport pair
#[must_use]
pub fn test_transport() -> (FrameIngress, Transport) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameIngress { tx }, Transport::Injected(rx))
}

/// Producer side of a test transport
#[derive(Clone)]
pub struct FrameIngress {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl FrameIngress {
    /// Push one frame; never waits for the consumer
    ///
    /// # Errors
    ///
    /// Returns error if the client's event loop has stopped
    pub fn push(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| BenchError::Transport("Client stopped reading frames".to_string()))
    }

    /// Whether the consuming event loop is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Where a client's frames come from
pub enum Transport {
    /// Live gateway connection
    Live(Box<GatewaySocket>),
    /// Frames pushed through a [`FrameIngress`]
    Injected(mpsc::UnboundedReceiver<Bytes>),
}

impl Transport {
    /// Connect to a live gateway
    ///
    /// # Errors
    ///
    /// Returns error if the WebSocket handshake fails
    pub async fn connect(url: &str) -> Result<Self> {
        let socket = WebSocketHandler::connect_to_endpoint(url).await?;
        Ok(Self::Live(Box::new(socket)))
    }

    /// Whether outbound payloads reach a real server
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Next inbound frame; `None` once the connection is closed
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails
    pub async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        match self {
            Self::Injected(rx) => rx.recv().await.map(Ok),
            Self::Live(socket) => loop {
                match socket.next().await? {
                    Ok(msg) if msg.is_close() => {
                        debug!("Gateway closed connection: {:?}", msg);
                        return None;
                    }
                    Ok(msg) => {
                        if let Some(frame) = WebSocketHandler::message_to_bytes(msg) {
                            return Some(Ok(Bytes::from(frame)));
                        }
                    }
                    Err(e) => {
                        return Some(Err(BenchError::Transport(format!(
                            "WebSocket receive failed: {e}"
                        ))))
                    }
                }
            },
        }
    }

    /// Send an outbound payload; a test transport discards it
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails
    pub async fn send(&mut self, msg: Message) -> Result<()> {
        match self {
            Self::Injected(_) => Ok(()),
            Self::Live(socket) => socket
                .send(msg)
                .await
                .map_err(|e| BenchError::Transport(format!("WebSocket send failed: {e}"))),
        }
    }

    /// Close the connection
    pub async fn close(&mut self) {
        match self {
            Self::Injected(rx) => rx.close(),
            Self::Live(socket) => {
                if let Err(e) = (**socket).close(None).await {
                    debug!("Closing gateway socket failed: {e}");
                }
            }
        }
    }
}
