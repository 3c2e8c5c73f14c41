//! Network layer for Gatebench
//!
//! Live gateway sockets and the in-process test transport.

mod transport;
mod websocket;

pub use transport::{test_transport, FrameIngress, Transport};
pub use websocket::{GatewaySocket, WebSocketHandler};
