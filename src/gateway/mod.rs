//! Gateway wire protocol pieces shared by every client implementation
//!
//! Covers only what the harness needs to stay connected and to turn
//! frames into logical events: opcodes, the payload envelope, transport
//! inflation and the two payload encodings.

pub mod codec;
#[cfg(feature = "etf")]
pub mod etf;
#[cfg(feature = "zlib")]
pub mod zlib;

use serde_json::{json, Value};

use crate::config::Encoding;
use crate::Result;

/// Gateway API version requested on connect
pub const GATEWAY_VERSION: u8 = 10;

/// Trailer marking the end of a zlib-stream message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Gateway opcodes used by the harness
pub mod opcode {
    /// Event dispatch
    pub const DISPATCH: u8 = 0;
    /// Heartbeat (both directions)
    pub const HEARTBEAT: u8 = 1;
    /// Identify
    pub const IDENTIFY: u8 = 2;
    /// Server asks the client to reconnect
    pub const RECONNECT: u8 = 7;
    /// Session invalidated
    pub const INVALID_SESSION: u8 = 9;
    /// First payload after connecting
    pub const HELLO: u8 = 10;
    /// Heartbeat acknowledged
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Dispatch name of the session-ready event
pub const READY: &str = "READY";

/// Dispatch name of a guild delivery
pub const GUILD_CREATE: &str = "GUILD_CREATE";

/// Events that make up the connection handshake, as `(op, dispatch name)`
pub const HANDSHAKE: [(u8, Option<&str>); 2] = [(opcode::HELLO, None), (opcode::DISPATCH, Some(READY))];

/// One logical event emitted by a client
#[derive(Debug, Clone, Copy)]
pub struct GatewayEvent<'a> {
    /// Opcode
    pub op: u8,
    /// Sequence number (dispatches only)
    pub seq: Option<u64>,
    /// Dispatch name (dispatches only)
    pub name: Option<&'a str>,
    /// Event payload as the client decoded it
    pub data: EventData<'a>,
}

impl GatewayEvent<'_> {
    /// Whether this is the given dispatch
    #[must_use]
    pub fn is_dispatch(&self, name: &str) -> bool {
        self.op == opcode::DISPATCH && self.name == Some(name)
    }

    /// Whether the event belongs to the connection handshake
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        HANDSHAKE
            .iter()
            .any(|&(op, name)| self.op == op && (name.is_none() || self.name == name))
    }
}

/// Payload of an event, in whatever shape the client left it
#[derive(Debug, Clone, Copy)]
pub enum EventData<'a> {
    /// No payload
    Empty,
    /// Fully decoded value tree
    Value(&'a Value),
    /// Undecoded payload bytes (for ETF: a term without the version tag)
    Raw {
        /// Payload bytes
        bytes: &'a [u8],
        /// Encoding of the bytes
        encoding: Encoding,
    },
}

impl EventData<'_> {
    /// Materialize the payload as a value tree
    ///
    /// # Errors
    ///
    /// Returns error if raw bytes cannot be decoded
    pub fn to_value(&self) -> Result<Value> {
        match *self {
            Self::Empty => Ok(Value::Null),
            Self::Value(value) => Ok(value.clone()),
            Self::Raw { bytes, encoding } => codec::decode_fragment(encoding, bytes),
        }
    }
}

/// Build the gateway URL for an encoding and compression mode
#[must_use]
pub fn gateway_url(base: &str, encoding: Encoding, compression: bool) -> String {
    let mut url = format!(
        "{}/?v={GATEWAY_VERSION}&encoding={}",
        base.trim_end_matches('/'),
        urlencoding::encode(encoding.as_str())
    );
    if compression {
        url.push_str("&compress=");
        url.push_str(&urlencoding::encode("zlib-stream"));
    }
    url
}

/// IDENTIFY payload for a shard
#[must_use]
pub fn identify_payload(token: &str, intents: u64, shard_id: u32, shard_count: u32) -> Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "shard": [shard_id, shard_count],
            "properties": {
                "os": std::env::consts::OS,
                "browser": "gatebench",
                "device": "gatebench",
            },
        },
    })
}

/// Heartbeat payload carrying the last seen sequence
#[must_use]
pub fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": opcode::HEARTBEAT, "d": seq })
}

/// Heartbeat interval announced by HELLO
#[must_use]
pub fn heartbeat_interval(hello: &Value) -> Option<u64> {
    hello.get("heartbeat_interval").and_then(Value::as_u64)
}
