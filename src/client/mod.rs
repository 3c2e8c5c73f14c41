//! Gateway client implementations under test
//!
//! Every client is driven through the same [`GatewayClient`] surface so the
//! harness can swap implementations without knowing how they decode.

mod decode;
mod shard;

pub use decode::{Decode, EnvelopeDecoder, TreeDecoder};
pub use shard::ShardClient;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::capability::Capabilities;
use crate::config::{CaptureConfig, Encoding, ReplayConfig, DEFAULT_GATEWAY_URL};
use crate::gateway::GatewayEvent;
use crate::network::FrameIngress;
use crate::Result;

/// Observes every raw frame before it is inflated or decoded
pub type FrameHandler = Box<dyn FnMut(&Bytes) + Send>;

/// Observes every logical event the client emits
pub type EventHandler = Box<dyn FnMut(&GatewayEvent<'_>) + Send>;

/// Runs once when the client starts consuming frames
pub type ReadyHandler = Box<dyn FnOnce() + Send>;

/// Client implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// Full decode of every message into an owned value tree; negotiates
    /// compression and encoding from the built-in capabilities
    Owned,
    /// Envelope-only decode; payloads stay undecoded
    Lazy,
    /// Like `Lazy`, but HELLO and READY never reach the event handler
    Lean,
}

impl ClientKind {
    /// Every implementation, in reporting order
    pub const ALL: [Self; 3] = [Self::Owned, Self::Lazy, Self::Lean];

    /// Whether the client picks compression and encoding from what is built
    /// in rather than from its options
    #[must_use]
    pub fn negotiates_capabilities(self) -> bool {
        matches!(self, Self::Owned)
    }

    /// Whether handshake events are kept from the event handler
    #[must_use]
    pub fn hides_handshake(self) -> bool {
        matches!(self, Self::Lean)
    }

    /// Short name used in reports and file names
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Lazy => "lazy",
            Self::Lean => "lean",
        }
    }

    /// Construct a client of this kind
    #[must_use]
    pub fn build(self, options: ClientOptions) -> Box<dyn GatewayClient> {
        match self {
            Self::Owned => {
                let options = options.negotiated(Capabilities::detect());
                let decoder = TreeDecoder::new(options.encoding);
                Box::new(ShardClient::new(self, options, decoder))
            }
            Self::Lazy | Self::Lean => {
                let decoder = EnvelopeDecoder::new(options.encoding);
                Box::new(ShardClient::new(self, options, decoder))
            }
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owned" => Ok(Self::Owned),
            "lazy" => Ok(Self::Lazy),
            "lean" => Ok(Self::Lean),
            _ => Err(format!("Unknown client: {s} (expected owned, lazy or lean)")),
        }
    }
}

/// Connection settings handed to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Shard index
    pub shard_id: u32,
    /// Total shard count
    pub shard_count: u32,
    /// zlib-stream transport compression
    pub compression: bool,
    /// Payload encoding
    pub encoding: Encoding,
    /// Bot token sent in IDENTIFY
    pub token: Option<String>,
    /// Gateway intents bitfield
    pub intents: u64,
    /// Gateway endpoint without query string
    pub gateway_url: String,
}

impl ClientOptions {
    /// Options for replaying a capture; the token is a placeholder
    #[must_use]
    pub fn for_replay(config: &ReplayConfig) -> Self {
        Self {
            shard_id: config.shard_id,
            shard_count: config.shard_count,
            compression: config.mode.compression,
            encoding: config.mode.encoding,
            token: None,
            intents: config.mode.category.intents(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }

    /// Options for a live capture session
    #[must_use]
    pub fn for_capture(config: &CaptureConfig) -> Self {
        Self {
            shard_id: config.shard_id,
            shard_count: config.shard_count,
            compression: config.mode.compression,
            encoding: config.mode.encoding,
            token: config.token.clone(),
            intents: config.mode.category.intents(),
            gateway_url: config.gateway_url.clone(),
        }
    }

    /// Replace compression and encoding with what the capabilities enable
    #[must_use]
    pub fn negotiated(mut self, capabilities: Capabilities) -> Self {
        self.compression = capabilities.inflate;
        self.encoding = if capabilities.etf {
            Encoding::Etf
        } else {
            Encoding::Json
        };
        self
    }
}

/// Uniform surface over a gateway client implementation
///
/// Handlers and the test transport are installed before [`run`](Self::run);
/// the client consumes itself when started.
pub trait GatewayClient: Send {
    /// Implementation kind
    fn kind(&self) -> ClientKind;

    /// Effective options, after any negotiation
    fn options(&self) -> &ClientOptions;

    /// Install the raw frame tap
    fn on_frame(&mut self, handler: FrameHandler);

    /// Install the logical event handler
    fn on_event(&mut self, handler: EventHandler);

    /// Install the ready notification
    fn on_ready(&mut self, handler: ReadyHandler);

    /// Replace the live connection with an in-process transport
    ///
    /// Outbound payloads are discarded once installed.
    fn test_transport(&mut self) -> FrameIngress;

    /// Events this client consumes without emitting them, among the first
    /// `target` events that `frames` carry
    ///
    /// # Errors
    ///
    /// Returns error if the frames need a capability this build lacks
    fn hidden_handshake_events(&self, frames: &[Bytes], target: u64) -> Result<u64> {
        if self.kind().hides_handshake() {
            shard::handshake_events_within(self.options(), frames, target)
        } else {
            Ok(0)
        }
    }

    /// Start the event loop on the current runtime
    fn run(self: Box<Self>) -> JoinHandle<Result<()>>;
}
