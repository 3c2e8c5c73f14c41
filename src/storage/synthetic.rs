//! Deterministic synthetic captures
//!
//! Produces the same frame shapes a live capture would, so a replay can be
//! benchmarked without a token or network access.

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

use super::CapturedSession;
use crate::config::{Category, StreamMode};
use crate::gateway::{codec, opcode, GUILD_CREATE, READY};
use crate::Result;

/// Dispatch events generated when none are requested
pub const DEFAULT_SYNTH_EVENTS: usize = 1_000;

/// One heartbeat ACK is interleaved after this many dispatches
const ACK_EVERY: usize = 50;

/// Compressed messages at this stride are split over two frames
const SPLIT_EVERY: usize = 5;

const SNOWFLAKE_BASE: u64 = 1_100_000_000_000_000_000;

/// Builder for synthetic sessions
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    mode: StreamMode,
    events: usize,
    shard: [u32; 2],
}

impl SessionBuilder {
    /// Synthesize sessions for a stream mode
    #[must_use]
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            events: DEFAULT_SYNTH_EVENTS,
            shard: [0, 1],
        }
    }

    /// Number of dispatch events after READY
    #[must_use]
    pub fn events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    /// Shard reported in READY
    #[must_use]
    pub fn shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard = [shard_id, shard_count];
        self
    }

    /// Logical messages in delivery order
    #[must_use]
    pub fn payloads(&self) -> Vec<Value> {
        let mut payloads = Vec::with_capacity(self.events + self.events / ACK_EVERY + 2);
        payloads.push(json!({
            "op": opcode::HELLO,
            "s": null,
            "t": null,
            "d": {"heartbeat_interval": 41250, "_trace": ["[\"gateway-prd-1\",{\"micros\":0.0}]"]},
        }));

        let guilds: Vec<Value> = match self.mode.category {
            Category::Guilds => (0..self.events)
                .map(|i| json!({"id": snowflake(i), "unavailable": true}))
                .collect(),
            Category::Messages => Vec::new(),
        };

        payloads.push(json!({
            "op": opcode::DISPATCH,
            "s": 1,
            "t": READY,
            "d": {
                "v": 10,
                "session_id": "0123456789abcdef0123456789abcdef",
                "user": {"id": snowflake(0), "username": "gatebench", "bot": true},
                "guilds": guilds,
                "shard": self.shard,
            },
        }));

        let mut seq = 1u64;
        for i in 0..self.events {
            seq += 1;
            payloads.push(match self.mode.category {
                Category::Guilds => guild_create(seq, i),
                Category::Messages => message_create(seq, i),
            });

            if (i + 1) % ACK_EVERY == 0 {
                payloads.push(json!({"op": opcode::HEARTBEAT_ACK, "s": null, "t": null, "d": null}));
            }
        }

        payloads
    }

    /// Encode, optionally compress, and package the session
    ///
    /// # Errors
    ///
    /// Returns error if the encoding or compression is not built in
    pub fn build(&self) -> Result<CapturedSession> {
        let payloads = self.payloads();
        let mut frames = Vec::with_capacity(payloads.len());
        let mut compressor = compressor(self.mode.compression)?;

        for (i, payload) in payloads.iter().enumerate() {
            let message = codec::encode_bytes(self.mode.encoding, payload)?;

            match compressor.as_mut() {
                None => frames.push(Bytes::from(message)),
                Some(compressor) => {
                    let frame = Bytes::from(compressor.frame(&message)?);
                    if i % SPLIT_EVERY == SPLIT_EVERY - 1 && frame.len() > 1 {
                        let half = frame.len() / 2;
                        frames.push(frame.slice(..half));
                        frames.push(frame.slice(half..));
                    } else {
                        frames.push(frame);
                    }
                }
            }
        }

        debug!(
            messages = payloads.len(),
            frames = frames.len(),
            mode = %self.mode.fixture_name(),
            "Synthesized session"
        );

        Ok(CapturedSession::new(payloads.len() as u64, frames).with_profile(&self.mode))
    }
}

fn snowflake(i: usize) -> String {
    (SNOWFLAKE_BASE + i as u64 * 4_194_304).to_string()
}

fn guild_create(seq: u64, i: usize) -> Value {
    let members: Vec<Value> = (0..3)
        .map(|m| {
            json!({
                "user": {"id": snowflake(i * 3 + m), "username": format!("member{m}"), "bot": false},
                "roles": [],
                "joined_at": "2021-06-01T12:00:00.000000+00:00",
            })
        })
        .collect();

    json!({
        "op": opcode::DISPATCH,
        "s": seq,
        "t": GUILD_CREATE,
        "d": {
            "id": snowflake(i),
            "name": format!("guild {i}"),
            "member_count": members.len(),
            "members": members,
            "channels": [{"id": snowflake(i + 1), "type": 0, "name": "general", "position": 0}],
            "large": false,
            "unavailable": false,
        },
    })
}

fn message_create(seq: u64, i: usize) -> Value {
    json!({
        "op": opcode::DISPATCH,
        "s": seq,
        "t": "MESSAGE_CREATE",
        "d": {
            "id": snowflake(i),
            "channel_id": snowflake(i % 16),
            "guild_id": snowflake(i % 4),
            "author": {"id": snowflake(i % 64), "username": format!("user{}", i % 64), "bot": false},
            "content": format!("message number {i}"),
            "timestamp": "2021-06-01T12:00:00.000000+00:00",
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "attachments": [],
            "embeds": [],
            "pinned": false,
            "type": 0,
        },
    })
}

#[cfg(feature = "zlib")]
#[allow(clippy::unnecessary_wraps)]
fn compressor(compression: bool) -> Result<Option<crate::gateway::zlib::ZlibStreamWriter>> {
    Ok(compression.then(crate::gateway::zlib::ZlibStreamWriter::new))
}

#[cfg(not(feature = "zlib"))]
fn compressor(compression: bool) -> Result<Option<NoCompressor>> {
    if compression {
        return Err(crate::BenchError::Environment(
            "Synthesizing a compressed session requires the `zlib` feature".to_string(),
        ));
    }
    Ok(None)
}

#[cfg(not(feature = "zlib"))]
enum NoCompressor {}

#[cfg(not(feature = "zlib"))]
impl NoCompressor {
    fn frame(&mut self, _message: &[u8]) -> Result<Vec<u8>> {
        match *self {}
    }
}
