//! Decode strategies the client implementations are built from

use serde_json::Value;

use crate::config::Encoding;
use crate::gateway::codec;
use crate::gateway::{EventData, GatewayEvent};
use crate::{BenchError, Result};

/// Turns one complete message into one logical event
pub trait Decode: Send + 'static {
    /// Decode `message` and pass the resulting event to `emit`
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be decoded; `emit` is not called
    fn decode(&mut self, message: &[u8], emit: &mut dyn FnMut(&GatewayEvent<'_>)) -> Result<()>;
}

/// Decodes a private copy of each message into an owned value tree
pub struct TreeDecoder {
    encoding: Encoding,
}

impl TreeDecoder {
    /// Create a decoder for an encoding
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

impl Decode for TreeDecoder {
    fn decode(&mut self, message: &[u8], emit: &mut dyn FnMut(&GatewayEvent<'_>)) -> Result<()> {
        let owned = message.to_vec();
        let payload = codec::decode_value(self.encoding, &owned)?;

        let op = payload
            .get("op")
            .and_then(Value::as_u64)
            .and_then(|op| u8::try_from(op).ok())
            .ok_or_else(|| BenchError::Decode("Payload has no valid op".to_string()))?;

        let data = match payload.get("d") {
            None | Some(Value::Null) => EventData::Empty,
            Some(d) => EventData::Value(d),
        };

        emit(&GatewayEvent {
            op,
            seq: payload.get("s").and_then(Value::as_u64),
            name: payload.get("t").and_then(Value::as_str),
            data,
        });
        Ok(())
    }
}

/// Decodes only `op`, `s` and `t`, handing `d` on as a borrowed slice
pub struct EnvelopeDecoder {
    encoding: Encoding,
    /// Inflated compressed terms, reused across messages
    scratch: Vec<u8>,
}

impl EnvelopeDecoder {
    /// Create a decoder for an encoding
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            scratch: Vec::new(),
        }
    }
}

impl Decode for EnvelopeDecoder {
    fn decode(&mut self, message: &[u8], emit: &mut dyn FnMut(&GatewayEvent<'_>)) -> Result<()> {
        let encoding = self.encoding;
        let envelope = codec::decode_envelope(encoding, message, &mut self.scratch)?;
        let data = envelope
            .data
            .map_or(EventData::Empty, |bytes| EventData::Raw { bytes, encoding });

        emit(&GatewayEvent {
            op: envelope.op,
            seq: envelope.seq,
            name: envelope.name.as_deref(),
            data,
        });
        Ok(())
    }
}
