//! Payload decoding and encoding for both wire encodings

use std::borrow::Cow;

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Encoding;
#[cfg(not(feature = "etf"))]
use crate::BenchError;
use crate::Result;

/// Top-level fields of a payload with `d` left undecoded
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    /// `op`
    pub op: u8,
    /// `s`
    pub seq: Option<u64>,
    /// `t`
    pub name: Option<Cow<'a, str>>,
    /// Raw `d` (absent or null when `None`)
    pub data: Option<&'a [u8]>,
}

#[derive(Deserialize)]
struct JsonEnvelope<'a> {
    op: u8,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default, borrow)]
    t: Option<Cow<'a, str>>,
    #[serde(default, borrow)]
    d: Option<&'a RawValue>,
}

/// Decode a whole payload into a value tree
///
/// # Errors
///
/// Returns error if the payload is malformed or the encoding is not built in
pub fn decode_value(encoding: Encoding, payload: &[u8]) -> Result<Value> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(payload)?),
        Encoding::Etf => decode_etf(payload),
    }
}

/// Decode a payload fragment cut out by [`decode_envelope`]
///
/// # Errors
///
/// Returns error if the fragment is malformed or the encoding is not built in
pub fn decode_fragment(encoding: Encoding, fragment: &[u8]) -> Result<Value> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(fragment)?),
        Encoding::Etf => decode_etf_fragment(fragment),
    }
}

/// Decode `op`, `s` and `t` only
///
/// `scratch` holds the inflated term when an ETF payload arrives compressed.
///
/// # Errors
///
/// Returns error if the envelope is malformed or the encoding is not built in
pub fn decode_envelope<'a>(
    encoding: Encoding,
    payload: &'a [u8],
    scratch: &'a mut Vec<u8>,
) -> Result<Envelope<'a>> {
    match encoding {
        Encoding::Json => {
            let envelope: JsonEnvelope<'_> = serde_json::from_slice(payload)?;
            Ok(Envelope {
                op: envelope.op,
                seq: envelope.s,
                name: envelope.t,
                data: envelope.d.map(|raw| raw.get().as_bytes()),
            })
        }
        Encoding::Etf => etf_envelope(payload, scratch),
    }
}

/// Encode an outbound payload as a WebSocket message
///
/// # Errors
///
/// Returns error if the encoding is not built in
pub fn encode_message(encoding: Encoding, payload: &Value) -> Result<Message> {
    match encoding {
        Encoding::Json => Ok(Message::Text(serde_json::to_string(payload)?)),
        Encoding::Etf => encode_etf(payload).map(Message::Binary),
    }
}

/// Encode a payload as the bytes a server would send
///
/// # Errors
///
/// Returns error if the encoding is not built in
pub fn encode_bytes(encoding: Encoding, payload: &Value) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(payload)?),
        Encoding::Etf => encode_etf(payload),
    }
}

#[cfg(feature = "etf")]
fn decode_etf(payload: &[u8]) -> Result<Value> {
    super::etf::decode(payload)
}

#[cfg(feature = "etf")]
fn decode_etf_fragment(fragment: &[u8]) -> Result<Value> {
    super::etf::decode_term(fragment)
}

#[cfg(feature = "etf")]
fn etf_envelope<'a>(payload: &'a [u8], scratch: &'a mut Vec<u8>) -> Result<Envelope<'a>> {
    let envelope = super::etf::decode_envelope(payload, scratch)?;
    Ok(Envelope {
        op: envelope.op,
        seq: envelope.seq,
        name: envelope.name,
        data: envelope.data,
    })
}

#[cfg(feature = "etf")]
#[allow(clippy::unnecessary_wraps)]
fn encode_etf(payload: &Value) -> Result<Vec<u8>> {
    Ok(super::etf::encode(payload))
}

#[cfg(not(feature = "etf"))]
fn etf_missing<T>() -> Result<T> {
    Err(BenchError::Environment(
        "This build has no ETF support; rebuild with the `etf` feature".to_string(),
    ))
}

#[cfg(not(feature = "etf"))]
fn decode_etf(_payload: &[u8]) -> Result<Value> {
    etf_missing()
}

#[cfg(not(feature = "etf"))]
fn decode_etf_fragment(_fragment: &[u8]) -> Result<Value> {
    etf_missing()
}

#[cfg(not(feature = "etf"))]
fn etf_envelope<'a>(_payload: &'a [u8], _scratch: &'a mut Vec<u8>) -> Result<Envelope<'a>> {
    etf_missing()
}

#[cfg(not(feature = "etf"))]
fn encode_etf(_payload: &Value) -> Result<Vec<u8>> {
    etf_missing()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_envelope() {
        let payload = br#"{"t":"MESSAGE_CREATE","s":7,"op":0,"d":{"content":"hi","id":"1"}}"#;
        let mut scratch = Vec::new();
        let envelope = decode_envelope(Encoding::Json, payload, &mut scratch).unwrap();

        assert_eq!(envelope.op, 0);
        assert_eq!(envelope.seq, Some(7));
        assert_eq!(envelope.name.as_deref(), Some("MESSAGE_CREATE"));

        let data = decode_fragment(Encoding::Json, envelope.data.unwrap()).unwrap();
        assert_eq!(data, json!({"content": "hi", "id": "1"}));
    }

    #[test]
    fn test_json_envelope_without_dispatch_fields() {
        let mut scratch = Vec::new();
        let payload = br#"{"op":11}"#;
        let envelope = decode_envelope(Encoding::Json, payload, &mut scratch).unwrap();
        assert_eq!(envelope.op, 11);
        assert!(envelope.seq.is_none());
        assert!(envelope.name.is_none());
        assert!(envelope.data.is_none());

        let payload = br#"{"op":10,"s":null,"t":null,"d":{"heartbeat_interval":41250}}"#;
        let envelope = decode_envelope(Encoding::Json, payload, &mut scratch).unwrap();
        assert_eq!(envelope.op, 10);
        assert!(envelope.name.is_none());
    }

    #[test]
    fn test_json_malformed() {
        assert!(decode_envelope(Encoding::Json, b"{\"op\":", &mut Vec::new()).is_err());
        assert!(decode_value(Encoding::Json, b"not json").is_err());
    }

    #[test]
    fn test_encode_message_json() {
        let message = encode_message(Encoding::Json, &json!({"op": 1, "d": null})).unwrap();
        assert!(matches!(message, Message::Text(text) if text == r#"{"d":null,"op":1}"#));
    }

    #[cfg(feature = "etf")]
    #[test]
    fn test_envelope_agrees_with_full_decode() {
        let payload = json!({"op": 0, "s": 3, "t": "GUILD_CREATE", "d": {"id": "9", "members": [1, 2]}});

        for encoding in [Encoding::Json, Encoding::Etf] {
            let bytes = encode_bytes(encoding, &payload).unwrap();
            let full = decode_value(encoding, &bytes).unwrap();
            let mut scratch = Vec::new();
            let envelope = decode_envelope(encoding, &bytes, &mut scratch).unwrap();

            assert_eq!(full["op"], u64::from(envelope.op));
            assert_eq!(full["s"], envelope.seq.unwrap());
            assert_eq!(full["t"], envelope.name.as_deref().unwrap());
            assert_eq!(
                decode_fragment(encoding, envelope.data.unwrap()).unwrap(),
                full["d"]
            );
        }
    }
}
