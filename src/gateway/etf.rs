//! Erlang external term format (ETF) codec
//!
//! Decodes the subset of terms the gateway produces into `serde_json`
//! values, so both encodings reach client code in the same shape.
//! Atoms `nil`, `true` and `false` map to null and booleans, binaries and
//! strings map to strings, tuples and lists map to arrays.

use std::borrow::Cow;

use serde_json::{Map, Number, Value};

use crate::{BenchError, Result};

/// Leading byte of every encoded term
pub const FORMAT_VERSION: u8 = 131;

/// Deepest nesting accepted while decoding
pub const MAX_DEPTH: usize = 256;

mod tag {
    pub const NEW_FLOAT: u8 = 70;
    pub const BIT_BINARY: u8 = 77;
    pub const COMPRESSED: u8 = 80;
    pub const SMALL_INTEGER: u8 = 97;
    pub const INTEGER: u8 = 98;
    pub const FLOAT: u8 = 99;
    pub const ATOM: u8 = 100;
    pub const SMALL_TUPLE: u8 = 104;
    pub const LARGE_TUPLE: u8 = 105;
    pub const NIL: u8 = 106;
    pub const STRING: u8 = 107;
    pub const LIST: u8 = 108;
    pub const BINARY: u8 = 109;
    pub const SMALL_BIG: u8 = 110;
    pub const LARGE_BIG: u8 = 111;
    pub const SMALL_ATOM: u8 = 115;
    pub const MAP: u8 = 116;
    pub const ATOM_UTF8: u8 = 118;
    pub const SMALL_ATOM_UTF8: u8 = 119;
}

/// Decode a complete term, version byte included
///
/// # Errors
///
/// Returns error on truncated input, unknown tags or excessive nesting
pub fn decode(input: &[u8]) -> Result<Value> {
    let mut scratch = Vec::new();
    let mut reader = Reader::new(expand(input, &mut scratch)?);
    reader.version()?;

    let value = reader.term(0)?;
    reader.finish()?;
    Ok(value)
}

/// Decode a term that has no version byte (a slice cut out of a larger term)
///
/// # Errors
///
/// Returns error on truncated input, unknown tags or excessive nesting
pub fn decode_term(input: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(input);
    let value = reader.term(0)?;
    reader.finish()?;
    Ok(value)
}

/// Top-level fields of a gateway payload, with `d` left undecoded
#[derive(Debug, Clone, Default)]
pub struct Envelope<'a> {
    /// `op`
    pub op: u8,
    /// `s`
    pub seq: Option<u64>,
    /// `t`
    pub name: Option<Cow<'a, str>>,
    /// `d` as a versionless term
    pub data: Option<&'a [u8]>,
}

/// Decode only the envelope of a payload map, skipping over `d`
///
/// A compressed term is inflated into `scratch` first; the envelope then
/// borrows from there.
///
/// # Errors
///
/// Returns error if the payload is not a map or is malformed
pub fn decode_envelope<'a>(input: &'a [u8], scratch: &'a mut Vec<u8>) -> Result<Envelope<'a>> {
    let input = expand(input, scratch)?;
    let mut reader = Reader::new(input);
    reader.version()?;

    if reader.u8()? != tag::MAP {
        return Err(BenchError::Decode(
            "ETF payload is not a map".to_string(),
        ));
    }

    let mut envelope = Envelope::default();
    let arity = reader.u32()?;
    for _ in 0..arity {
        let key = reader.key()?;
        match key.as_ref() {
            "op" => {
                envelope.op = reader
                    .term(1)?
                    .as_u64()
                    .and_then(|op| u8::try_from(op).ok())
                    .ok_or_else(|| BenchError::Decode("ETF op is not a small integer".to_string()))?;
            }
            "s" => envelope.seq = reader.term(1)?.as_u64(),
            "t" => {
                envelope.name = reader.optional_name()?;
            }
            "d" => {
                let start = reader.pos;
                reader.skip(1)?;
                envelope.data = Some(&input[start..reader.pos]);
            }
            _ => reader.skip(1)?,
        }
    }

    reader.finish()?;
    Ok(envelope)
}

/// `input` itself, or the versioned uncompressed term written to `scratch`
fn expand<'a>(input: &'a [u8], scratch: &'a mut Vec<u8>) -> Result<&'a [u8]> {
    let mut reader = Reader::new(input);
    reader.version()?;
    if reader.peek()? != tag::COMPRESSED {
        return Ok(input);
    }
    reader.pos += 1;

    scratch.clear();
    scratch.push(FORMAT_VERSION);
    inflate_term(&mut reader, scratch)?;
    Ok(scratch.as_slice())
}

/// Encode a value as a versioned term
#[must_use]
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = vec![FORMAT_VERSION];
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => encode_atom("nil", out),
        Value::Bool(true) => encode_atom("true", out),
        Value::Bool(false) => encode_atom("false", out),
        Value::Number(number) => encode_number(number, out),
        Value::String(s) => encode_binary(s.as_bytes(), out),
        Value::Array(items) => {
            if items.is_empty() {
                out.push(tag::NIL);
                return;
            }
            out.push(tag::LIST);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
            out.push(tag::NIL);
        }
        Value::Object(map) => {
            out.push(tag::MAP);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (key, item) in map {
                encode_binary(key.as_bytes(), out);
                encode_into(item, out);
            }
        }
    }
}

fn encode_atom(name: &str, out: &mut Vec<u8>) {
    out.push(tag::SMALL_ATOM_UTF8);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

fn encode_binary(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(tag::BINARY);
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn encode_number(number: &Number, out: &mut Vec<u8>) {
    if let Some(n) = number.as_u64() {
        if let Ok(small) = u8::try_from(n) {
            out.push(tag::SMALL_INTEGER);
            out.push(small);
        } else if let Ok(int) = i32::try_from(n) {
            out.push(tag::INTEGER);
            out.extend_from_slice(&int.to_be_bytes());
        } else {
            encode_big(n, false, out);
        }
    } else if let Some(n) = number.as_i64() {
        if let Ok(int) = i32::try_from(n) {
            out.push(tag::INTEGER);
            out.extend_from_slice(&int.to_be_bytes());
        } else {
            encode_big(n.unsigned_abs(), n < 0, out);
        }
    } else {
        out.push(tag::NEW_FLOAT);
        out.extend_from_slice(&number.as_f64().unwrap_or_default().to_be_bytes());
    }
}

fn encode_big(magnitude: u64, negative: bool, out: &mut Vec<u8>) {
    let digits = magnitude.to_le_bytes();
    let len = digits.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    out.push(tag::SMALL_BIG);
    out.push(len as u8);
    out.push(u8::from(negative));
    out.extend_from_slice(&digits[..len]);
}

/// Inflate the rest of `reader` onto the end of `out`
#[cfg(feature = "zlib")]
fn inflate_term(reader: &mut Reader<'_>, out: &mut Vec<u8>) -> Result<()> {
    use std::io::Read;

    let size = reader.u32()? as usize;
    let compressed = &reader.buf[reader.pos..];
    let start = out.len();
    out.reserve(size);
    flate2::read::ZlibDecoder::new(compressed)
        .read_to_end(out)
        .map_err(|e| BenchError::Decode(format!("Compressed ETF term: {e}")))?;
    reader.pos = reader.buf.len();

    let inflated = out.len() - start;
    if inflated != size {
        return Err(BenchError::Decode(format!(
            "Compressed ETF term inflated to {inflated} bytes, header says {size}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "zlib"))]
fn inflate_term(_reader: &mut Reader<'_>, _out: &mut Vec<u8>) -> Result<()> {
    Err(BenchError::Environment(
        "Compressed ETF terms require the `zlib` feature".to_string(),
    ))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn version(&mut self) -> Result<()> {
        let version = self.u8()?;
        if version != FORMAT_VERSION {
            return Err(BenchError::Decode(format!(
                "Unsupported ETF version {version}, expected {FORMAT_VERSION}"
            )));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(BenchError::Decode(format!(
                "{} trailing bytes after ETF term",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }

    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| BenchError::Decode("Unexpected end of ETF data".to_string()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                BenchError::Decode(format!(
                    "ETF term needs {len} bytes at offset {}, only {} left",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn term(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(BenchError::Decode(format!(
                "ETF nesting deeper than {MAX_DEPTH}"
            )));
        }

        let tag = self.u8()?;
        let value = match tag {
            tag::SMALL_INTEGER => Value::from(self.u8()?),
            tag::INTEGER => Value::from(self.u32()? as i32),
            tag::NEW_FLOAT => {
                let bytes = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                float_value(f64::from_be_bytes(raw))
            }
            tag::FLOAT => {
                let text = String::from_utf8_lossy(self.take(31)?);
                let parsed = text.trim_end_matches('\0').trim().parse::<f64>().map_err(|e| {
                    BenchError::Decode(format!("Invalid ETF float {text:?}: {e}"))
                })?;
                float_value(parsed)
            }
            tag::ATOM | tag::ATOM_UTF8 => {
                let len = self.u16()? as usize;
                atom_value(self.take(len)?)
            }
            tag::SMALL_ATOM | tag::SMALL_ATOM_UTF8 => {
                let len = self.u8()? as usize;
                atom_value(self.take(len)?)
            }
            tag::BINARY => {
                let len = self.u32()? as usize;
                Value::String(String::from_utf8_lossy(self.take(len)?).into_owned())
            }
            tag::BIT_BINARY => {
                let len = self.u32()? as usize;
                self.u8()?;
                Value::String(String::from_utf8_lossy(self.take(len)?).into_owned())
            }
            tag::STRING => {
                let len = self.u16()? as usize;
                Value::String(String::from_utf8_lossy(self.take(len)?).into_owned())
            }
            tag::NIL => Value::Array(Vec::new()),
            tag::LIST => {
                let len = self.u32()? as usize;
                let mut items = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    items.push(self.term(depth + 1)?);
                }
                match self.term(depth + 1)? {
                    Value::Array(tail) if tail.is_empty() => {}
                    tail => items.push(tail),
                }
                Value::Array(items)
            }
            tag::SMALL_TUPLE => {
                let arity = self.u8()? as usize;
                self.items(arity, depth)?
            }
            tag::LARGE_TUPLE => {
                let arity = self.u32()? as usize;
                self.items(arity, depth)?
            }
            tag::MAP => {
                let arity = self.u32()? as usize;
                let mut map = Map::new();
                for _ in 0..arity {
                    let key = match self.term(depth + 1)? {
                        Value::String(key) => key,
                        other => other.to_string(),
                    };
                    let value = self.term(depth + 1)?;
                    map.insert(key, value);
                }
                Value::Object(map)
            }
            tag::SMALL_BIG => {
                let len = self.u8()? as usize;
                self.big(len)?
            }
            tag::LARGE_BIG => {
                let len = self.u32()? as usize;
                self.big(len)?
            }
            other => {
                return Err(BenchError::Decode(format!(
                    "Unsupported ETF tag {other} at offset {}",
                    self.pos - 1
                )))
            }
        };

        Ok(value)
    }

    fn items(&mut self, arity: usize, depth: usize) -> Result<Value> {
        let mut items = Vec::with_capacity(arity.min(self.remaining()));
        for _ in 0..arity {
            items.push(self.term(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn big(&mut self, len: usize) -> Result<Value> {
        let negative = self.u8()? != 0;
        let digits = self.take(len)?;

        if digits.iter().skip(8).any(|&b| b != 0) {
            return Err(BenchError::Decode(format!(
                "ETF big integer of {len} bytes does not fit in 64 bits"
            )));
        }

        let magnitude = digits
            .iter()
            .take(8)
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)));

        if !negative {
            return Ok(Value::from(magnitude));
        }

        Ok(match i64::try_from(magnitude) {
            Ok(n) => Value::from(-n),
            Err(_) if magnitude == i64::MIN.unsigned_abs() => Value::from(i64::MIN),
            Err(_) => Value::String(format!("-{magnitude}")),
        })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read a map key that is expected to be an atom or a binary
    fn key(&mut self) -> Result<Cow<'a, str>> {
        match self.peek()? {
            tag::ATOM | tag::ATOM_UTF8 => {
                self.pos += 1;
                let len = self.u16()? as usize;
                Ok(String::from_utf8_lossy(self.take(len)?))
            }
            tag::SMALL_ATOM | tag::SMALL_ATOM_UTF8 => {
                self.pos += 1;
                let len = self.u8()? as usize;
                Ok(String::from_utf8_lossy(self.take(len)?))
            }
            tag::BINARY => {
                self.pos += 1;
                let len = self.u32()? as usize;
                Ok(String::from_utf8_lossy(self.take(len)?))
            }
            _ => match self.term(1)? {
                Value::String(key) => Ok(Cow::Owned(key)),
                other => Ok(Cow::Owned(other.to_string())),
            },
        }
    }

    /// Read the dispatch name, where the `nil` atom means no name
    fn optional_name(&mut self) -> Result<Option<Cow<'a, str>>> {
        match self.peek()? {
            tag::ATOM | tag::ATOM_UTF8 | tag::SMALL_ATOM | tag::SMALL_ATOM_UTF8 | tag::BINARY => {
                let name = self.key()?;
                Ok((name != "nil").then_some(name))
            }
            _ => Ok(self.term(1)?.as_str().map(|s| Cow::Owned(s.to_string()))),
        }
    }

    fn skip(&mut self, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(BenchError::Decode(format!(
                "ETF nesting deeper than {MAX_DEPTH}"
            )));
        }

        let tag = self.u8()?;
        match tag {
            tag::SMALL_INTEGER => {
                self.take(1)?;
            }
            tag::INTEGER => {
                self.take(4)?;
            }
            tag::NEW_FLOAT => {
                self.take(8)?;
            }
            tag::FLOAT => {
                self.take(31)?;
            }
            tag::ATOM | tag::ATOM_UTF8 | tag::STRING => {
                let len = self.u16()? as usize;
                self.take(len)?;
            }
            tag::SMALL_ATOM | tag::SMALL_ATOM_UTF8 => {
                let len = self.u8()? as usize;
                self.take(len)?;
            }
            tag::BINARY => {
                let len = self.u32()? as usize;
                self.take(len)?;
            }
            tag::BIT_BINARY => {
                let len = self.u32()? as usize;
                self.take(len + 1)?;
            }
            tag::NIL => {}
            tag::LIST => {
                let len = self.u32()?;
                for _ in 0..=len {
                    self.skip(depth + 1)?;
                }
            }
            tag::SMALL_TUPLE => {
                let arity = self.u8()?;
                for _ in 0..arity {
                    self.skip(depth + 1)?;
                }
            }
            tag::LARGE_TUPLE => {
                let arity = self.u32()?;
                for _ in 0..arity {
                    self.skip(depth + 1)?;
                }
            }
            tag::MAP => {
                let arity = self.u32()?;
                for _ in 0..arity {
                    self.skip(depth + 1)?;
                    self.skip(depth + 1)?;
                }
            }
            tag::SMALL_BIG => {
                let len = self.u8()? as usize;
                self.take(len + 1)?;
            }
            tag::LARGE_BIG => {
                let len = self.u32()? as usize;
                self.take(len + 1)?;
            }
            other => {
                return Err(BenchError::Decode(format!(
                    "Unsupported ETF tag {other} at offset {}",
                    self.pos - 1
                )))
            }
        }
        Ok(())
    }
}

fn atom_value(name: &[u8]) -> Value {
    match name {
        b"nil" => Value::Null,
        b"true" => Value::Bool(true),
        b"false" => Value::Bool(false),
        other => Value::String(String::from_utf8_lossy(other).into_owned()),
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "op": 0,
            "s": 42,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "1100000000000000000",
                "content": "hello ünïcode",
                "tts": false,
                "pinned": true,
                "edited_timestamp": null,
                "mentions": [],
                "attachments": [{"size": 70000, "width": -12}],
                "nonce": 18446744073709551615u64,
                "ratio": 0.5,
            }
        })
    }

    #[test]
    fn test_encode_decode_matches_json() {
        let payload = sample_payload();
        let encoded = encode(&payload);
        assert_eq!(encoded[0], FORMAT_VERSION);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_envelope_skips_data() {
        let payload = sample_payload();
        let encoded = encode(&payload);

        let mut scratch = Vec::new();
        let envelope = decode_envelope(&encoded, &mut scratch).unwrap();
        assert_eq!(envelope.op, 0);
        assert_eq!(envelope.seq, Some(42));
        assert_eq!(envelope.name.as_deref(), Some("MESSAGE_CREATE"));

        let data = decode_term(envelope.data.unwrap()).unwrap();
        assert_eq!(data, payload["d"]);
        assert!(scratch.is_empty());
    }

    #[test]
    fn test_envelope_nil_fields() {
        let encoded = encode(&json!({"op": 11, "s": null, "t": null, "d": null}));
        let mut scratch = Vec::new();
        let envelope = decode_envelope(&encoded, &mut scratch).unwrap();
        assert_eq!(envelope.op, 11);
        assert_eq!(envelope.seq, None);
        assert!(envelope.name.is_none());
        assert_eq!(decode_term(envelope.data.unwrap()).unwrap(), Value::Null);
    }

    #[test]
    fn test_atom_keys_and_tuples() {
        // {op: 10, d: {heartbeat_interval: 41250}} with atom keys, plus a tuple
        let mut bytes = vec![FORMAT_VERSION, tag::MAP, 0, 0, 0, 3];
        bytes.extend_from_slice(&[tag::SMALL_ATOM_UTF8, 2, b'o', b'p', tag::SMALL_INTEGER, 10]);
        bytes.extend_from_slice(&[tag::ATOM, 0, 1, b'd', tag::MAP, 0, 0, 0, 1]);
        bytes.extend_from_slice(&[tag::SMALL_ATOM_UTF8, 18]);
        bytes.extend_from_slice(b"heartbeat_interval");
        bytes.push(tag::INTEGER);
        bytes.extend_from_slice(&41250i32.to_be_bytes());
        bytes.extend_from_slice(&[tag::SMALL_ATOM, 1, b'x', tag::SMALL_TUPLE, 2]);
        bytes.extend_from_slice(&[tag::SMALL_INTEGER, 1, tag::STRING, 0, 2, b'o', b'k']);

        let value = decode(&bytes).unwrap();
        assert_eq!(value["op"], 10);
        assert_eq!(value["d"]["heartbeat_interval"], 41250);
        assert_eq!(value["x"], json!([1, "ok"]));

        let mut scratch = Vec::new();
        let envelope = decode_envelope(&bytes, &mut scratch).unwrap();
        assert_eq!(envelope.op, 10);
    }

    #[test]
    fn test_negative_big_integer() {
        let encoded = encode(&json!(i64::MIN));
        assert_eq!(decode(&encoded).unwrap(), json!(i64::MIN));

        let encoded = encode(&json!(-5_000_000_000i64));
        assert_eq!(decode(&encoded).unwrap(), json!(-5_000_000_000i64));
    }

    #[test]
    fn test_rejects_truncated_and_unknown() {
        let encoded = encode(&sample_payload());
        assert!(decode(&encoded[..encoded.len() - 3]).is_err());
        assert!(decode(&[FORMAT_VERSION, 255]).is_err());
        assert!(decode(&[130, tag::NIL]).is_err());
        assert!(decode_envelope(&encode(&json!([1, 2])), &mut Vec::new()).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut encoded = encode(&json!(1));
        encoded.push(0);
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = vec![FORMAT_VERSION];
        for _ in 0..=MAX_DEPTH + 1 {
            bytes.extend_from_slice(&[tag::SMALL_TUPLE, 1]);
        }
        bytes.push(tag::NIL);
        assert!(decode(&bytes).is_err());
    }

    #[cfg(feature = "zlib")]
    fn compress(value: &Value) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let term = &encode(value)[1..];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(term).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = vec![FORMAT_VERSION, tag::COMPRESSED];
        bytes.extend_from_slice(&(term.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&compressed);
        bytes
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_compressed_term() {
        let payload = sample_payload();
        assert_eq!(decode(&compress(&payload)).unwrap(), payload);
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn test_compressed_term_envelope() {
        let payload = sample_payload();
        let bytes = compress(&payload);

        let mut scratch = Vec::new();
        let envelope = decode_envelope(&bytes, &mut scratch).unwrap();
        assert_eq!(envelope.op, 0);
        assert_eq!(envelope.seq, Some(42));
        assert_eq!(envelope.name.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(decode_term(envelope.data.unwrap()).unwrap(), payload["d"]);

        // scratch is reused for the next message
        let next = compress(&json!({"op": 11, "d": null}));
        assert_eq!(decode_envelope(&next, &mut scratch).unwrap().op, 11);
    }
}
