//! In-memory captured session and its on-disk document shape

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Category, Encoding, StreamMode};
use crate::fingerprint::session_digest_hex;
use crate::{BenchError, Result};

/// Frames and expected event count of one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedSession {
    /// Logical events the reference client counted
    pub expected_events: u64,
    /// Raw frames in arrival order
    pub frames: Vec<Bytes>,
    /// How the capture was taken, if the file records it
    pub profile: Option<SessionProfile>,
}

/// Capture settings and content digest stored alongside the frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProfile {
    /// Category captured
    pub category: Category,
    /// Payload encoding captured
    pub encoding: Encoding,
    /// Whether frames are zlib-stream compressed
    pub compression: bool,
    /// Number of frames written
    pub frames: usize,
    /// Hex SHA-256, see [`crate::fingerprint::session_digest`]
    pub digest: String,
}

impl CapturedSession {
    /// Create a session without a profile
    #[must_use]
    pub fn new(expected_events: u64, frames: Vec<Bytes>) -> Self {
        Self {
            expected_events,
            frames,
            profile: None,
        }
    }

    /// Attach a profile describing this session under `mode`
    #[must_use]
    pub fn with_profile(mut self, mode: &StreamMode) -> Self {
        self.profile = Some(SessionProfile {
            category: mode.category,
            encoding: mode.encoding,
            compression: mode.compression,
            frames: self.frames.len(),
            digest: self.digest(),
        });
        self
    }

    /// Hex content digest of the frames as they are now
    #[must_use]
    pub fn digest(&self) -> String {
        session_digest_hex(self.expected_events, &self.frames)
    }

    /// Total frame bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Check the embedded profile against a requested mode
    ///
    /// Sessions without a profile are accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::FixtureMismatch`] if any recorded setting differs
    /// or the frames no longer match the digest
    pub fn validate(&self, mode: &StreamMode) -> Result<()> {
        let Some(profile) = &self.profile else {
            return Ok(());
        };

        check("category", mode.category, profile.category)?;
        check("encoding", mode.encoding, profile.encoding)?;
        check("compression", mode.compression, profile.compression)?;
        check("frame count", profile.frames, self.frames.len())?;
        check("digest", profile.digest.as_str(), self.digest().as_str())?;

        Ok(())
    }
}

fn check<T: PartialEq + ToString>(field: &'static str, expected: T, found: T) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(BenchError::FixtureMismatch {
            field,
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

/// Fixture document as written
#[derive(Serialize)]
pub(super) struct FixtureOut<'a> {
    pub count: u64,
    pub data: Vec<FrameOut<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<&'a SessionProfile>,
}

/// Text frames stay readable; everything else is a byte array
#[derive(Serialize)]
#[serde(untagged)]
pub(super) enum FrameOut<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> FixtureOut<'a> {
    pub fn new(session: &'a CapturedSession, text_frames: bool) -> Self {
        let data = session
            .frames
            .iter()
            .map(|frame| match std::str::from_utf8(frame) {
                Ok(text) if text_frames => FrameOut::Text(text),
                _ => FrameOut::Bytes(frame),
            })
            .collect();

        Self {
            count: session.expected_events,
            data,
            profile: session.profile.as_ref(),
        }
    }
}

/// Fixture document as read, in any of the accepted frame shapes
#[derive(Deserialize)]
pub(super) struct FixtureIn {
    pub count: u64,
    pub data: Vec<FrameIn>,
    #[serde(default)]
    pub profile: Option<SessionProfile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(super) enum FrameIn {
    Text(String),
    Bytes(Vec<u8>),
    Buffer(NodeBuffer),
    /// A message that was stored already parsed
    Structure(Value),
}

/// `{"type": "Buffer", "data": [...]}`
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct NodeBuffer {
    #[serde(rename = "type")]
    _tag: BufferTag,
    data: Vec<u8>,
}

#[derive(Deserialize)]
enum BufferTag {
    Buffer,
}

impl FrameIn {
    pub fn into_bytes(self) -> Result<Bytes> {
        Ok(match self {
            Self::Text(text) => Bytes::from(text),
            Self::Bytes(bytes) | Self::Buffer(NodeBuffer { data: bytes, .. }) => Bytes::from(bytes),
            Self::Structure(value) => Bytes::from(serde_json::to_vec(&value)?),
        })
    }
}

impl FixtureIn {
    pub fn into_session(self) -> Result<CapturedSession> {
        let frames = self
            .data
            .into_iter()
            .map(FrameIn::into_bytes)
            .collect::<Result<Vec<_>>>()?;

        Ok(CapturedSession {
            expected_events: self.count,
            frames,
            profile: self.profile,
        })
    }
}
