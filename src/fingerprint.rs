//! Content digest of a captured session
//!
//! The digest is what a fixture profile records so a later load can tell
//! whether the frames were edited, truncated or reordered since capture.

use sha2::{Digest, Sha256};

/// SHA-256 over the expected event count and every frame in order
///
/// Each frame is length-prefixed so that moving bytes across a frame
/// boundary changes the digest.
#[must_use]
pub fn session_digest<B: AsRef<[u8]>>(expected_events: u64, frames: &[B]) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update(expected_events.to_le_bytes());
    hasher.update((frames.len() as u64).to_le_bytes());

    for frame in frames {
        let frame = frame.as_ref();
        hasher.update((frame.len() as u64).to_le_bytes());
        hasher.update(frame);
    }

    hasher.finalize().into()
}

/// Hex form of [`session_digest`], as stored in fixtures
#[must_use]
pub fn session_digest_hex<B: AsRef<[u8]>>(expected_events: u64, frames: &[B]) -> String {
    hex::encode(session_digest(expected_events, frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let frames = [&b"hello"[..], &b"world"[..]];
        assert_eq!(session_digest(2, &frames), session_digest(2, &frames));
    }

    #[test]
    fn test_digest_covers_count() {
        let frames = [&b"hello"[..]];
        assert_ne!(session_digest(1, &frames), session_digest(2, &frames));
    }

    #[test]
    fn test_frame_boundaries_matter() {
        let split = [&b"ab"[..], &b"c"[..]];
        let joined = [&b"a"[..], &b"bc"[..]];
        assert_ne!(session_digest(1, &split), session_digest(1, &joined));
    }

    #[test]
    fn test_frame_order_matters() {
        let forward = [&b"a"[..], &b"b"[..]];
        let reverse = [&b"b"[..], &b"a"[..]];
        assert_ne!(session_digest(2, &forward), session_digest(2, &reverse));
    }

    #[test]
    fn test_frame_lengths_are_u64_prefixed() {
        let frame = b"frame";
        let mut hasher = Sha256::new();
        hasher.update(1u64.to_le_bytes());
        hasher.update(1u64.to_le_bytes());
        hasher.update(5u64.to_le_bytes());
        hasher.update(frame);
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(session_digest(1, &[&frame[..]]), expected);
    }

    #[test]
    fn test_hex_form() {
        let digest = session_digest_hex::<&[u8]>(0, &[]);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
