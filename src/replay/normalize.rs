//! Shaping a captured session into a replay workload

use bytes::Bytes;
use tracing::debug;

/// Event cap for a regular run
pub const EVENT_CAP: u64 = 5_000;

/// Event cap for an extended run
pub const EXTENDED_EVENT_CAP: u64 = 50_000;

/// How many times an extended run repeats the capture
pub const EXTENDED_REPEAT: usize = 10;

/// Trailing events a compressed capture cannot reproduce
pub const COMPRESSED_SHORTFALL: u64 = 2;

/// Frames to push and the number of events to wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Frames in push order
    pub frames: Vec<Bytes>,
    /// Target for the run's event counter
    pub expected_events: u64,
}

/// Apply the replay rules to a capture
///
/// Extended runs drop the first frame and repeat the rest, scaling the
/// expected count to match before capping it. Compressed runs expect two
/// fewer events since the final messages of a capture depend on inflate
/// state that was never recorded.
#[must_use]
pub fn normalize(frames: &[Bytes], count: u64, extended: bool, compression: bool) -> Workload {
    let (frames, mut expected) = if extended {
        let rest = frames.get(1..).unwrap_or_default();
        let mut tiled = Vec::with_capacity(rest.len() * EXTENDED_REPEAT);
        for _ in 0..EXTENDED_REPEAT {
            tiled.extend(rest.iter().cloned());
        }
        let expected = count.saturating_sub(1).saturating_mul(EXTENDED_REPEAT as u64);
        (tiled, expected.min(EXTENDED_EVENT_CAP))
    } else {
        (frames.to_vec(), count.min(EVENT_CAP))
    };

    if compression {
        expected = expected.saturating_sub(COMPRESSED_SHORTFALL);
    }

    debug!(
        frames = frames.len(),
        expected, extended, compression, "Normalized capture"
    );

    Workload {
        frames,
        expected_events: expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames(n: usize) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(i.to_string())).collect()
    }

    #[test]
    fn test_regular_caps_count() {
        assert_eq!(normalize(&frames(3), 3, false, false).expected_events, 3);
        assert_eq!(normalize(&frames(3), 12_000, false, false).expected_events, 5_000);
    }

    #[test]
    fn test_compressed_subtracts_two() {
        let workload = normalize(&frames(100), 100, false, true);
        assert_eq!(workload.expected_events, 98);
        assert_eq!(workload.frames.len(), 100);

        assert_eq!(normalize(&frames(1), 1, false, true).expected_events, 0);
    }

    #[test]
    fn test_extended_tiles_after_first_frame() {
        let input = frames(4);
        let workload = normalize(&input, 4, true, false);

        assert_eq!(workload.expected_events, 30);
        assert_eq!(workload.frames.len(), 30);
        assert_eq!(workload.frames[0], input[1]);
        assert_eq!(workload.frames[3], input[1]);
        assert_eq!(workload.frames[29], input[3]);
    }

    #[test]
    fn test_extended_caps_count() {
        let workload = normalize(&frames(10), 10_000, true, false);
        assert_eq!(workload.expected_events, 50_000);
    }

    #[test]
    fn test_extended_huge_count_saturates() {
        let workload = normalize(&frames(3), u64::MAX, true, false);
        assert_eq!(workload.expected_events, EXTENDED_EVENT_CAP);
    }

    #[test]
    fn test_extended_empty_capture() {
        let workload = normalize(&[], 0, true, false);
        assert!(workload.frames.is_empty());
        assert_eq!(workload.expected_events, 0);
    }

    proptest! {
        #[test]
        fn prop_regular_expected_never_exceeds_cap(count in 0u64..100_000, compression: bool) {
            let workload = normalize(&frames(2), count, false, compression);
            prop_assert!(workload.expected_events <= EVENT_CAP);
            prop_assert_eq!(workload.frames.len(), 2);
        }

        #[test]
        fn prop_extended_tiles_tenfold(n in 1usize..40, count in 1u64..10_000) {
            let workload = normalize(&frames(n), count, true, false);
            prop_assert_eq!(workload.frames.len(), (n - 1) * EXTENDED_REPEAT);
            prop_assert_eq!(
                workload.expected_events,
                ((count - 1) * EXTENDED_REPEAT as u64).min(EXTENDED_EVENT_CAP)
            );
        }
    }
}
