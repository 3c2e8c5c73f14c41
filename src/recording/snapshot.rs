//! Tracks when a guild snapshot has been fully delivered

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Guild delivery progress after READY
///
/// The snapshot is complete once every guild READY announced has arrived,
/// or once no new guild arrived for the wait period.
#[derive(Debug)]
pub struct GuildSnapshot {
    wait: Duration,
    expected: Option<HashSet<String>>,
    delivered: HashSet<String>,
    last_progress: Option<Instant>,
}

impl GuildSnapshot {
    /// Create a tracker that gives up after `wait` without progress
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            expected: None,
            delivered: HashSet::new(),
            last_progress: None,
        }
    }

    /// READY arrived announcing these guild ids
    pub fn ready<I: IntoIterator<Item = String>>(&mut self, guilds: I, now: Instant) {
        self.expected = Some(guilds.into_iter().collect());
        self.last_progress = Some(now);
    }

    /// A guild was delivered
    pub fn guild(&mut self, id: String, now: Instant) {
        if self.delivered.insert(id) && self.expected.is_some() {
            self.last_progress = Some(now);
        }
    }

    /// Whether every announced guild has been delivered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected
            .as_ref()
            .is_some_and(|expected| expected.is_subset(&self.delivered))
    }

    /// Guilds announced but not yet delivered
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.expected
            .as_ref()
            .map_or(0, |expected| expected.difference(&self.delivered).count())
    }

    /// When the wait for the next guild runs out; `None` before READY
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.last_progress.map(|at| at + self.wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_incomplete_before_ready() {
        let mut snapshot = GuildSnapshot::new(Duration::from_secs(15));
        snapshot.guild("1".to_string(), Instant::now());

        assert!(!snapshot.is_complete());
        assert!(snapshot.deadline().is_none());
    }

    #[test]
    fn test_complete_when_all_delivered() {
        let now = Instant::now();
        let mut snapshot = GuildSnapshot::new(Duration::from_secs(15));
        snapshot.ready(ids(&["1", "2", "3"]), now);
        assert_eq!(snapshot.outstanding(), 3);

        snapshot.guild("1".to_string(), now);
        snapshot.guild("3".to_string(), now);
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.outstanding(), 1);

        snapshot.guild("2".to_string(), now);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_empty_ready_is_complete() {
        let mut snapshot = GuildSnapshot::new(Duration::from_secs(15));
        snapshot.ready(Vec::new(), Instant::now());
        assert!(snapshot.is_complete());
    }

    #[test]
    fn test_deadline_moves_with_progress() {
        let start = Instant::now();
        let wait = Duration::from_secs(15);
        let mut snapshot = GuildSnapshot::new(wait);
        snapshot.ready(ids(&["1", "2"]), start);
        assert_eq!(snapshot.deadline(), Some(start + wait));

        let later = start + Duration::from_secs(5);
        snapshot.guild("1".to_string(), later);
        assert_eq!(snapshot.deadline(), Some(later + wait));

        snapshot.guild("1".to_string(), later + Duration::from_secs(5));
        assert_eq!(snapshot.deadline(), Some(later + wait));
    }
}
