//! Fixture file reader

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use super::fixture::{CapturedSession, FixtureIn};
use crate::{BenchError, Result};

/// Reader for fixture files
pub struct FixtureReader;

impl FixtureReader {
    /// Load a fixture from disk
    ///
    /// The file is memory-mapped and parsed in one pass. Profiles are not
    /// checked here, see [`CapturedSession::validate`].
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable or not a fixture
    pub fn open(path: &Path) -> Result<CapturedSession> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BenchError::FixtureNotFound(path.display().to_string()),
            _ => BenchError::Io(e),
        })?;

        if file.metadata()?.len() == 0 {
            return Err(BenchError::InvalidFormat(format!(
                "{} is empty",
                path.display()
            )));
        }

        let mmap = unsafe { Mmap::map(&file)? };

        let document: FixtureIn = serde_json::from_slice(&mmap)
            .map_err(|e| BenchError::InvalidFormat(format!("{}: {e}", path.display())))?;
        let session = document.into_session()?;

        debug!(
            "Loaded {} ({} events, {} frames, {} bytes)",
            path.display(),
            session.expected_events,
            session.frames.len(),
            session.total_bytes()
        );

        Ok(session)
    }
}
