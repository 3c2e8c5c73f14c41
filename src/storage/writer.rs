//! Fixture file writer

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use super::fixture::{CapturedSession, FixtureOut};
use crate::config::{Encoding, StreamMode};
use crate::Result;

/// Writer for fixture files
pub struct FixtureWriter;

impl FixtureWriter {
    /// Persist a session captured under `mode`
    ///
    /// A profile is attached if the session has none. Uncompressed JSON
    /// frames are stored as text, all other frames as byte arrays.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn write(path: &Path, session: &CapturedSession, mode: &StreamMode) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let profiled;
        let session = if session.profile.is_some() {
            session
        } else {
            profiled = session.clone().with_profile(mode);
            &profiled
        };

        let text_frames = mode.encoding == Encoding::Json && !mode.compression;
        let document = FixtureOut::new(session, text_frames);

        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut out, &document)?;
        out.flush()?;

        info!(
            "Wrote {} ({} events, {} frames, {} bytes)",
            path.display(),
            session.expected_events,
            session.frames.len(),
            session.total_bytes()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Category;
    use crate::storage::FixtureReader;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn mode(encoding: Encoding, compression: bool) -> StreamMode {
        StreamMode {
            category: Category::Guilds,
            encoding,
            compression,
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let mode = mode(Encoding::Json, false);
        let path = dir.path().join(mode.fixture_name());
        let session = CapturedSession::new(
            2,
            vec![
                Bytes::from_static(br#"{"op":10,"d":{"heartbeat_interval":1}}"#),
                Bytes::from_static(br#"{"op":0,"s":1,"t":"READY","d":{}}"#),
            ],
        );

        FixtureWriter::write(&path, &session, &mode).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""{\"op\":10"#));

        let loaded = FixtureReader::open(&path).unwrap();
        assert_eq!(loaded.frames, session.frames);
        assert_eq!(loaded.expected_events, 2);
        assert!(loaded.validate(&mode).is_ok());
    }

    #[test]
    fn test_creates_fixture_dir() {
        let dir = TempDir::new().unwrap();
        let mode = mode(Encoding::Etf, true);
        let path = dir.path().join("nested").join(mode.fixture_name());

        FixtureWriter::write(&path, &CapturedSession::new(0, vec![]), &mode).unwrap();
        assert!(path.ends_with("guilds-etf-zlib.json"));
        assert!(path.exists());
    }

    #[test]
    fn test_existing_profile_kept() {
        let dir = TempDir::new().unwrap();
        let captured = mode(Encoding::Json, true);
        let path = dir.path().join("copy.json");
        let session = CapturedSession::new(1, vec![Bytes::from_static(b"\x78\x9c")]).with_profile(&captured);

        FixtureWriter::write(&path, &session, &mode(Encoding::Json, false)).unwrap();

        let loaded = FixtureReader::open(&path).unwrap();
        assert_eq!(loaded.profile, session.profile);
        assert!(loaded.validate(&captured).is_ok());
    }
}
