//! Fixture storage for captured sessions
//!
//! A fixture is a JSON document `{count, data, profile?}` named after the
//! stream mode it was captured under.

mod fixture;
mod reader;
mod synthetic;
mod writer;

pub use fixture::{CapturedSession, SessionProfile};
pub use reader::FixtureReader;
pub use synthetic::{SessionBuilder, DEFAULT_SYNTH_EVENTS};
pub use writer::FixtureWriter;

use std::path::Path;

use crate::config::StreamMode;
use crate::Result;

/// Load the fixture for `mode` from `fixture_dir` and check its profile
///
/// # Errors
///
/// Returns error if the fixture is missing, malformed or was captured under
/// a different mode
pub fn load_fixture(fixture_dir: &Path, mode: &StreamMode) -> Result<CapturedSession> {
    let session = FixtureReader::open(&fixture_dir.join(mode.fixture_name()))?;
    session.validate(mode)?;
    Ok(session)
}
