//! Capture of live gateway traffic into fixtures

mod engine;
mod snapshot;

use std::time::Duration;

pub use engine::{record, CaptureEngine, CaptureSummary, StopReason};
pub use snapshot::GuildSnapshot;

/// How often a running capture reports progress
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
