//! Replay harness: pushes a capture through one client and times it

mod context;
mod engine;
mod normalize;

pub use context::{RunContext, RunMetrics};
pub use engine::{PreparedRun, ReplayEngine};
pub use normalize::{
    normalize, Workload, COMPRESSED_SHORTFALL, EVENT_CAP, EXTENDED_EVENT_CAP, EXTENDED_REPEAT,
};
