//! Gatebench - gateway capture and replay throughput harness
//!
//! Captures a live real-time gateway stream into a fixture, then replays the
//! fixture into interchangeable client implementations and times how fast
//! each one turns frames into events.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod network;
pub mod recording;
pub mod replay;
pub mod storage;

pub use error::{BenchError, Result};
