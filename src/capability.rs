//! Optional capability checks
//!
//! zlib-stream inflation and ETF decoding are cargo features. A run whose
//! stream mode disagrees with what this build carries is refused up front,
//! before any client is started.

use tracing::debug;

use crate::client::ClientKind;
use crate::config::{Encoding, StreamMode};
use crate::{BenchError, Result};

/// Optional capabilities compiled into this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// zlib-stream inflation (`zlib` feature)
    pub inflate: bool,
    /// ETF codec (`etf` feature)
    pub etf: bool,
}

impl Capabilities {
    /// Capabilities of the running binary
    #[must_use]
    pub fn detect() -> Self {
        Self {
            inflate: cfg!(feature = "zlib"),
            etf: cfg!(feature = "etf"),
        }
    }

    /// Check that a client can run a stream mode with these capabilities
    ///
    /// Every client needs the capabilities its mode uses. A client that
    /// negotiates its transport from what is available also needs unused
    /// capabilities to be absent, otherwise it would silently run a
    /// different mode than requested.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Environment`] naming the feature to add or remove
    pub fn check(&self, client: ClientKind, mode: &StreamMode) -> Result<()> {
        debug!(?self, %client, ?mode, "Checking optional capabilities");

        let wants_etf = mode.encoding == Encoding::Etf;

        if mode.compression && !self.inflate {
            return Err(BenchError::Environment(
                "this run requires zlib-stream support; rebuild with the `zlib` feature".to_string(),
            ));
        }

        if wants_etf && !self.etf {
            return Err(BenchError::Environment(
                "this run requires ETF support; rebuild with the `etf` feature".to_string(),
            ));
        }

        if client.negotiates_capabilities() {
            if !mode.compression && self.inflate {
                return Err(BenchError::Environment(format!(
                    "this run requires removing zlib-stream support: the {client} client enables it whenever built in; rebuild without the `zlib` feature"
                )));
            }

            if !wants_etf && self.etf {
                return Err(BenchError::Environment(format!(
                    "this run requires removing ETF support: the {client} client enables it whenever built in; rebuild without the `etf` feature"
                )));
            }
        }

        Ok(())
    }
}
