//! Configuration types for Gatebench

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientKind;
use crate::{BenchError, Result};

/// Default live gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Events after which a capture stops
pub const CAPTURE_EVENT_CAP: u64 = 10_000;

/// Seconds to wait for the next guild before a snapshot counts as complete
pub const GUILD_WAIT_SECS: u64 = 15;

/// Message category a session subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Guild snapshot: finishes once every guild has been delivered
    Guilds,
    /// Message traffic: open-ended
    Messages,
}

impl Category {
    /// Gateway intents bitfield requested for this category
    #[must_use]
    pub fn intents(self) -> u64 {
        match self {
            Self::Guilds => 1,
            Self::Messages => 1 << 9,
        }
    }

    /// Whether the category ends on its own once the session is ready
    #[must_use]
    pub fn is_snapshot(self) -> bool {
        matches!(self, Self::Guilds)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guilds => write!(f, "guilds"),
            Self::Messages => write!(f, "messages"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "guilds" => Ok(Self::Guilds),
            "messages" => Ok(Self::Messages),
            _ => Err(format!("Unknown category: {s} (expected guilds or messages)")),
        }
    }
}

/// Wire encoding of gateway payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Plain JSON text
    Json,
    /// Erlang external term format
    Etf,
}

impl Encoding {
    /// Value of the `encoding` gateway query parameter
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "etf" => Ok(Self::Etf),
            _ => Err(format!("Unknown encoding: {s} (expected json or etf)")),
        }
    }
}

/// Category, encoding and compression of a captured stream
///
/// Identifies which fixture file belongs to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamMode {
    /// Message category
    pub category: Category,
    /// Payload encoding
    pub encoding: Encoding,
    /// zlib-stream transport compression
    pub compression: bool,
}

impl StreamMode {
    /// Fixture file name: `{category}[-etf][-zlib].json`
    #[must_use]
    pub fn fixture_name(&self) -> String {
        format!(
            "{}{}{}.json",
            self.category,
            if self.encoding == Encoding::Etf { "-etf" } else { "" },
            if self.compression { "-zlib" } else { "" }
        )
    }
}

impl Default for StreamMode {
    fn default() -> Self {
        Self {
            category: Category::Messages,
            encoding: Encoding::Etf,
            compression: true,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for storing/loading fixtures
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: PathBuf,
    /// Capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Replay settings
    #[serde(default)]
    pub replay: ReplayConfig,
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fixture_dir: default_fixture_dir(),
            capture: CaptureConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Stream to capture
    #[serde(flatten)]
    pub mode: StreamMode,
    /// Shard index identified with
    pub shard_id: u32,
    /// Total shard count identified with
    pub shard_count: u32,
    /// Events after which the capture stops
    pub event_cap: u64,
    /// Gateway endpoint
    pub gateway_url: String,
    /// Seconds to wait for outstanding guilds after READY
    pub guild_wait_secs: u64,
    /// Bot token, never read from or written to the config file
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            shard_id: 2,
            shard_count: 4,
            event_cap: CAPTURE_EVENT_CAP,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            guild_wait_secs: GUILD_WAIT_SECS,
            token: None,
        }
    }
}

impl CaptureConfig {
    /// How long a guild snapshot waits for the next guild
    #[must_use]
    pub fn guild_wait(&self) -> Duration {
        Duration::from_secs(self.guild_wait_secs)
    }

    /// Validate capture settings
    ///
    /// # Errors
    ///
    /// Returns error if the shard topology, cap, endpoint or token is invalid
    pub fn validate(&self) -> Result<()> {
        validate_shard(self.shard_id, self.shard_count)?;

        if self.event_cap == 0 {
            return Err(BenchError::ConfigError(
                "capture.event_cap must be > 0".to_string(),
            ));
        }

        if !(self.gateway_url.starts_with("ws://") || self.gateway_url.starts_with("wss://")) {
            return Err(BenchError::ConfigError(format!(
                "capture.gateway_url must be a ws:// or wss:// URL, got {}",
                self.gateway_url
            )));
        }

        if self.token.as_deref().map_or(true, str::is_empty) {
            return Err(BenchError::ConfigError(
                "A bot token is required to capture (--token or GATEWAY_TOKEN)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Stream to replay
    #[serde(flatten)]
    pub mode: StreamMode,
    /// Client implementation under test
    pub client: ClientKind,
    /// Shard index the client is configured with
    pub shard_id: u32,
    /// Total shard count the client is configured with
    pub shard_count: u32,
    /// Tile the capture tenfold for a longer run
    pub extended: bool,
    /// Give up after this many seconds (runs forever when unset)
    pub timeout_secs: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::default(),
            client: ClientKind::Lazy,
            shard_id: 0,
            shard_count: 10,
            extended: false,
            timeout_secs: None,
        }
    }
}

impl ReplayConfig {
    /// Optional stall timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Validate replay settings
    ///
    /// # Errors
    ///
    /// Returns error if the shard topology is invalid or extended mode is
    /// combined with compression
    pub fn validate(&self) -> Result<()> {
        validate_shard(self.shard_id, self.shard_count)?;

        if self.extended && self.mode.compression {
            return Err(BenchError::ConfigError(
                "Extended replay cannot be combined with compression: tiling breaks the shared inflate context"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_shard(shard_id: u32, shard_count: u32) -> Result<()> {
    if shard_count == 0 {
        return Err(BenchError::ConfigError(
            "shard_count cannot be 0".to_string(),
        ));
    }

    if shard_id >= shard_count {
        return Err(BenchError::ConfigError(format!(
            "shard_id {shard_id} out of range for shard_count {shard_count}"
        )));
    }

    Ok(())
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BenchError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| BenchError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.replay.validate()?;
        Ok(config)
    }

    /// Path of the fixture for a stream
    #[must_use]
    pub fn fixture_path(&self, mode: &StreamMode) -> PathBuf {
        self.fixture_dir.join(mode.fixture_name())
    }
}
