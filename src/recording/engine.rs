//! Capture engine recording a live gateway session

use std::future::Future;
use std::path::PathBuf;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::snapshot::GuildSnapshot;
use super::PROGRESS_INTERVAL;
use crate::capability::Capabilities;
use crate::client::{ClientKind, ClientOptions, GatewayClient};
use crate::config::{CaptureConfig, StreamMode};
use crate::gateway::{GatewayEvent, GUILD_CREATE, READY};
use crate::storage::{CapturedSession, FixtureWriter};
use crate::{BenchError, Result};

/// What the client task reports to the capture loop
#[derive(Debug)]
enum Observation {
    Frame(Bytes),
    Event(EventKind),
}

/// The part of an event the capture loop cares about
#[derive(Debug)]
enum EventKind {
    Ready(Vec<String>),
    Guild(String),
    Other,
}

impl EventKind {
    fn classify(event: &GatewayEvent<'_>, snapshot: bool) -> Self {
        if !snapshot {
            return Self::Other;
        }

        if event.is_dispatch(READY) {
            let guilds = data_of(event)
                .get("guilds")
                .and_then(Value::as_array)
                .map(|guilds| guilds.iter().filter_map(guild_id).collect())
                .unwrap_or_default();
            return Self::Ready(guilds);
        }

        if event.is_dispatch(GUILD_CREATE) {
            if let Some(id) = guild_id(&data_of(event)) {
                return Self::Guild(id);
            }
        }

        Self::Other
    }
}

fn data_of(event: &GatewayEvent<'_>) -> Value {
    event.data.to_value().unwrap_or_else(|e| {
        warn!("Unreadable {:?} payload: {e}", event.name);
        Value::Null
    })
}

fn guild_id(guild: &Value) -> Option<String> {
    guild.get("id").and_then(Value::as_str).map(str::to_string)
}

/// Why a capture stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The event cap was reached
    EventCap,
    /// Every guild of the snapshot arrived
    SnapshotComplete,
    /// No new guild arrived within the wait period
    SnapshotIdle,
    /// The connection closed
    Closed,
    /// The operator interrupted
    Interrupted,
}

/// Outcome of a capture
#[derive(Debug)]
pub struct CaptureSummary {
    /// Where the fixture was written
    pub path: PathBuf,
    /// Events counted
    pub events: u64,
    /// Frames recorded
    pub frames: usize,
    /// Why the capture ended
    pub reason: StopReason,
}

/// Capture engine for recording fixtures from a live gateway
pub struct CaptureEngine {
    fixture_dir: PathBuf,
    capabilities: Capabilities,
}

impl CaptureEngine {
    /// Create an engine writing fixtures to `fixture_dir`
    #[must_use]
    pub fn new(fixture_dir: PathBuf) -> Self {
        Self {
            fixture_dir,
            capabilities: Capabilities::detect(),
        }
    }

    /// Connect, record until a stop condition, and persist the fixture
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or capabilities are wrong, the
    /// connection fails, or the fixture cannot be written
    pub async fn capture(&self, config: &CaptureConfig) -> Result<CaptureSummary> {
        config.validate()?;
        self.capabilities.check(ClientKind::Owned, &config.mode)?;

        let client = ClientKind::Owned.build(ClientOptions::for_capture(config));
        info!(
            "Capturing {} on shard {}/{}",
            config.mode.fixture_name(),
            config.shard_id,
            config.shard_count
        );

        let (session, reason) = record(client, config, interrupted()).await?;
        self.persist(session, &config.mode, reason)
    }

    /// Write a recorded session under the name its mode implies
    ///
    /// # Errors
    ///
    /// Returns error if the fixture cannot be written
    pub fn persist(
        &self,
        session: CapturedSession,
        mode: &StreamMode,
        reason: StopReason,
    ) -> Result<CaptureSummary> {
        let path = self.fixture_dir.join(mode.fixture_name());
        let session = session.with_profile(mode);
        FixtureWriter::write(&path, &session, mode)?;

        Ok(CaptureSummary {
            path,
            events: session.expected_events,
            frames: session.frames.len(),
            reason,
        })
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Run `client` and collect frames and events until a stop condition
///
/// A connection that drops after frames arrived still ends the capture
/// with [`StopReason::Closed`].
///
/// # Errors
///
/// Returns the client's error if its event loop fails before any frame
/// was recorded
pub async fn record(
    mut client: Box<dyn GatewayClient>,
    config: &CaptureConfig,
    stop: impl Future<Output = ()>,
) -> Result<(CapturedSession, StopReason)> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let snapshot_category = config.mode.category.is_snapshot();
    {
        let tx = tx.clone();
        client.on_frame(Box::new(move |frame| {
            let _ = tx.send(Observation::Frame(frame.clone()));
        }));
    }
    client.on_event(Box::new(move |event| {
        let _ = tx.send(Observation::Event(EventKind::classify(event, snapshot_category)));
    }));

    let mut handle = client.run();
    tokio::pin!(stop);

    let mut frames = Vec::new();
    let mut events = 0u64;
    let mut snapshot = GuildSnapshot::new(config.guild_wait());
    let mut progress = time::interval_at(Instant::now() + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
    progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            observation = rx.recv() => match observation {
                None => break StopReason::Closed,
                Some(Observation::Frame(frame)) => frames.push(frame),
                Some(Observation::Event(kind)) => {
                    events += 1;
                    match kind {
                        EventKind::Ready(guilds) => {
                            debug!(guilds = guilds.len(), "Session ready");
                            snapshot.ready(guilds, Instant::now());
                        }
                        EventKind::Guild(id) => snapshot.guild(id, Instant::now()),
                        EventKind::Other => {}
                    }

                    if events >= config.event_cap {
                        break StopReason::EventCap;
                    }
                    if snapshot_category && snapshot.is_complete() {
                        break StopReason::SnapshotComplete;
                    }
                }
            },
            () = sleep_until(snapshot.deadline()), if snapshot_category => {
                info!(outstanding = snapshot.outstanding(), "No new guild within the wait period");
                break StopReason::SnapshotIdle;
            }
            _ = progress.tick() => {
                info!("captured {} stream packets for {} events", frames.len(), events);
            }
            () = &mut stop => break StopReason::Interrupted,
        }
    };

    if reason == StopReason::Closed {
        match (&mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if frames.is_empty() => return Err(e),
            Ok(Err(e)) => warn!("Connection lost, keeping {} recorded frames: {e}", frames.len()),
            Err(e) => return Err(BenchError::Other(format!("Client task failed: {e}"))),
        }
    } else {
        handle.abort();
    }

    info!(
        ?reason,
        "Capture stopped after {} events in {} frames",
        events,
        frames.len()
    );

    Ok((CapturedSession::new(events, frames), reason))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Category, Encoding};
    use crate::storage::{FixtureReader, SessionBuilder};
    use tempfile::TempDir;

    fn config(category: Category) -> CaptureConfig {
        CaptureConfig {
            mode: StreamMode {
                category,
                encoding: Encoding::Json,
                compression: false,
            },
            ..CaptureConfig::default()
        }
    }

    fn lazy_client(config: &CaptureConfig) -> (Box<dyn GatewayClient>, crate::network::FrameIngress) {
        let mut client = ClientKind::Lazy.build(ClientOptions::for_capture(config));
        let ingress = client.test_transport();
        (client, ingress)
    }

    #[tokio::test]
    async fn test_stops_at_event_cap() {
        let mut config = config(Category::Messages);
        config.event_cap = 25;
        let (client, ingress) = lazy_client(&config);

        for frame in SessionBuilder::new(config.mode).events(100).build().unwrap().frames {
            ingress.push(frame).unwrap();
        }

        let (session, reason) = record(client, &config, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::EventCap);
        assert_eq!(session.expected_events, 25);
        assert_eq!(session.frames.len(), 25);
    }

    #[tokio::test]
    async fn test_stops_when_snapshot_complete() {
        let config = config(Category::Guilds);
        let (client, ingress) = lazy_client(&config);

        for frame in SessionBuilder::new(config.mode).events(12).build().unwrap().frames {
            ingress.push(frame).unwrap();
        }

        let (session, reason) = record(client, &config, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::SnapshotComplete);
        assert_eq!(session.expected_events, 14);
    }

    #[tokio::test]
    async fn test_stops_on_close() {
        let config = config(Category::Messages);
        let (client, ingress) = lazy_client(&config);

        let built = SessionBuilder::new(config.mode).events(10).build().unwrap();
        for frame in built.frames.clone() {
            ingress.push(frame).unwrap();
        }
        drop(ingress);

        let (session, reason) = record(client, &config, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::Closed);
        assert_eq!(session.frames, built.frames);
        assert_eq!(session.expected_events, built.expected_events);
    }

    fn message_frames(n: u64) -> Vec<String> {
        (1..=n)
            .map(|seq| {
                format!(r#"{{"op":0,"s":{seq},"t":"MESSAGE_CREATE","d":{{"id":"{seq}"}}}}"#)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_keeps_frames_when_connection_drops() {
        use futures_util::SinkExt;
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::Message;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config(Category::Messages);
        config.gateway_url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in message_frames(5) {
                socket.send(Message::Text(frame)).await.unwrap();
            }
            // Dropped without a close frame
        });

        let client = ClientKind::Lazy.build(ClientOptions::for_capture(&config));
        let (session, reason) = record(client, &config, std::future::pending()).await.unwrap();
        server.await.unwrap();

        assert_eq!(reason, StopReason::Closed);
        assert_eq!(session.expected_events, 5);
        assert_eq!(session.frames.len(), 5);
        assert_eq!(&session.frames[4][..], message_frames(5)[4].as_bytes());
    }

    #[tokio::test]
    async fn test_connect_failure_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config(Category::Messages);
        config.gateway_url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = ClientKind::Lazy.build(ClientOptions::for_capture(&config));
        assert!(matches!(
            record(client, &config, std::future::pending()).await,
            Err(BenchError::Transport(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_gives_up_when_idle() {
        let mut config = config(Category::Guilds);
        config.guild_wait_secs = 15;
        let (client, ingress) = lazy_client(&config);

        let built = SessionBuilder::new(config.mode).events(5).build().unwrap();
        for frame in built.frames.iter().take(4).cloned() {
            ingress.push(frame).unwrap();
        }

        let (session, reason) = record(client, &config, std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::SnapshotIdle);
        assert_eq!(session.expected_events, 4);
        drop(ingress);
    }

    #[tokio::test]
    async fn test_interrupt() {
        let config = config(Category::Messages);
        let (client, _ingress) = lazy_client(&config);

        let (session, reason) = record(client, &config, async {}).await.unwrap();
        assert_eq!(reason, StopReason::Interrupted);
        assert!(session.frames.is_empty());
    }

    #[test]
    fn test_persist_names_fixture() {
        let dir = TempDir::new().unwrap();
        let engine = CaptureEngine::new(dir.path().to_path_buf());
        let mode = StreamMode {
            category: Category::Guilds,
            encoding: Encoding::Json,
            compression: false,
        };
        let session = SessionBuilder::new(mode).events(3).build().unwrap();

        let summary = engine
            .persist(CapturedSession::new(session.expected_events, session.frames), &mode, StopReason::Closed)
            .unwrap();

        assert!(summary.path.ends_with("guilds.json"));
        assert_eq!(summary.events, 5);
        let loaded = FixtureReader::open(&summary.path).unwrap();
        assert!(loaded.validate(&mode).is_ok());
    }

    #[tokio::test]
    async fn test_capture_requires_token() {
        let dir = TempDir::new().unwrap();
        let engine = CaptureEngine::new(dir.path().to_path_buf());
        assert!(matches!(
            engine.capture(&config(Category::Messages)).await,
            Err(BenchError::ConfigError(_))
        ));
    }
}
