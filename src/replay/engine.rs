//! Replay engine driving one client through a captured session

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::context::{RunContext, RunMetrics};
use super::normalize::{normalize, Workload};
use crate::capability::Capabilities;
use crate::client::ClientOptions;
use crate::config::ReplayConfig;
use crate::storage::{self, CapturedSession};
use crate::{BenchError, Result};

/// Replay engine for timing clients against fixtures
pub struct ReplayEngine {
    fixture_dir: PathBuf,
    capabilities: Capabilities,
}

impl ReplayEngine {
    /// Create an engine reading fixtures from `fixture_dir`
    #[must_use]
    pub fn new(fixture_dir: PathBuf) -> Self {
        Self {
            fixture_dir,
            capabilities: Capabilities::detect(),
        }
    }

    /// Check against other capabilities than the ones built in
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Check the environment, then load and normalize the fixture for a run
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the capabilities do not
    /// match, or the fixture cannot be loaded
    pub fn prepare(&self, config: &ReplayConfig) -> Result<PreparedRun> {
        self.preflight(config)?;
        let session = storage::load_fixture(&self.fixture_dir, &config.mode)?;
        Ok(PreparedRun::new(config.clone(), &session))
    }

    /// Like [`prepare`](Self::prepare) for a session already in memory
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the capabilities do not
    /// match, or the session's profile disagrees with the configuration
    pub fn prepare_session(
        &self,
        config: &ReplayConfig,
        session: &CapturedSession,
    ) -> Result<PreparedRun> {
        self.preflight(config)?;
        session.validate(&config.mode)?;
        Ok(PreparedRun::new(config.clone(), session))
    }

    /// Prepare and execute one run
    ///
    /// # Errors
    ///
    /// See [`prepare`](Self::prepare) and [`PreparedRun::execute`]
    pub async fn run(&self, config: &ReplayConfig) -> Result<RunMetrics> {
        self.prepare(config)?.execute().await
    }

    fn preflight(&self, config: &ReplayConfig) -> Result<()> {
        config.validate()?;
        self.capabilities.check(config.client, &config.mode)
    }
}

/// A checked and normalized run, ready to execute any number of times
#[derive(Debug, Clone)]
pub struct PreparedRun {
    config: ReplayConfig,
    workload: Workload,
}

impl PreparedRun {
    fn new(config: ReplayConfig, session: &CapturedSession) -> Self {
        let workload = normalize(
            &session.frames,
            session.expected_events,
            config.extended,
            config.mode.compression,
        );
        Self { config, workload }
    }

    /// Events the run waits for
    #[must_use]
    pub fn expected_events(&self) -> u64 {
        self.workload.expected_events
    }

    /// Frames the run pushes
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.workload.frames.len()
    }

    /// Configuration the run was prepared for
    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Build a fresh client, push every frame and wait for the expected
    /// events
    ///
    /// Without a timeout a client that never emits enough events keeps this
    /// future pending.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Stalled`] if the timeout passes first, or the
    /// client's own error if its event loop stops early
    pub async fn execute(&self) -> Result<RunMetrics> {
        let mut client = self.config.client.build(ClientOptions::for_replay(&self.config));
        let ingress = client.test_transport();

        let hidden = client.hidden_handshake_events(&self.workload.frames, self.workload.expected_events)?;
        let ctx = Arc::new(RunContext::new(self.workload.expected_events, hidden));
        {
            let ctx = Arc::clone(&ctx);
            client.on_event(Box::new(move |_| ctx.record_event()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        client.on_ready(Box::new(move || {
            let _ = ready_tx.send(());
        }));

        debug!(
            client = %self.config.client,
            seed = ctx.events(),
            target = ctx.target(),
            "Starting client"
        );
        let mut handle = client.run();

        if ready_rx.await.is_err() {
            return Err(match handle.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => BenchError::Other("Client stopped before it was ready".to_string()),
                Err(e) => BenchError::Other(format!("Client task failed: {e}")),
            });
        }

        ctx.begin();
        for frame in &self.workload.frames {
            ingress.push(frame.clone())?;
        }

        let wait = async {
            tokio::select! {
                () = ctx.finished() => Ok(()),
                result = &mut handle => Err(match result {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => BenchError::Other("Client stopped before the run finished".to_string()),
                    Err(e) => BenchError::Other(format!("Client task failed: {e}")),
                }),
            }
        };

        let outcome = match self.config.timeout() {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        processed = ctx.events(),
                        expected = ctx.target(),
                        "Replay stalled"
                    );
                    Err(BenchError::Stalled {
                        processed: ctx.events(),
                        expected: ctx.target(),
                    })
                }
            },
        };

        handle.abort();
        drop(ingress);
        outcome?;

        let metrics = ctx
            .metrics()
            .ok_or_else(|| BenchError::Other("Run finished without metrics".to_string()))?;

        info!(
            client = %self.config.client,
            events = metrics.events_processed,
            elapsed_ms = metrics.elapsed_ms(),
            "Replay finished"
        );

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientKind;
    use crate::config::{Category, Encoding, StreamMode};
    use crate::storage::SessionBuilder;
    use std::time::Duration;

    fn json_config(client: ClientKind) -> ReplayConfig {
        ReplayConfig {
            mode: StreamMode {
                category: Category::Messages,
                encoding: Encoding::Json,
                compression: false,
            },
            client,
            timeout_secs: Some(10),
            ..ReplayConfig::default()
        }
    }

    fn engine() -> ReplayEngine {
        ReplayEngine::new(PathBuf::from("unused")).with_capabilities(Capabilities {
            inflate: false,
            etf: false,
        })
    }

    #[tokio::test]
    async fn test_lazy_and_lean_finish() {
        for client in [ClientKind::Lazy, ClientKind::Lean] {
            let config = json_config(client);
            let session = SessionBuilder::new(config.mode).events(200).build().unwrap();

            let run = engine().prepare_session(&config, &session).unwrap();
            assert_eq!(run.expected_events(), session.expected_events);

            let metrics = run.execute().await.unwrap();
            assert_eq!(metrics.events_processed, session.expected_events);
        }
    }

    #[tokio::test]
    async fn test_prepared_run_repeats() {
        let config = json_config(ClientKind::Lazy);
        let session = SessionBuilder::new(config.mode).events(50).build().unwrap();
        let run = engine().prepare_session(&config, &session).unwrap();

        let first = run.execute().await.unwrap();
        let second = run.execute().await.unwrap();
        assert_eq!(first.events_processed, second.events_processed);
    }

    #[tokio::test]
    async fn test_short_capture_stalls_with_timeout() {
        let mut config = json_config(ClientKind::Lazy);
        config.timeout_secs = Some(1);

        let mut session = SessionBuilder::new(config.mode).events(10).build().unwrap();
        session.profile = None;
        session.expected_events += 5;

        let run = engine().prepare_session(&config, &session).unwrap();
        match run.execute().await {
            Err(BenchError::Stalled { processed, expected }) => {
                assert_eq!(expected, session.expected_events);
                assert_eq!(processed, expected - 5);
            }
            other => panic!("Expected stall, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capability_mismatch_rejected_before_loading() {
        let config = json_config(ClientKind::Lazy);
        let compressed = ReplayConfig {
            mode: StreamMode {
                compression: true,
                ..config.mode
            },
            ..config
        };

        assert!(matches!(
            engine().prepare(&compressed),
            Err(BenchError::Environment(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_mismatch_rejected() {
        let config = json_config(ClientKind::Lazy);
        let session = SessionBuilder::new(StreamMode {
            category: Category::Guilds,
            ..config.mode
        })
        .events(5)
        .build()
        .unwrap();

        assert!(matches!(
            engine().prepare_session(&config, &session),
            Err(BenchError::FixtureMismatch { field: "category", .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_target_finishes_immediately() {
        let config = json_config(ClientKind::Lazy);
        let session = CapturedSession::new(0, Vec::new());

        let metrics = engine()
            .prepare_session(&config, &session)
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!(metrics.events_processed, 0);
        assert!(metrics.elapsed < Duration::from_secs(1));
    }
}
