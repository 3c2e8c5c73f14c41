//! Gatebench CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use gatebench::client::ClientKind;
use gatebench::config::{Category, Config, Encoding, StreamMode};
use gatebench::recording::CaptureEngine;
use gatebench::replay::ReplayEngine;
use gatebench::storage::{FixtureReader, FixtureWriter, SessionBuilder, DEFAULT_SYNTH_EVENTS};

#[derive(Parser)]
#[command(name = "gatebench")]
#[command(about = "Capture gateway traffic and replay it against client implementations", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory fixtures are read from and written to
    #[arg(long, global = true)]
    fixture_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a live session into a fixture
    Capture {
        #[command(flatten)]
        stream: StreamArgs,
        #[command(flatten)]
        shard: ShardArgs,
        /// Stop after this many events
        #[arg(long)]
        event_cap: Option<u64>,
        /// Gateway endpoint
        #[arg(long)]
        gateway_url: Option<String>,
        /// Bot token
        #[arg(long, env = "GATEWAY_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Time one client against a fixture
    Replay {
        #[command(flatten)]
        stream: StreamArgs,
        #[command(flatten)]
        shard: ShardArgs,
        /// Client implementation (owned, lazy, lean)
        #[arg(long)]
        client: Option<ClientKind>,
        /// Repeat the capture tenfold
        #[arg(long)]
        extended: bool,
        /// Fail instead of waiting forever after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Write a synthetic fixture without connecting anywhere
    Synth {
        #[command(flatten)]
        stream: StreamArgs,
        /// Dispatch events after READY
        #[arg(long, default_value_t = DEFAULT_SYNTH_EVENTS)]
        events: usize,
    },
    /// Show what a fixture contains
    Inspect {
        /// Fixture file
        path: PathBuf,
    },
}

#[derive(Args)]
struct StreamArgs {
    /// Message category (guilds, messages)
    #[arg(long)]
    category: Option<Category>,
    /// Payload encoding (json, etf)
    #[arg(long)]
    encoding: Option<Encoding>,
    /// zlib-stream transport compression
    #[arg(long)]
    compression: Option<bool>,
}

impl StreamArgs {
    fn apply(&self, mode: &mut StreamMode) {
        if let Some(category) = self.category {
            mode.category = category;
        }
        if let Some(encoding) = self.encoding {
            mode.encoding = encoding;
        }
        if let Some(compression) = self.compression {
            mode.compression = compression;
        }
    }
}

#[derive(Args)]
struct ShardArgs {
    /// Shard index
    #[arg(long)]
    shard_id: Option<u32>,
    /// Total shard count
    #[arg(long)]
    shard_count: Option<u32>,
}

impl ShardArgs {
    fn apply(&self, shard_id: &mut u32, shard_count: &mut u32) {
        if let Some(id) = self.shard_id {
            *shard_id = id;
        }
        if let Some(count) = self.shard_count {
            *shard_count = count;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = cli.fixture_dir {
        config.fixture_dir = dir;
    }

    match cli.command {
        Commands::Capture {
            stream,
            shard,
            event_cap,
            gateway_url,
            token,
        } => {
            let mut capture = config.capture.clone();
            stream.apply(&mut capture.mode);
            shard.apply(&mut capture.shard_id, &mut capture.shard_count);
            if let Some(cap) = event_cap {
                capture.event_cap = cap;
            }
            if let Some(url) = gateway_url {
                capture.gateway_url = url;
            }
            capture.token = token;

            let summary = CaptureEngine::new(config.fixture_dir)
                .capture(&capture)
                .await
                .context("Capture failed")?;
            println!(
                "captured {} stream packets for {} events ({:?}) into {}",
                summary.frames,
                summary.events,
                summary.reason,
                summary.path.display()
            );
        }
        Commands::Replay {
            stream,
            shard,
            client,
            extended,
            timeout,
        } => {
            let mut replay = config.replay.clone();
            stream.apply(&mut replay.mode);
            shard.apply(&mut replay.shard_id, &mut replay.shard_count);
            if let Some(client) = client {
                replay.client = client;
            }
            replay.extended |= extended;
            if timeout.is_some() {
                replay.timeout_secs = timeout;
            }

            println!(
                "TESTING type={} lib={} zlib={} encoding={}",
                replay.mode.category, replay.client, replay.mode.compression, replay.mode.encoding
            );

            let run = ReplayEngine::new(config.fixture_dir).prepare(&replay)?;
            println!("processing {} events", run.expected_events());

            let metrics = run.execute().await?;
            println!("{:.3} MS", metrics.elapsed_ms());
            println!("{:.0} OP/s", metrics.throughput());
        }
        Commands::Synth { stream, events } => {
            let mut mode = config.replay.mode;
            stream.apply(&mut mode);

            let session = SessionBuilder::new(mode)
                .events(events)
                .shard(config.replay.shard_id, config.replay.shard_count)
                .build()?;
            let path = config.fixture_path(&mode);
            FixtureWriter::write(&path, &session, &mode)
                .with_context(|| format!("Writing {}", path.display()))?;
            println!(
                "wrote {} events in {} frames to {}",
                session.expected_events,
                session.frames.len(),
                path.display()
            );
        }
        Commands::Inspect { path } => inspect(&path)?,
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let session = FixtureReader::open(path)?;

    println!("Fixture: {}", path.display());
    println!("  events:  {}", session.expected_events);
    println!("  frames:  {}", session.frames.len());
    println!("  bytes:   {}", session.total_bytes());

    match &session.profile {
        Some(profile) => {
            let mode = StreamMode {
                category: profile.category,
                encoding: profile.encoding,
                compression: profile.compression,
            };
            println!("  mode:    {}", mode.fixture_name());
            println!("  digest:  {}", profile.digest);
            match session.validate(&mode) {
                Ok(()) => println!("  valid:   yes"),
                Err(e) => println!("  valid:   no ({e})"),
            }
        }
        None => println!("  profile: none"),
    }

    Ok(())
}
