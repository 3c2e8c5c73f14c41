//! Benchmarks for replay throughput per client implementation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gatebench::capability::Capabilities;
use gatebench::client::ClientKind;
use gatebench::config::{Category, Encoding, ReplayConfig, StreamMode};
use gatebench::replay::{PreparedRun, ReplayEngine};
use gatebench::storage::SessionBuilder;

const EVENTS: usize = 2_000;

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn prepare(mode: StreamMode, client: ClientKind) -> Option<PreparedRun> {
    let config = ReplayConfig {
        mode,
        client,
        ..ReplayConfig::default()
    };
    let session = SessionBuilder::new(mode).events(EVENTS).build().ok()?;

    ReplayEngine::new(std::env::temp_dir())
        .prepare_session(&config, &session)
        .ok()
}

fn bench_modes(c: &mut Criterion) {
    let rt = current_thread_runtime();
    let capabilities = Capabilities::detect();

    let mut modes = vec![StreamMode {
        category: Category::Messages,
        encoding: Encoding::Json,
        compression: false,
    }];
    if capabilities.etf {
        modes.push(StreamMode {
            category: Category::Messages,
            encoding: Encoding::Etf,
            compression: false,
        });
    }
    if capabilities.inflate && capabilities.etf {
        modes.push(StreamMode {
            category: Category::Messages,
            encoding: Encoding::Etf,
            compression: true,
        });
    }

    for mode in modes {
        let mut group = c.benchmark_group(format!("replay/{}", mode.fixture_name()));

        // Clients that cannot run this mode in this build are skipped
        for client in ClientKind::ALL {
            let Some(run) = prepare(mode, client) else {
                continue;
            };

            group.throughput(Throughput::Elements(run.expected_events()));
            group.bench_with_input(BenchmarkId::from_parameter(client), &run, |b, run| {
                b.iter(|| rt.block_on(run.execute()).unwrap());
            });
        }

        group.finish();
    }
}

fn bench_guild_snapshot(c: &mut Criterion) {
    let rt = current_thread_runtime();
    let mode = StreamMode {
        category: Category::Guilds,
        encoding: Encoding::Json,
        compression: false,
    };

    let Some(run) = prepare(mode, ClientKind::Lazy) else {
        return;
    };

    c.bench_function("replay/guilds.json/lazy", |b| {
        b.iter(|| rt.block_on(run.execute()).unwrap());
    });
}

criterion_group!(benches, bench_modes, bench_guild_snapshot);
criterion_main!(benches);
