use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use log::{debug, error, info};
use prometheus_client::registry::Registry;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use ingest_lib::config::KinesisInputConfig;
use ingest_lib::kinesis::{compress_gzip, ChannelSink, LocalCoordinatorFactory, ShardRecord};
use ingest_lib::server::monitoring::{IngestMetrics, INGEST_METRICS};
use ingest_lib::server::setup_server;
use ingest_lib::state::AppState;
use ingest_lib::transport::KinesisTransport;

#[derive(Parser, Debug)]
#[clap(about = "Kinesis log ingestion worker")]
struct Cli {
    #[clap(long)]
    /// Replay a newline-delimited message file through the consumer instead
    /// of connecting to a live coordination service
    replay: PathBuf,

    #[clap(long, default_value_t = 10)]
    /// Records per replayed batch
    batch_size: usize,

    #[clap(long, default_value_t = 500)]
    /// Idle poll interval of the replay coordinator, in milliseconds
    poll_interval_ms: u64,

    #[clap(long, default_value = "0.0.0.0:3000")]
    /// Bind address for the health/metrics server
    bind: SocketAddr,
}

fn load_replay_batches(path: &PathBuf, batch_size: usize) -> Vec<Vec<ShardRecord>> {
    let contents = fs::read_to_string(path).expect("Could not read replay file");
    let records: Vec<ShardRecord> = contents
        .lines()
        .enumerate()
        .map(|(i, line)| ShardRecord {
            sequence_number: format!("{i:010}"),
            partition_key: format!("replay-{i}"),
            data: compress_gzip(line.as_bytes()).expect("Could not compress replay record"),
        })
        .collect();

    records
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let args = Cli::parse();

    let config = KinesisInputConfig::from_env().expect("Config incorrectly specified");
    debug!("Config loaded for stream <{}>", config.stream_name);

    let batches = load_replay_batches(&args.replay, args.batch_size);
    info!(
        "Replaying {} batch(es) from {}",
        batches.len(),
        args.replay.display()
    );
    let factory = LocalCoordinatorFactory::new(
        "shardId-000000000000",
        batches,
        Duration::from_millis(args.poll_interval_ms),
    );

    let mut registry = Registry::default();
    let metrics = IngestMetrics::register(&mut registry);
    let _ = INGEST_METRICS.set(metrics);

    let (sender, receiver) = flume::unbounded::<Vec<u8>>();
    let transport = Arc::new(KinesisTransport::new());
    transport
        .launch(
            config,
            Box::new(factory),
            Arc::new(ChannelSink::new(sender)),
        )
        .expect("Kinesis transport failed to launch");

    // Stand-in for the downstream pipeline: drain forwarded payloads to
    // stdout. The loop ends once the transport stops and drops the sender.
    let drain_handle = tokio::spawn(async move {
        while let Ok(payload) = receiver.recv_async().await {
            match String::from_utf8(payload) {
                Ok(message) => println!("{message}"),
                Err(err) => error!("Forwarded payload was not UTF-8: {err}"),
            }
        }
    });

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::new(
        Arc::clone(&transport),
        registry,
        shutdown_token.clone(),
    ));
    let server_handle = setup_server(state, args.bind).await;

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down.");
        }
    }

    let stopper = Arc::clone(&transport);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .expect("Shutdown task panicked");
    shutdown_token.cancel();
    drain_handle.await.expect("Drain task panicked");
    server_handle.await.expect("Server task panicked");
}
