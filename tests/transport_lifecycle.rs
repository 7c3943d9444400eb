use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ingest_lib::config::{KinesisInputConfig, Region};
use ingest_lib::kinesis::{
    compress_gzip, ChannelSink, CoordinatorConfig, CoordinatorError, CoordinatorFactory,
    LeaseCoordinator, LocalCoordinatorFactory, RecordSink, ShardRecord,
};
use ingest_lib::transport::{KinesisTransport, LaunchError, TransportState};

fn record(sequence: u64, payload: &[u8]) -> ShardRecord {
    ShardRecord {
        sequence_number: format!("{sequence:010}"),
        partition_key: format!("pk-{sequence}"),
        data: compress_gzip(payload).expect("gzip payload"),
    }
}

fn test_config(stream_name: &str) -> KinesisInputConfig {
    let mut config = KinesisInputConfig::new(stream_name, Region::UsEast1);
    config.max_throttle_wait = Duration::from_millis(40);
    config.checkpoint_interval = Duration::ZERO;
    config.worker_id = Some("test-node".to_string());
    config
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Factory wrapper that keeps the run in STARTING long enough for a monitor
/// to observe it.
struct DelayedFactory {
    inner: LocalCoordinatorFactory,
    delay: Duration,
}

impl CoordinatorFactory for DelayedFactory {
    fn build(
        &self,
        config: &CoordinatorConfig,
    ) -> Result<Box<dyn LeaseCoordinator>, CoordinatorError> {
        thread::sleep(self.delay);
        self.inner.build(config)
    }
}

fn state_rank(state: TransportState) -> u8 {
    match state {
        TransportState::Starting => 0,
        TransportState::Running => 1,
        TransportState::Stopping => 2,
        TransportState::Stopped => 3,
    }
}

#[test]
fn lifecycle_states_are_observed_in_order() {
    let factory = DelayedFactory {
        inner: LocalCoordinatorFactory::new(
            "shardId-000000000000",
            vec![vec![record(0, b"hello")]],
            Duration::from_millis(5),
        ),
        delay: Duration::from_millis(50),
    };
    let (sender, receiver) = flume::unbounded::<Vec<u8>>();
    let transport = Arc::new(KinesisTransport::new());

    let done = Arc::new(AtomicBool::new(false));
    let monitor = {
        let transport = Arc::clone(&transport);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut observed = Vec::new();
            loop {
                let state = transport.state();
                if observed.last() != Some(&state) {
                    observed.push(state);
                }
                if done.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
            // One final sample after the main thread finished stopping.
            let state = transport.state();
            if observed.last() != Some(&state) {
                observed.push(state);
            }
            observed
        })
    };

    transport
        .launch(
            test_config("logs"),
            Box::new(factory),
            Arc::new(ChannelSink::new(sender)) as Arc<dyn RecordSink>,
        )
        .expect("launch");

    assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).expect("record"), b"hello".to_vec());
    assert!(wait_until(Duration::from_secs(5), || {
        transport.state() == TransportState::Running
    }));

    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);

    done.store(true, Ordering::SeqCst);
    let mut observed = monitor.join().expect("monitor panicked");

    // Ignore the idle state before launch; what remains must march forward
    // through the lifecycle without ever going backwards.
    if observed.first() == Some(&TransportState::Stopped) {
        observed.remove(0);
    }
    assert!(
        observed.windows(2).all(|w| state_rank(w[0]) < state_rank(w[1])),
        "out-of-order lifecycle states: {observed:?}"
    );
    assert!(observed.contains(&TransportState::Starting), "{observed:?}");
    assert!(observed.contains(&TransportState::Running), "{observed:?}");
    assert_eq!(observed.last(), Some(&TransportState::Stopped));
}

#[test]
fn stop_and_restart_requests_before_launch_are_no_ops() {
    let transport = KinesisTransport::new();
    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);

    // Not in the throttled-stopped condition, so this returns immediately.
    transport.request_restart_when_unthrottled();
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[test]
fn invalid_stream_name_fails_launch_without_starting_a_worker() {
    let transport = KinesisTransport::new();
    let factory =
        LocalCoordinatorFactory::new("shardId-000000000000", Vec::new(), Duration::from_millis(5));
    let (sender, _receiver) = flume::unbounded::<Vec<u8>>();

    let err = transport
        .launch(
            test_config("  "),
            Box::new(factory),
            Arc::new(ChannelSink::new(sender)) as Arc<dyn RecordSink>,
        )
        .expect_err("empty stream name must fail");
    assert!(matches!(err, LaunchError::Config(_)));
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[test]
fn double_launch_is_rejected_while_running() {
    let transport = KinesisTransport::new();
    let (sender, _receiver) = flume::unbounded::<Vec<u8>>();
    let sink = Arc::new(ChannelSink::new(sender)) as Arc<dyn RecordSink>;

    transport
        .launch(
            test_config("logs"),
            Box::new(LocalCoordinatorFactory::new(
                "shardId-000000000000",
                Vec::new(),
                Duration::from_millis(5),
            )),
            Arc::clone(&sink),
        )
        .expect("first launch");

    let err = transport
        .launch(
            test_config("logs"),
            Box::new(LocalCoordinatorFactory::new(
                "shardId-000000000000",
                Vec::new(),
                Duration::from_millis(5),
            )),
            sink,
        )
        .expect_err("second launch must be rejected");
    assert!(matches!(err, LaunchError::AlreadyRunning(name) if name == "logs"));

    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[test]
fn records_are_forwarded_in_order_and_checkpointed() {
    let factory = LocalCoordinatorFactory::new(
        "shardId-000000000000",
        vec![
            vec![record(0, b"a"), record(1, b"b"), record(2, b"c")],
            vec![record(3, b"d"), record(4, b"e")],
        ],
        Duration::from_millis(5),
    );
    let store = factory.store();
    let (sender, receiver) = flume::unbounded::<Vec<u8>>();
    let transport = Arc::new(KinesisTransport::new());

    transport
        .launch(
            test_config("logs"),
            Box::new(factory),
            Arc::new(ChannelSink::new(sender)) as Arc<dyn RecordSink>,
        )
        .expect("launch");

    let mut forwarded = Vec::new();
    for _ in 0..5 {
        forwarded.push(receiver.recv_timeout(Duration::from_secs(5)).expect("record"));
    }
    assert_eq!(
        forwarded,
        vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"c".to_vec(),
            b"d".to_vec(),
            b"e".to_vec()
        ]
    );

    assert!(wait_until(Duration::from_secs(5), || {
        store.committed("shardId-000000000000").as_deref() == Some("0000000004")
    }));

    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[test]
fn throttle_timeout_stops_the_consumer_and_restart_resumes_after_the_checkpoint() {
    let factory = LocalCoordinatorFactory::new(
        "shardId-000000000000",
        vec![vec![record(0, b"before-throttle")]],
        Duration::from_millis(5),
    );
    let store = factory.store();
    // Clones share the stream script, so the test can append batches mid-run.
    let script = factory.clone();
    let (sender, receiver) = flume::unbounded::<Vec<u8>>();
    let transport = Arc::new(KinesisTransport::new());

    transport
        .launch(
            test_config("logs"),
            Box::new(factory),
            Arc::new(ChannelSink::new(sender)) as Arc<dyn RecordSink>,
        )
        .expect("launch");

    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).expect("record"),
        b"before-throttle".to_vec()
    );
    assert!(wait_until(Duration::from_secs(5), || {
        store.committed("shardId-000000000000").as_deref() == Some("0000000000")
    }));

    transport.set_throttled(true);
    script.push_batch(vec![record(1, b"after-restart-1"), record(2, b"after-restart-2")]);

    // The gate stays closed past the processing bound, so the run must shut
    // itself down exactly once.
    assert!(wait_until(Duration::from_secs(5), || {
        transport.stopped_due_to_throttling() && transport.state() == TransportState::Stopped
    }));
    assert!(receiver.try_recv().is_err(), "no forwarding while throttled");

    let restarter = {
        let transport = Arc::clone(&transport);
        thread::spawn(move || transport.request_restart_when_unthrottled())
    };

    // Still throttled: the restart must be parked on the gate.
    thread::sleep(Duration::from_millis(50));
    assert!(transport.stopped_due_to_throttling());

    transport.set_throttled(false);
    restarter.join().expect("restarter panicked");
    assert!(!transport.stopped_due_to_throttling());

    // The resumed run replays only records past the committed checkpoint.
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).expect("record"),
        b"after-restart-1".to_vec()
    );
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).expect("record"),
        b"after-restart-2".to_vec()
    );

    transport.stop();
    assert_eq!(transport.state(), TransportState::Stopped);
}
