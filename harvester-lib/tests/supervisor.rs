mod common;

use common::{MockConnector, fixed_time};
use harvester_lib::error::Result;
use harvester_lib::framing::Command;
use harvester_lib::supervisor::ShutdownOutcome;
use harvester_lib::transport::Connect;
use harvester_lib::{Signal, Signals, Supervisor, Worker, WorkerConfig};
use std::path::Path;
use std::time::Duration;

fn config(dir: &Path) -> WorkerConfig {
    WorkerConfig {
        data_dir: dir.to_path_buf(),
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

async fn wait_for(signal: &Signal, level: bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while signal.is_set() != level {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("signal never reached the expected level");
}

#[tokio::test]
async fn test_clean_shutdown_closes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let board = MockConnector::new();
    let worker = Worker::new(board.clone(), config(dir.path()), Signals::new()).with_clock(fixed_time);
    let supervisor = Supervisor::spawn(worker).unwrap();
    let signals = supervisor.signals().clone();

    signals.run.set();
    wait_for(&signals.ack, true).await;
    assert!(!supervisor.is_finished());

    match supervisor.shutdown(Duration::from_secs(5)).await {
        ShutdownOutcome::Clean(report) => {
            assert_eq!(report.sessions_started, 1);
            assert_eq!(report.sessions_completed, 1);
        }
        other => panic!("expected a clean shutdown, got {:?}", other),
    }
    assert!(!signals.ack.is_set());
    assert_eq!(board.commands_sent(Command::Begin), 1);
    assert_eq!(board.commands_sent(Command::End), 1);
}

#[tokio::test]
async fn test_shutdown_before_any_run_request() {
    let dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(MockConnector::new(), config(dir.path()), Signals::new());
    let supervisor = Supervisor::spawn(worker).unwrap();

    assert_eq!(
        supervisor.shutdown(Duration::from_secs(5)).await,
        ShutdownOutcome::Clean(Default::default())
    );
}

/// Connector whose `connect` never comes back in time.
struct StuckConnector;

impl Connect for StuckConnector {
    type Link = common::MockLink;

    fn connect(&mut self) -> Result<Self::Link> {
        std::thread::sleep(Duration::from_secs(2));
        MockConnector::new().connect()
    }

    fn describe(&self) -> String {
        "stuck".to_string()
    }
}

#[tokio::test]
async fn test_unresponsive_worker_is_abandoned() {
    let dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(StuckConnector, config(dir.path()), Signals::new());
    let supervisor = Supervisor::spawn(worker).unwrap();
    let signals = supervisor.signals().clone();

    signals.run.set();
    // Let the worker enter the blocking connect
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        supervisor.shutdown(Duration::from_millis(50)).await,
        ShutdownOutcome::TimedOut
    );
    assert!(!signals.ack.is_set());
}

/// Connector that panics, standing in for a bug in the worker.
struct PanickingConnector;

impl Connect for PanickingConnector {
    type Link = common::MockLink;

    fn connect(&mut self) -> Result<Self::Link> {
        panic!("connector bug");
    }

    fn describe(&self) -> String {
        "panicking".to_string()
    }
}

#[tokio::test]
async fn test_worker_panic_is_reported_as_crash() {
    let dir = tempfile::tempdir().unwrap();
    let worker = Worker::new(PanickingConnector, config(dir.path()), Signals::new());
    let supervisor = Supervisor::spawn(worker).unwrap();
    let signals = supervisor.signals().clone();

    signals.run.set();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !supervisor.is_finished() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(supervisor.shutdown(Duration::from_secs(5)).await, ShutdownOutcome::Crashed);
    assert!(!signals.ack.is_set());
}
