use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use harvester_lib::constants::{
    DEFAULT_ACK_POLL_INTERVAL, DEFAULT_BAUD_RATE, DEFAULT_CONTROL_POLL_INTERVAL, DEFAULT_FILE_PREFIX,
    DEFAULT_POLL_INTERVAL, DEFAULT_PORT_PATTERN, DEFAULT_READ_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, PORT_RETRY_INTERVAL,
};
use harvester_lib::control::{ConsoleControl, ControlRelay, RelayConfig};
use harvester_lib::framing::Command;
use harvester_lib::ports::wait_for_port;
use harvester_lib::supervisor::ShutdownOutcome;
use harvester_lib::transport::SerialConnector;
use harvester_lib::{Signal, Signals, Supervisor, Worker, WorkerConfig};

/// Records raw sensor frames from the board to session files while the
/// console says `start`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port of the board. Discovered by description when omitted.
    #[arg(short, long)]
    port: Option<String>,
    /// Text matched against port descriptions during discovery.
    #[arg(long, default_value = DEFAULT_PORT_PATTERN)]
    pattern: String,
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Directory receiving session files and the error log.
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,
    /// Session file name prefix.
    #[arg(long, default_value = DEFAULT_FILE_PREFIX)]
    prefix: String,
    /// Command sent to start a capture: R (begin), A (accelerometer) or G (gyroscope).
    #[arg(long, default_value = "R", value_parser = parse_begin_command)]
    begin: Command,
    /// Serial read timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT.as_millis() as u64)]
    read_timeout_ms: u64,
    /// Idle polling interval of the worker in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_ms: u64,
    /// Console sampling interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONTROL_POLL_INTERVAL.as_millis() as u64)]
    control_poll_ms: u64,
    /// Interval for reporting the device state back, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ACK_POLL_INTERVAL.as_millis() as u64)]
    ack_poll_ms: u64,
    /// How long the worker gets to close its session on exit, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64)]
    shutdown_timeout_ms: u64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn parse_begin_command(s: &str) -> std::result::Result<Command, String> {
    let byte = match s.as_bytes() {
        [b] => b.to_ascii_uppercase(),
        _ => return Err(format!("expected a single command letter, got {s:?}")),
    };
    match Command::try_from(byte) {
        Ok(Command::End) => Err("Q ends a capture and cannot start one".to_string()),
        Ok(command) => Ok(command),
        Err(_) => Err(format!("unknown command {s:?} (R, A or G)")),
    }
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG overrides
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Acquisition failed: {:?}", e);
            1
        }
    };

    // The console reader may still be blocked on stdin; exit explicitly
    drop(guard);
    process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", cli.data_dir))?;

    let path = match cli.port {
        Some(path) => path,
        None => {
            info!(pattern = %cli.pattern, "Looking for the sensor board...");
            tokio::select! {
                found = wait_for_port(&cli.pattern, PORT_RETRY_INTERVAL) => found?.port_name,
                _ = signal::ctrl_c() => {
                    info!("Interrupted before the board was found");
                    return Ok(0);
                }
            }
        }
    };

    let connector = SerialConnector::new(path)
        .with_baud_rate(cli.baud)
        .with_read_timeout(Duration::from_millis(cli.read_timeout_ms));
    let config = WorkerConfig {
        data_dir: cli.data_dir,
        file_prefix: cli.prefix,
        begin_command: cli.begin,
        poll_interval: Duration::from_millis(cli.poll_ms),
    };

    let signals = Signals::new();
    let supervisor = Supervisor::spawn(Worker::new(connector, config, signals.clone()))?;

    let relay = ControlRelay::new(
        ConsoleControl::stdin(),
        signals,
        RelayConfig {
            control_poll: Duration::from_millis(cli.control_poll_ms),
            ack_poll: Duration::from_millis(cli.ack_poll_ms),
        },
    );
    let stop_relay = Signal::new();
    let mut relay_task = tokio::spawn(relay.run(stop_relay.clone()));
    info!("Type `start` to begin a capture, `stop` to end it, `quit` to exit");

    tokio::select! {
        _ = signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
        _ = &mut relay_task => info!("Console closed, shutting down"),
        _ = worker_exited(&supervisor) => warn!("Acquisition worker exited unexpectedly"),
    }

    let outcome = supervisor
        .shutdown(Duration::from_millis(cli.shutdown_timeout_ms))
        .await;

    // Give the relay a chance to report the final device state
    stop_relay.set();
    if !relay_task.is_finished() {
        let _ = tokio::time::timeout(relay_drain_timeout(cli.ack_poll_ms), relay_task).await;
    }

    match outcome {
        ShutdownOutcome::Clean(report) => {
            info!(
                started = report.sessions_started,
                completed = report.sessions_completed,
                failed = report.sessions_failed,
                bytes = report.bytes_captured,
                "Acquisition finished"
            );
            Ok(0)
        }
        ShutdownOutcome::Crashed => bail!("acquisition worker crashed"),
        ShutdownOutcome::TimedOut => {
            error!("Acquisition worker did not stop in time; the last session may be incomplete");
            Ok(2)
        }
    }
}

/// Two ack polls: enough for the relay to see the ack fall and report it.
fn relay_drain_timeout(ack_poll_ms: u64) -> Duration {
    Duration::from_millis(ack_poll_ms.saturating_mul(2))
}

async fn worker_exited(supervisor: &Supervisor) {
    while !supervisor.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
