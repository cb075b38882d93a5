//! # Acquisition worker
//!
//! The worker owns the serial link and the session file and runs the
//! run/stop state machine:
//!
//! - `Idle`: nothing open. A rising edge of the run signal arms a start; the
//!   link is opened on this or a later iteration (open failures are retried
//!   every poll). A falling edge disarms it.
//! - `Capturing`: one frame per iteration is copied, still encoded, into the
//!   session file. A falling edge sends `end` and closes the session; a
//!   transport error closes it, records the file in the error log and
//!   returns to `Idle`.
//! - `Terminating`: reached from any state when shutdown is requested. An
//!   open session is closed as for a falling edge. Terminal.
//!
//! The worker reacts to edges only, so a steady level never produces a second
//! `begin` or `end`.

use crate::constants::{DEFAULT_FILE_PREFIX, DEFAULT_POLL_INTERVAL};
use crate::error::Error;
use crate::framing::Command;
use crate::session::{ErrorLog, Session, SessionSummary, session_file_name};
use crate::signal::{Edge, SignalWatch, Signals};
use crate::transport::Connect;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, error, info, warn};

/// Settings of the acquisition worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory receiving session files and the error log
    pub data_dir: PathBuf,
    pub file_prefix: String,
    /// Command sent when a session opens
    pub begin_command: Command,
    /// Sleep between iterations while no session is open
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            begin_command: Command::Begin,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Observable state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum WorkerState {
    Idle,
    Capturing,
    Terminating,
}

/// Totals over the worker's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerReport {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub open_failures: u64,
    pub bytes_captured: u64,
}

enum Phase<L> {
    Idle,
    Capturing(Session<L>),
    Terminating,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

pub struct Worker<C: Connect> {
    connector: C,
    config: WorkerConfig,
    signals: Signals,
    run_watch: SignalWatch,
    error_log: ErrorLog,
    clock: Clock,
    phase: Phase<C::Link>,
    start_pending: bool,
    consecutive_open_failures: u64,
    report: WorkerReport,
}

impl<C: Connect> Worker<C> {
    pub fn new(connector: C, config: WorkerConfig, signals: Signals) -> Self {
        let run_watch = signals.run.watch();
        let error_log = ErrorLog::in_dir(&config.data_dir);
        Self {
            connector,
            config,
            signals,
            run_watch,
            error_log,
            clock: Box::new(|| Local::now().naive_local()),
            phase: Phase::Idle,
            start_pending: false,
            consecutive_open_failures: 0,
            report: WorkerReport::default(),
        }
    }

    /// Replace the wall clock used to stamp session file names.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> WorkerState {
        match self.phase {
            Phase::Idle => WorkerState::Idle,
            Phase::Capturing(_) => WorkerState::Capturing,
            Phase::Terminating => WorkerState::Terminating,
        }
    }

    pub fn report(&self) -> &WorkerReport {
        &self.report
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// File name of the open session, if any.
    pub fn session_file(&self) -> Option<&str> {
        match &self.phase {
            Phase::Capturing(session) => Some(session.file_name()),
            _ => None,
        }
    }

    /// The whole control loop: wait for the first run request, then iterate
    /// until shutdown.
    pub fn run(mut self) -> WorkerReport {
        info!(port = %self.connector.describe(), "Acquisition worker waiting for the first run request");
        if !self
            .signals
            .run
            .wait_until_set(&self.signals.shutdown, self.config.poll_interval)
        {
            info!("Shutdown requested before any run request");
            self.phase = Phase::Terminating;
            return self.report;
        }

        while self.step() != WorkerState::Terminating {}

        info!(report = ?self.report, "Acquisition worker stopped");
        self.report
    }

    /// One iteration of the control loop.
    pub fn step(&mut self) -> WorkerState {
        if matches!(self.phase, Phase::Terminating) {
            return WorkerState::Terminating;
        }
        if self.signals.shutdown.is_set() {
            self.terminate();
            return WorkerState::Terminating;
        }

        match self.run_watch.poll_edge() {
            Some(Edge::Rising) => {
                info!("Run requested");
                self.start_pending = true;
            }
            Some(Edge::Falling) => {
                info!("Stop requested");
                self.start_pending = false;
                self.stop_session();
            }
            None => {}
        }

        if self.start_pending && matches!(self.phase, Phase::Idle) {
            self.try_start();
        }

        let captured = match &mut self.phase {
            Phase::Capturing(session) => Some(session.capture_once()),
            _ => None,
        };
        match captured {
            Some(Ok(_)) => {}
            Some(Err(e)) => self.fail_session(e.into()),
            None => {
                if !self.config.poll_interval.is_zero() {
                    thread::sleep(self.config.poll_interval);
                }
            }
        }

        self.state()
    }

    fn try_start(&mut self) {
        let link = match self.connector.connect() {
            Ok(link) => link,
            Err(e) => {
                self.open_failed("open transport", e);
                return;
            }
        };

        let file_name = session_file_name(&self.config.data_dir, &self.config.file_prefix, (self.clock)());
        let mut session = match Session::open(link, &self.config.data_dir, file_name) {
            Ok(session) => session,
            Err(e) => {
                self.open_failed("create session file", e);
                return;
            }
        };
        self.consecutive_open_failures = 0;

        self.start_pending = false;
        self.report.sessions_started += 1;
        if let Err(e) = session.send_command(self.config.begin_command) {
            let summary = session.abort();
            self.record_failure(summary, e.into());
            return;
        }

        info!(file = %session.file_name(), command = %self.config.begin_command, "Capture started");
        self.signals.ack.set();
        self.phase = Phase::Capturing(session);
    }

    /// Count a failed start attempt; only the first of a run is a warning.
    fn open_failed(&mut self, what: &str, err: Error) {
        self.report.open_failures += 1;
        self.consecutive_open_failures += 1;
        if self.consecutive_open_failures == 1 {
            warn!(port = %self.connector.describe(), "Failed to {}, will retry: {}", what, err);
        } else {
            debug!(attempt = self.consecutive_open_failures, "Still unable to {}: {}", what, err);
        }
    }

    fn stop_session(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(session) => {
                let file_name = session.file_name().to_string();
                match session.finish() {
                    Ok(summary) => {
                        info!(
                            file = %summary.file_name,
                            frames = summary.frames,
                            bytes = summary.bytes,
                            "Capture stopped"
                        );
                        self.report.bytes_captured += summary.bytes;
                        self.report.sessions_completed += 1;
                    }
                    Err(e) => {
                        // The end command may not have reached the board
                        self.record_failure(
                            SessionSummary {
                                file_name,
                                ..Default::default()
                            },
                            e,
                        );
                    }
                }
                self.signals.ack.clear();
            }
            other => self.phase = other,
        }
    }

    fn fail_session(&mut self, err: Error) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Capturing(session) => {
                let summary = session.abort();
                self.record_failure(summary, err);
            }
            other => self.phase = other,
        }
    }

    fn record_failure(&mut self, summary: SessionSummary, err: Error) {
        error!(file = %summary.file_name, "Session closed after transport error: {}", err);
        if let Err(e) = self.error_log.record(&summary.file_name) {
            error!(log = %self.error_log.path().display(), "Failed to append to error log: {}", e);
        }
        self.report.bytes_captured += summary.bytes;
        self.report.sessions_failed += 1;
        self.start_pending = false;
        self.signals.ack.clear();
    }

    fn terminate(&mut self) {
        info!("Shutdown requested");
        self.start_pending = false;
        self.stop_session();
        self.signals.ack.clear();
        self.phase = Phase::Terminating;
    }
}
