//! # Control channel boundary
//!
//! The remote start/stop switch lives outside this crate (a wireless link in
//! deployment, the console in the bundled binary). The core only needs two
//! operations from it, captured by [`ControlChannel`].
//!
//! [`ControlRelay`] is the async side of the system: it copies the channel's
//! level into the shared run signal and reports the worker's run-acknowledged
//! flag back to the channel, on edges only, so the remote side shows the real
//! device state rather than the requested one.

use crate::constants::{DEFAULT_ACK_POLL_INTERVAL, DEFAULT_CONTROL_POLL_INTERVAL};
use crate::error::Result;
use crate::signal::{Edge, Signal, SignalWatch, Signals};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// What the core needs from the remote control side.
pub trait ControlChannel {
    /// Current level of the "should be running" switch.
    fn is_run_requested(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// Tell the remote side whether a capture is actually running.
    fn notify_run_acknowledged(&mut self, running: bool) -> impl Future<Output = Result<()>> + Send;

    /// True once the remote side will never send another request.
    fn is_closed(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the channel level is sampled
    pub control_poll: Duration,
    /// How often the run-acknowledged flag is sampled
    pub ack_poll: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            control_poll: DEFAULT_CONTROL_POLL_INTERVAL,
            ack_poll: DEFAULT_ACK_POLL_INTERVAL,
        }
    }
}

/// Bridges a [`ControlChannel`] and the shared [`Signals`].
pub struct ControlRelay<C> {
    channel: C,
    signals: Signals,
    config: RelayConfig,
    ack_watch: SignalWatch,
    unsent_ack: Option<bool>,
    reported: Option<bool>,
    channel_healthy: bool,
}

impl<C: ControlChannel> ControlRelay<C> {
    pub fn new(channel: C, signals: Signals, config: RelayConfig) -> Self {
        let ack_watch = signals.ack.watch();
        Self {
            channel,
            signals,
            config,
            ack_watch,
            unsent_ack: None,
            reported: None,
            channel_healthy: true,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Sample the channel once and mirror its level into the run signal.
    ///
    /// When the channel is unavailable the last known level is kept.
    pub async fn poll_control(&mut self) {
        match self.channel.is_run_requested().await {
            Ok(level) => {
                if !self.channel_healthy {
                    info!("Control channel available again");
                    self.channel_healthy = true;
                }
                if level != self.signals.run.is_set() {
                    info!(running = level, "Run request changed");
                }
                self.signals.run.store(level);
            }
            Err(e) => {
                if self.channel_healthy {
                    warn!("Control channel unavailable, keeping last request: {}", e);
                    self.channel_healthy = false;
                }
            }
        }
    }

    /// Sample the run-acknowledged flag and report a transition to the
    /// channel. A failed report is retried on the next call.
    pub async fn poll_ack(&mut self) {
        if let Some(edge) = self.ack_watch.poll_edge() {
            self.unsent_ack = Some(edge == Edge::Rising);
        }
        if let Some(running) = self.unsent_ack {
            match self.channel.notify_run_acknowledged(running).await {
                Ok(()) => {
                    debug!(running, "Reported device state");
                    self.unsent_ack = None;
                    self.reported = Some(running);
                }
                Err(e) => warn!(running, "Failed to report device state: {}", e),
            }
        }
    }

    /// Run until `shutdown` is raised or the channel closes. Returns the
    /// channel after telling it the capture has stopped.
    pub async fn run(mut self, shutdown: Signal) -> C {
        let mut control_tick = interval(self.config.control_poll);
        let mut ack_tick = interval(self.config.ack_poll);
        control_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ack_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.is_set() && !self.channel.is_closed() {
            tokio::select! {
                _ = control_tick.tick() => self.poll_control().await,
                _ = ack_tick.tick() => self.poll_ack().await,
            }
        }

        if self.channel.is_closed() {
            info!("Control channel closed");
            self.signals.run.clear();
        }
        if self.reported == Some(true) {
            if let Err(e) = self.channel.notify_run_acknowledged(false).await {
                warn!("Failed to report final device state: {}", e);
            }
        }
        self.channel
    }
}

/// Control channel driven by text lines, normally stdin.
///
/// `start`/`1` requests a run, `stop`/`0` requests a stop, `quit`/`q` closes
/// the channel. End of input also closes it.
pub struct ConsoleControl {
    level: watch::Receiver<bool>,
    closed: Signal,
    reader: JoinHandle<()>,
}

impl ConsoleControl {
    /// Read commands from the process's stdin.
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, level) = watch::channel(false);
        let closed = Signal::new();
        let reader_closed = closed.clone();

        let reader = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match line.trim().to_ascii_lowercase().as_str() {
                        "start" | "1" => {
                            let _ = tx.send(true);
                        }
                        "stop" | "0" => {
                            let _ = tx.send(false);
                        }
                        "quit" | "q" => break,
                        "" => {}
                        other => warn!("Unknown console command {:?} (start, stop, quit)", other),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                }
            }
            reader_closed.set();
        });

        Self { level, closed, reader }
    }
}

impl ControlChannel for ConsoleControl {
    async fn is_run_requested(&mut self) -> Result<bool> {
        Ok(*self.level.borrow())
    }

    async fn notify_run_acknowledged(&mut self, running: bool) -> Result<()> {
        if running {
            info!("Device is capturing");
        } else {
            info!("Device is idle");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}

impl Drop for ConsoleControl {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct ScriptedChannel {
        levels: VecDeque<Result<bool>>,
        notified: Vec<bool>,
        fail_notify: bool,
    }

    impl ControlChannel for ScriptedChannel {
        async fn is_run_requested(&mut self) -> Result<bool> {
            self.levels.pop_front().unwrap_or(Ok(false))
        }

        async fn notify_run_acknowledged(&mut self, running: bool) -> Result<()> {
            if self.fail_notify {
                return Err(Error::Io(io::Error::other("link down")));
            }
            self.notified.push(running);
            Ok(())
        }
    }

    fn unavailable() -> Result<bool> {
        Err(Error::Io(io::Error::other("not connected")))
    }

    #[tokio::test]
    async fn unavailable_channel_keeps_last_level() {
        let signals = Signals::new();
        let channel = ScriptedChannel {
            levels: VecDeque::from(vec![Ok(true), unavailable(), unavailable(), Ok(false)]),
            ..Default::default()
        };
        let mut relay = ControlRelay::new(channel, signals.clone(), RelayConfig::default());

        relay.poll_control().await;
        assert!(signals.run.is_set());
        relay.poll_control().await;
        relay.poll_control().await;
        assert!(signals.run.is_set());
        relay.poll_control().await;
        assert!(!signals.run.is_set());
    }

    #[tokio::test]
    async fn ack_is_reported_on_edges_only() {
        let signals = Signals::new();
        let mut relay = ControlRelay::new(ScriptedChannel::default(), signals.clone(), RelayConfig::default());

        relay.poll_ack().await;
        signals.ack.set();
        relay.poll_ack().await;
        relay.poll_ack().await;
        signals.ack.clear();
        relay.poll_ack().await;
        relay.poll_ack().await;

        assert_eq!(relay.channel().notified, vec![true, false]);
    }

    #[tokio::test]
    async fn failed_report_is_retried() {
        let signals = Signals::new();
        let channel = ScriptedChannel {
            fail_notify: true,
            ..Default::default()
        };
        let mut relay = ControlRelay::new(channel, signals.clone(), RelayConfig::default());

        signals.ack.set();
        relay.poll_ack().await;
        assert!(relay.channel().notified.is_empty());

        relay.channel.fail_notify = false;
        relay.poll_ack().await;
        assert_eq!(relay.channel().notified, vec![true]);
    }

    #[tokio::test]
    async fn console_lines_drive_the_level() {
        let mut console = ConsoleControl::from_reader(BufReader::new(&b"start\nbogus\nstop\nstart\n"[..]));
        // Input ends after the last line, which closes the channel
        while !console.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(console.is_run_requested().await.unwrap());
    }

    #[tokio::test]
    async fn relay_stops_when_console_quits() {
        let signals = Signals::new();
        let console = ConsoleControl::from_reader(BufReader::new(&b"start\nquit\n"[..]));
        let config = RelayConfig {
            control_poll: Duration::from_millis(1),
            ack_poll: Duration::from_millis(1),
        };
        let relay = ControlRelay::new(console, signals.clone(), config);

        let console = tokio::time::timeout(Duration::from_secs(5), relay.run(Signal::new()))
            .await
            .expect("relay should stop once the console quits");
        assert!(console.is_closed());
        assert!(!signals.run.is_set());
    }
}
