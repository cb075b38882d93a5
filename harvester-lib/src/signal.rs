//! Shared flags between the control relay and the acquisition worker.
//!
//! Only `set`, `clear`, `is_set` and edge observation are exposed. The worker
//! and the relay each keep their own [`SignalWatch`] so they react to
//! transitions, never to a steady level.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A transition observed on a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// A cloneable handle to one shared boolean flag.
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set or clear according to `level`.
    pub fn store(&self, level: bool) {
        self.0.store(level, Ordering::SeqCst);
    }

    /// Start watching for transitions. The watch assumes the flag was clear.
    pub fn watch(&self) -> SignalWatch {
        SignalWatch {
            signal: self.clone(),
            last: false,
        }
    }

    /// Block until the flag is set or `abort` is raised, sampling every
    /// `interval`. Returns the flag state at wake-up.
    pub fn wait_until_set(&self, abort: &Signal, interval: Duration) -> bool {
        loop {
            if self.is_set() {
                return true;
            }
            if abort.is_set() {
                return false;
            }
            thread::sleep(interval);
        }
    }
}

/// Edge detector over a [`Signal`].
#[derive(Debug, Clone)]
pub struct SignalWatch {
    signal: Signal,
    last: bool,
}

impl SignalWatch {
    /// Sample the flag and report a transition since the previous sample.
    pub fn poll_edge(&mut self) -> Option<Edge> {
        let level = self.signal.is_set();
        let edge = match (self.last, level) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        };
        self.last = level;
        edge
    }

    /// Level seen at the last sample.
    pub fn last_level(&self) -> bool {
        self.last
    }
}

/// The three flags shared by the supervisor, the worker and the relay.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Operator wants acquisition running
    pub run: Signal,
    /// A session is open on the device
    pub ack: Signal,
    /// The worker must leave its control loop
    pub shutdown: Signal,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }
}
