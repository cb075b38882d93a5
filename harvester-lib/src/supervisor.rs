//! Worker lifecycle: a dedicated OS thread for blocking serial I/O, and a
//! bounded, escalating shutdown.

use crate::error::{Error, Result};
use crate::signal::Signals;
use crate::transport::Connect;
use crate::worker::{Worker, WorkerReport};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How the worker left.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    /// The control loop observed shutdown and returned
    Clean(WorkerReport),
    /// The worker thread panicked
    Crashed,
    /// The worker did not exit within the bound; its thread was abandoned
    TimedOut,
}

/// Owns the acquisition worker thread.
pub struct Supervisor {
    signals: Signals,
    done: oneshot::Receiver<std::thread::Result<WorkerReport>>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Start `worker` on its own thread. The worker shares `signals` with
    /// whoever drives the control side.
    pub fn spawn<C>(worker: Worker<C>) -> Result<Self>
    where
        C: Connect + Send + 'static,
        C::Link: Send,
    {
        let signals = worker.signals().clone();
        let (tx, done) = oneshot::channel();
        let ack = signals.ack.clone();

        let handle = thread::Builder::new()
            .name("acquisition-worker".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run()));
                // A crashed worker must not leave the device reported as running
                ack.clear();
                let _ = tx.send(result);
            })
            .map_err(Error::WorkerSpawn)?;

        info!("Acquisition worker started");
        Ok(Self {
            signals,
            done,
            handle: Some(handle),
        })
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// True once the worker thread has left its control loop.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Request shutdown and wait at most `bound` for the worker to exit.
    pub async fn shutdown(mut self, bound: Duration) -> ShutdownOutcome {
        info!(timeout = ?bound, "Stopping acquisition worker");
        self.signals.shutdown.set();

        let outcome = match timeout(bound, &mut self.done).await {
            Ok(Ok(Ok(report))) => ShutdownOutcome::Clean(report),
            Ok(Ok(Err(_))) | Ok(Err(_)) => {
                error!("Acquisition worker crashed");
                ShutdownOutcome::Crashed
            }
            Err(_) => {
                warn!("Acquisition worker did not stop within {:?}; abandoning it", bound);
                self.signals.ack.clear();
                // Dropping the handle detaches the thread
                self.handle.take();
                return ShutdownOutcome::TimedOut;
            }
        };

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        outcome
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Never leave a detached worker capturing
        self.signals.shutdown.set();
    }
}
