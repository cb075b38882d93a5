//! Serial transport seam.
//!
//! The worker never talks to `serialport` directly; it asks a [`Connect`]
//! implementation for a fresh link each time a session starts. Tests plug in
//! an in-memory connector.

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::info;

/// Opens a full-duplex byte link to the board.
pub trait Connect {
    type Link: Read + Write;

    /// Open a new link. Failure is recoverable; the caller retries later.
    fn connect(&mut self) -> Result<Self::Link>;

    /// Human-readable endpoint name for logs.
    fn describe(&self) -> String;
}

/// Serial port settings for the sensor board.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub path: String,
    pub baud_rate: u32,
    /// Bounds every blocking read
    pub read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Connect for SerialConnector {
    type Link = Box<dyn SerialPort>;

    fn connect(&mut self) -> Result<Self::Link> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;

        info!(path = %self.path, baud = self.baud_rate, "Opened serial port");
        Ok(port)
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }
}
