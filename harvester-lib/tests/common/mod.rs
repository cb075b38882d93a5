//! Common test utilities: an in-memory serial board and fixed clocks

// Allow unused items since this is a shared module
// used across multiple test files - not all items are used in every test file
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use harvester_lib::error::{Error, Result};
use harvester_lib::framing::{Command, encode_frame, record_payload};
use harvester_lib::transport::Connect;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// One scripted response to a `read` call on the mock link.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
pub struct BoardState {
    /// Everything the host wrote, across all links
    pub written: Vec<u8>,
    pub reads: VecDeque<ReadStep>,
    /// Number of upcoming `connect` calls that fail
    pub refuse_connects: usize,
    pub connects: usize,
    /// Writes fail with `BrokenPipe` while set
    pub fail_writes: bool,
}

/// Connector handing out links to one shared scripted board.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub board: Arc<Mutex<BoardState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_read(&self, step: ReadStep) {
        self.board.lock().unwrap().reads.push_back(step);
    }

    pub fn refuse_connects(&self, count: usize) {
        self.board.lock().unwrap().refuse_connects = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.board.lock().unwrap().fail_writes = fail;
    }

    pub fn connects(&self) -> usize {
        self.board.lock().unwrap().connects
    }

    pub fn written(&self) -> Vec<u8> {
        self.board.lock().unwrap().written.clone()
    }

    /// Count command frames the host sent.
    pub fn commands_sent(&self, command: Command) -> usize {
        let frame = command.to_frame();
        self.written()
            .split_inclusive(|&b| b == 0)
            .filter(|chunk| *chunk == frame.as_ref())
            .count()
    }
}

pub struct MockLink {
    board: Arc<Mutex<BoardState>>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut board = self.board.lock().unwrap();
        match board.reads.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    board.reads.push_front(ReadStep::Data(rest));
                }
                Ok(n)
            }
            Some(ReadStep::Fail(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::from(io::ErrorKind::TimedOut)),
        }
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut board = self.board.lock().unwrap();
        if board.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        board.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connect for MockConnector {
    type Link = MockLink;

    fn connect(&mut self) -> Result<MockLink> {
        let mut board = self.board.lock().unwrap();
        if board.refuse_connects > 0 {
            board.refuse_connects -= 1;
            return Err(Error::Io(io::Error::new(io::ErrorKind::NotFound, "board unplugged")));
        }
        board.connects += 1;
        Ok(MockLink {
            board: Arc::clone(&self.board),
        })
    }

    fn describe(&self) -> String {
        "mock-board".to_string()
    }
}

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// A fixed instant for deterministic session names.
pub fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(12, 0, 5)
        .unwrap()
}

/// Three records of eleven distinct, exactly representable values.
pub fn sample_records() -> Vec<Vec<f32>> {
    (0..3)
        .map(|r| (0..11).map(|i| (r * 11 + i) as f32 * 1.25 - 3.0).collect())
        .collect()
}

/// Raw wire bytes for `records`, as the board would stream them.
pub fn framed_records(records: &[Vec<f32>]) -> Vec<u8> {
    let mut stream = Vec::new();
    for record in records {
        stream.extend_from_slice(&encode_frame(&record_payload(record)).expect("encode"));
    }
    stream
}
