use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for the `harvester-lib` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No serial port matching {0:?}. Is the sensor board connected?")]
    DeviceNotFound(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Frame encoding failed: {0}")]
    Encoding(String),

    #[error("Frame decoding failed: {0}")]
    Decoding(String),

    #[error("Decoded frame has {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Incomplete frame: {0} trailing bytes without a terminator")]
    IncompleteFrame(usize),

    #[error("{path:?}: frame {index}: {source}")]
    Frame {
        path: PathBuf,
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to spawn acquisition worker: {0}")]
    WorkerSpawn(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the frame-level failures that make a capture file unusable.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Decoding(_) | Error::LengthMismatch { .. } | Error::IncompleteFrame(_) => true,
            Error::Frame { source, .. } => source.is_corruption(),
            _ => false,
        }
    }
}
