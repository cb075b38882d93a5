//! Acquisition sessions: one open link plus one capture file.
//!
//! A [`Session`] is acquired as a unit and released by consuming it, either
//! through [`Session::finish`] (normal stop) or [`Session::abort`] (transport
//! failure). Dropping it closes both handles as well.

use crate::constants::{ERROR_LOG_NAME, SESSION_EXTENSION, SESSION_TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::framing::{Command, FrameRead, FrameReader};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name for a session started at `started`.
///
/// The base pattern is `<prefix>_<YYYY-MM-DDTHH:MM:SS>.dat`. When that file
/// already exists in `dir` (two sessions in the same second), `_1`, `_2`, ...
/// is inserted before the extension so no earlier capture is overwritten.
pub fn session_file_name(dir: &Path, prefix: &str, started: NaiveDateTime) -> String {
    let stamp = started.format(SESSION_TIMESTAMP_FORMAT);
    let base = format!("{prefix}_{stamp}");

    let mut name = format!("{base}.{SESSION_EXTENSION}");
    let mut n = 1;
    while dir.join(&name).exists() {
        name = format!("{base}_{n}.{SESSION_EXTENSION}");
        n += 1;
    }
    name
}

/// Counters of one session, logged when it closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub file_name: String,
    pub frames: u64,
    pub bytes: u64,
    pub unterminated_chunks: u64,
}

/// An open capture: exclusive owner of the link and the output file.
pub struct Session<L> {
    link: L,
    file: BufWriter<File>,
    reader: FrameReader,
    summary: SessionSummary,
}

impl<L: Read + Write> Session<L> {
    /// Create the output file for a freshly opened link.
    pub fn open(link: L, dir: &Path, file_name: String) -> Result<Self> {
        let path = dir.join(&file_name);
        let file = File::create(&path)?;
        info!(file = %path.display(), "Session file created");

        Ok(Self {
            link,
            file: BufWriter::new(file),
            reader: FrameReader::new(),
            summary: SessionSummary {
                file_name,
                ..Default::default()
            },
        })
    }

    pub fn file_name(&self) -> &str {
        &self.summary.file_name
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Write one encoded command frame to the board.
    pub fn send_command(&mut self, command: Command) -> io::Result<()> {
        let frame = command.to_frame();
        debug!(%command, bytes = hex::encode(&frame), "Serial write");
        self.link.write_all(&frame)?;
        self.link.flush()
    }

    /// Read at most one frame and append its raw bytes to the file.
    ///
    /// Returns the number of bytes written; zero when the read timed out.
    pub fn capture_once(&mut self) -> io::Result<usize> {
        let bytes = match self.reader.read_frame(&mut self.link)? {
            FrameRead::Frame(bytes) => {
                self.summary.frames += 1;
                bytes
            }
            FrameRead::Unterminated(bytes) => {
                warn!(len = bytes.len(), "No frame terminator within the size limit; storing raw bytes");
                self.summary.unterminated_chunks += 1;
                bytes
            }
            FrameRead::Pending => return Ok(0),
        };
        self.file.write_all(&bytes)?;
        self.summary.bytes += bytes.len() as u64;
        Ok(bytes.len())
    }

    /// Normal stop: send `end`, flush buffered bytes to disk, close both
    /// handles.
    pub fn finish(mut self) -> Result<SessionSummary> {
        let sent = self.send_command(Command::End);
        self.flush_to_disk()?;
        sent?;
        Ok(self.summary)
    }

    /// Failure stop: keep whatever was received, close both handles.
    pub fn abort(mut self) -> SessionSummary {
        if let Err(e) = self.flush_to_disk() {
            warn!(file = %self.summary.file_name, "Failed to flush session file: {}", e);
        }
        self.summary
    }

    fn flush_to_disk(&mut self) -> io::Result<()> {
        let remainder = self.reader.take_remainder();
        if !remainder.is_empty() {
            debug!(len = remainder.len(), "Storing incomplete trailing frame");
            self.file.write_all(&remainder)?;
            self.summary.bytes += remainder.len() as u64;
        }
        self.file.flush()?;
        self.file.get_ref().sync_all()
    }
}

/// Append-only list of session files that ended on a transport error.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(ERROR_LOG_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, file_name: &str) -> io::Result<()> {
        let mut log = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(log, "{file_name}")
    }
}
