//! # Offline decoder
//!
//! Turns raw session files (`*.dat`, concatenated sentinel-terminated frames)
//! into CSV: one line per record, fields in wire order, no header.
//!
//! A frame that does not decode to exactly one record aborts the whole file;
//! corrupted captures are reported, never partially converted. Output is
//! written next to the input under `processed_data/` and only appears once
//! the file decoded completely.

use crate::constants::{DECODED_EXTENSION, DEFAULT_RECORD_WIDTH, PROCESSED_DIR_NAME, SESSION_EXTENSION};
use crate::error::{Error, Result};
use crate::framing::{Framer, split_frames};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Number of f32 fields per record
    pub record_width: usize,
    /// Treat bytes after the last sentinel as a fatal error
    pub strict_tail: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            record_width: DEFAULT_RECORD_WIDTH,
            strict_tail: false,
        }
    }
}

/// Outcome of one successfully decoded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub records: usize,
    /// Bytes after the last terminator (a capture stopped mid-frame)
    pub trailing_bytes: usize,
}

/// Where the CSV for `input` goes: `<dir>/processed_data/<stem>.csv`.
pub fn output_path(input: &Path) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new(""));
    // Append rather than `with_extension`: prefixes may contain dots
    let mut name = input.file_stem().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(DECODED_EXTENSION);
    dir.join(PROCESSED_DIR_NAME).join(name)
}

/// Session files directly inside `dir`, sorted by name.
pub fn find_session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SESSION_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a captured stream into records.
    ///
    /// Errors carry the zero-based index of the offending frame. Returns the
    /// records and the number of unterminated trailing bytes.
    pub fn decode_stream(&self, stream: &[u8]) -> std::result::Result<(Vec<Vec<f32>>, usize), (usize, Error)> {
        let (bodies, tail) = split_frames(stream);
        let mut framer = Framer::for_record(self.config.record_width);

        let mut records = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.iter().enumerate() {
            let record = framer.decode_record(body).map_err(|e| (index, e))?;
            records.push(record);
        }

        if !tail.is_empty() && self.config.strict_tail {
            return Err((bodies.len(), Error::IncompleteFrame(tail.len())));
        }
        Ok((records, tail.len()))
    }

    /// Decode one session file and write its CSV.
    pub fn decode_file(&self, input: &Path) -> Result<FileReport> {
        let stream = fs::read(input)?;
        let (records, trailing_bytes) = self.decode_stream(&stream).map_err(|(index, e)| Error::Frame {
            path: input.to_path_buf(),
            index,
            source: Box::new(e),
        })?;
        if trailing_bytes > 0 {
            warn!(
                file = %input.display(),
                trailing_bytes,
                "Ignoring incomplete frame at end of file"
            );
        }

        let output = output_path(input);
        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)?;
        }
        let partial = output.with_extension(format!("{DECODED_EXTENSION}.part"));
        if let Err(e) = write_csv(&partial, &records) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, &output)?;

        debug!(output = %output.display(), records = records.len(), "CSV written");
        Ok(FileReport {
            input: input.to_path_buf(),
            output,
            records: records.len(),
            trailing_bytes,
        })
    }

    /// Decode every session file in `dir`. A failed file does not stop the
    /// others.
    pub fn decode_all(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<FileReport>)>> {
        let files = find_session_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Decoding session files");

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let result = self.decode_file(&file);
            match &result {
                Ok(report) => info!(
                    file = %file.display(),
                    records = report.records,
                    "Decoded"
                ),
                Err(e) => error!(file = %file.display(), "Decoding aborted: {}", e),
            }
            results.push((file, result));
        }
        Ok(results)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

fn write_csv(path: &Path, records: &[Vec<f32>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    for record in records {
        writer.write_record(record.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
