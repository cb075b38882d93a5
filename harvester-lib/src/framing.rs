//! # Sentinel-delimited framing for the sensor board serial link
//!
//! Every unit on the wire is a COBS-encoded body followed by a single
//! [`SENTINEL`] byte. COBS guarantees the sentinel never appears inside a body,
//! so a receiver that lost sync only has to scan forward to the next sentinel.
//!
//! - [`encode`] / [`decode`] are the raw codec.
//! - [`Framer`] adds the channel context: it knows the exact payload length of
//!   the frames it handles (one command byte, or one numeric record) and
//!   rejects anything else.
//! - [`FrameReader`] pulls sentinel-terminated frames out of a blocking
//!   transport without ever spinning on a stream that stopped producing
//!   terminators.

use crate::constants::{FIELD_SIZE, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, READ_CHUNK_SIZE, SENTINEL};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{self, Read};
use strum_macros::Display;
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::F32;

/// Single-byte commands understood by the board firmware.
///
/// The byte values are a fixed device contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Start streaming records
    #[strum(to_string = "begin")]
    Begin = b'R',
    /// Stop streaming records
    #[strum(to_string = "end")]
    End = b'Q',
    /// Start streaming accelerometer records only
    #[strum(to_string = "accelerometer")]
    Accelerometer = b'A',
    /// Start streaming gyroscope records only
    #[strum(to_string = "gyroscope")]
    Gyroscope = b'G',
}

impl Command {
    /// Full wire representation: COBS body plus sentinel.
    pub fn to_frame(self) -> Bytes {
        // A one-byte payload always fits
        let byte: u8 = self.into();
        let mut frame = BytesMut::from(&cobs::encode_vec(&[byte])[..]);
        frame.put_u8(SENTINEL);
        frame.freeze()
    }
}

/// COBS-encode `payload`. The result never contains [`SENTINEL`]; the caller
/// terminates the frame.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::Encoding(format!(
            "payload of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    Ok(Bytes::from(cobs::encode_vec(payload)))
}

/// Encode `payload` and append the terminating sentinel.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let body = encode(payload)?;
    let mut frame = BytesMut::with_capacity(body.len() + 1);
    frame.extend_from_slice(&body);
    frame.put_u8(SENTINEL);
    Ok(frame.freeze())
}

/// Decode a frame body (without its sentinel).
///
/// Only canonical output of [`encode`] is accepted: the decoded payload is
/// re-encoded and must reproduce `body` exactly.
pub fn decode(body: &[u8]) -> Result<Bytes> {
    if body.is_empty() {
        return Err(Error::Decoding("empty frame body".to_string()));
    }
    if let Some(pos) = body.iter().position(|&b| b == SENTINEL) {
        return Err(Error::Decoding(format!("sentinel inside frame body at offset {pos}")));
    }

    let decoded = cobs::decode_vec(body)
        .map_err(|_| Error::Decoding(format!("malformed COBS body ({} bytes)", body.len())))?;

    if cobs::encode_vec(&decoded) != body {
        return Err(Error::Decoding(format!(
            "non-canonical COBS body ({} bytes decoded from {})",
            decoded.len(),
            body.len()
        )));
    }
    Ok(Bytes::from(decoded))
}

/// Codec bound to one channel: every payload it handles has the same length.
#[derive(Debug, Clone)]
pub struct Framer {
    payload_len: usize,
    record: BytesMut,
}

impl Framer {
    /// Framer for the data channel: `width` little-endian f32 values.
    pub fn for_record(width: usize) -> Self {
        Self::with_payload_len(width * FIELD_SIZE)
    }

    /// Framer for the command channel: one command byte.
    pub fn for_command() -> Self {
        Self::with_payload_len(1)
    }

    pub fn with_payload_len(payload_len: usize) -> Self {
        Self {
            payload_len,
            record: BytesMut::with_capacity(payload_len),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Encode one payload of the expected length into a body (no sentinel).
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes> {
        if payload.len() != self.payload_len {
            return Err(Error::LengthMismatch {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }
        encode(payload)
    }

    /// Decode a body into the internal record buffer and return it.
    ///
    /// Any truncated prefix of a valid body fails here: a prefix can never
    /// decode to the full payload length.
    pub fn decode(&mut self, body: &[u8]) -> Result<&[u8]> {
        let decoded = decode(body)?;
        if decoded.len() != self.payload_len {
            return Err(Error::LengthMismatch {
                expected: self.payload_len,
                actual: decoded.len(),
            });
        }
        self.record.clear();
        self.record.extend_from_slice(&decoded);
        Ok(&self.record)
    }

    /// Decode a body and interpret it as little-endian f32 values.
    pub fn decode_record(&mut self, body: &[u8]) -> Result<Vec<f32>> {
        let payload = self.decode(body)?;
        let fields = <[F32]>::ref_from_bytes(payload)
            .map_err(|_| Error::Decoding(format!("{} bytes is not a whole number of f32 fields", payload.len())))?;
        Ok(fields.iter().map(|f| f.get()).collect())
    }
}

/// Encode `values` as one little-endian record payload.
pub fn record_payload(values: &[f32]) -> Bytes {
    let mut payload = BytesMut::with_capacity(values.len() * FIELD_SIZE);
    for value in values {
        payload.put_f32_le(*value);
    }
    payload.freeze()
}

/// Result of one [`FrameReader::read_frame`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    /// Raw bytes of one frame, sentinel included
    Frame(Bytes),
    /// `MAX_FRAME_LEN` bytes arrived without a sentinel; released unchanged
    Unterminated(Bytes),
    /// The transport timed out or had nothing to give
    Pending,
}

/// Pulls raw, still-encoded frames out of a byte stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `source` until a sentinel is seen, the read times out, or
    /// the accumulated bytes exceed `MAX_FRAME_LEN`.
    ///
    /// Timeouts are not errors; the bytes read so far stay buffered for the
    /// next call.
    pub fn read_frame<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<FrameRead> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == SENTINEL) {
                return Ok(FrameRead::Frame(self.pending.split_to(pos + 1).freeze()));
            }
            if self.pending.len() >= MAX_FRAME_LEN {
                return Ok(FrameRead::Unterminated(self.pending.split().freeze()));
            }

            match source.read(&mut chunk) {
                Ok(0) => return Ok(FrameRead::Pending),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Ok(FrameRead::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of buffered bytes not yet terminated by a sentinel.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Hand back whatever is buffered. Non-empty output is an incomplete frame.
    pub fn take_remainder(&mut self) -> Bytes {
        self.pending.split().freeze()
    }
}

/// Split a captured byte stream into frame bodies.
///
/// Returns the bodies (sentinels stripped) and the trailing bytes that were
/// never terminated.
pub fn split_frames(stream: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut bodies = Vec::new();
    let mut rest = stream;
    while let Some(pos) = rest.iter().position(|&b| b == SENTINEL) {
        bodies.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    (bodies, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn command_frames_match_device_contract() {
        assert_eq!(Command::Begin.to_frame().as_ref(), &[0x02, b'R', 0x00]);
        assert_eq!(Command::End.to_frame().as_ref(), &[0x02, b'Q', 0x00]);
        assert_eq!(Command::try_from(b'A').unwrap(), Command::Accelerometer);
        assert!(Command::try_from(b'x').is_err());
    }

    #[test]
    fn encode_removes_every_sentinel() {
        let body = encode(&[0x00, 0x11, 0x00, 0x00, 0x22]).unwrap();
        assert!(!body.contains(&SENTINEL));
        assert_eq!(body.as_ref(), &[0x01, 0x02, 0x11, 0x01, 0x02, 0x22]);
    }

    #[test]
    fn oversized_payload_is_an_encoding_error() {
        let payload = vec![1u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(encode(&payload), Err(Error::Encoding(_))));
    }

    #[test]
    fn decode_rejects_sentinel_and_empty_bodies() {
        assert!(matches!(decode(&[]), Err(Error::Decoding(_))));
        assert!(matches!(decode(&[0x02, 0x00, 0x01]), Err(Error::Decoding(_))));
    }

    #[test]
    fn framer_rejects_wrong_length() {
        let mut framer = Framer::for_record(2);
        let body = encode(&[1, 2, 3, 4]).unwrap();
        match framer.decode(&body) {
            Err(Error::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 4);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn framer_decodes_record_values() {
        let values = [1.5f32, -2.25, 0.0];
        let body = encode(&record_payload(&values)).unwrap();
        let mut framer = Framer::for_record(3);
        assert_eq!(framer.decode_record(&body).unwrap(), values.to_vec());
    }

    #[test]
    fn reader_splits_frames_across_chunks() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&Command::Begin.to_frame());
        stream.extend_from_slice(&[0x03, 0x01, 0x02]);
        let mut source = Cursor::new(stream);
        let mut reader = FrameReader::new();

        assert_eq!(
            reader.read_frame(&mut source).unwrap(),
            FrameRead::Frame(Bytes::from_static(&[0x02, b'R', 0x00]))
        );
        // Cursor is exhausted: the partial frame stays buffered
        assert_eq!(reader.read_frame(&mut source).unwrap(), FrameRead::Pending);
        assert_eq!(reader.buffered(), 3);
        assert_eq!(reader.take_remainder().as_ref(), &[0x03, 0x01, 0x02]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn reader_releases_unterminated_runs() {
        let mut source = Cursor::new(vec![0x55u8; MAX_FRAME_LEN + 10]);
        let mut reader = FrameReader::new();
        match reader.read_frame(&mut source).unwrap() {
            FrameRead::Unterminated(bytes) => assert!(bytes.len() >= MAX_FRAME_LEN),
            other => panic!("expected Unterminated, got {:?}", other),
        }
    }

    #[test]
    fn split_frames_keeps_trailing_bytes() {
        let (bodies, rest) = split_frames(&[0x02, 0x05, 0x00, 0x01, 0x00, 0x03, 0x07]);
        assert_eq!(bodies, vec![&[0x02, 0x05][..], &[0x01][..]]);
        assert_eq!(rest, &[0x03, 0x07]);
    }
}
