// Protocol and acquisition constants for the sensor board link

use std::time::Duration;

/// Byte that terminates every frame; COBS never emits it inside a body
pub const SENTINEL: u8 = 0x00;

/// Number of f32 values in one sampled record
pub const DEFAULT_RECORD_WIDTH: usize = 11;

/// Size of one f32 field on the wire (little-endian)
pub const FIELD_SIZE: usize = 4;

/// Largest payload the framer accepts
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Accumulated bytes after which an unterminated frame is released as-is
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + MAX_PAYLOAD_LEN / 254 + 2;

/// Chunk size used for each transport read
pub const READ_CHUNK_SIZE: usize = 512;

/// Baud rate used by the board when all sensors are active
pub const DEFAULT_BAUD_RATE: u32 = 460_800;

/// Serial read timeout; bounds one capture iteration
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Idle polling interval of the worker control loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often the relay samples the run-acknowledged flag
pub const DEFAULT_ACK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How often the relay samples the control channel level
pub const DEFAULT_CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on worker shutdown latency before escalation
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default session file prefix
pub const DEFAULT_FILE_PREFIX: &str = "data-cobs";

/// Extension of raw capture files
pub const SESSION_EXTENSION: &str = "dat";

/// Append-only log of sessions that ended on a transport error
pub const ERROR_LOG_NAME: &str = "error_log.txt";

/// Sibling directory receiving decoded CSV files
pub const PROCESSED_DIR_NAME: &str = "processed_data";

/// Extension of decoded output files
pub const DECODED_EXTENSION: &str = "csv";

/// Substring identifying the sensor board during port discovery
pub const DEFAULT_PORT_PATTERN: &str = "Nicla Sense";

/// Interval between discovery attempts while the board is absent
pub const PORT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// strftime pattern of the session timestamp (ISO-8601, second resolution)
pub const SESSION_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
