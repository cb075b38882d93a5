pub mod constants;
pub mod control;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod ports;
pub mod session;
pub mod signal;
pub mod supervisor;
pub mod transport;
pub mod worker;


// Re-export the pieces a binary needs to stand up an acquisition
pub use decoder::{Decoder, DecoderConfig};
pub use error::{Error, Result};
pub use signal::{Signal, Signals};
pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerConfig, WorkerState};
