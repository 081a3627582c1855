//! Log streaming for Fleet Gateway
//!
//! Each container being followed gets one session: a task that reads the
//! runtime's combined stdout/stderr stream, buffers decoded lines and
//! broadcasts them in batches. Sessions for different containers share
//! nothing but the session registry.

mod manager;
pub mod session;

pub use manager::{LogStreamManager, StreamStart};
pub use session::{LogSession, LOG_STREAM_SENTINEL};
