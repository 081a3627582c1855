//! Per-container log buffering

use uuid::Uuid;

use crate::models::LogBatch;
use crate::runtime::LogFrame;

/// Line appended to the final batch of a session whose stream ended
pub const LOG_STREAM_SENTINEL: &str = "!stop!";

/// Buffer of one container's log lines between flushes
#[derive(Debug)]
pub struct LogSession {
    pub session_id: Uuid,
    pub container_id: String,
    buffer: Vec<String>,
    flush_threshold: usize,
}

impl LogSession {
    pub fn new(session_id: Uuid, container_id: String, flush_threshold: usize) -> Self {
        Self {
            session_id,
            container_id,
            buffer: Vec::with_capacity(flush_threshold),
            flush_threshold,
        }
    }

    /// Append one frame as one line; returns a batch once the threshold is hit
    pub fn push_frame(&mut self, frame: &LogFrame) -> Option<LogBatch> {
        self.buffer.push(decode_frame(frame));

        if self.buffer.len() >= self.flush_threshold {
            Some(self.take_batch(false))
        } else {
            None
        }
    }

    /// Lines buffered since the last flush
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Final batch: whatever is left, followed by the sentinel
    pub fn finish(mut self) -> LogBatch {
        self.buffer.push(LOG_STREAM_SENTINEL.to_string());
        self.take_batch(true)
    }

    fn take_batch(&mut self, terminated: bool) -> LogBatch {
        let lines = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.flush_threshold));

        LogBatch {
            container_id: self.container_id.clone(),
            lines,
            terminated,
        }
    }
}

/// Decode a frame to text, dropping the single line terminator the runtime
/// appends to every write
pub fn decode_frame(frame: &LogFrame) -> String {
    let text = String::from_utf8_lossy(&frame.message);
    let text = text.strip_suffix('\n').unwrap_or(&*text);
    let text = text.strip_suffix('\r').unwrap_or(text);
    text.to_string()
}
