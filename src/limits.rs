//! Limits and drain settings.

use std::time::Duration;

/// Maximum bytes scanned for a single chunk-size line, extension included.
pub const MAX_CHUNK_LINE_BYTES: usize = 16 * 1024;

/// Maximum bytes scanned for the whole trailer block.
pub const MAX_TRAILER_BYTES: usize = 16 * 1024;

/// Default number of bytes requested from the transport per fill.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Framing limits applied while decoding.
///
/// Exceeding either limit is a framing error and disposes the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedLimits {
    /// Longest accepted chunk-size line, line terminator included.
    pub max_chunk_line_bytes: usize,
    /// Longest accepted trailer block, counted across all of its lines.
    pub max_trailer_bytes: usize,
}

impl Default for ChunkedLimits {
    fn default() -> Self {
        Self {
            max_chunk_line_bytes: MAX_CHUNK_LINE_BYTES,
            max_trailer_bytes: MAX_TRAILER_BYTES,
        }
    }
}

/// How much of an unwanted body may be discarded before giving up on reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOptions {
    /// Stop once this many raw bytes have been buffered and discarded.
    pub max_bytes: usize,
    /// Upper bound on the time spent waiting for the network.
    ///
    /// `Some(Duration::ZERO)` only discards what is already buffered,
    /// `None` waits as long as it takes.
    pub max_time: Option<Duration>,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024, // 1MB
            max_time: Some(Duration::from_secs(2)),
        }
    }
}

impl DrainOptions {
    /// Drain up to `max_bytes` with the default time budget.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Sets the time budget.
    pub fn max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }
}
