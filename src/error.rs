//! Error types for chunked body decoding.

use std::io;

/// Errors that can occur while decoding a chunked response body.
#[derive(Debug, thiserror::Error)]
pub enum ChunkedError {
    /// The chunk-size line does not start with a hexadecimal number.
    #[error("invalid chunk size line")]
    InvalidChunkSize,

    /// The chunk size does not fit in 64 bits.
    #[error("chunk size overflows a 64-bit length")]
    ChunkSizeOverflow,

    /// A byte other than space or tab sits between the chunk size and the
    /// `;` that introduces a chunk extension.
    #[error("invalid byte {byte:#04x} in chunk extension")]
    InvalidChunkExtension { byte: u8 },

    /// Chunk data was not immediately followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    MissingChunkTerminator,

    /// No line terminator was found within the allowed number of bytes.
    #[error("line exceeds the limit of {limit} bytes")]
    LineTooLong { limit: usize },

    /// The trailer block grew past its cumulative limit.
    #[error("trailer block exceeds the limit of {limit} bytes")]
    TrailersTooLong { limit: usize },

    /// The peer closed the connection before the body was complete.
    #[error("response body ended prematurely")]
    UnexpectedEof,

    /// Transport failure while reading from the connection.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Failure while writing decoded bytes to the destination of a copy.
    ///
    /// The connection is not at fault here and is left untouched.
    #[error("failed to write decoded body: {0}")]
    Sink(#[source] io::Error),

    /// The caller's cancellation token fired.
    ///
    /// When the cancellation surfaced as the failure of an inner operation,
    /// that failure is kept as the source.
    #[error("operation canceled")]
    Canceled {
        #[source]
        source: Option<Box<ChunkedError>>,
    },

    /// The decoder was advanced after the body had already completed.
    /// If you encounter this error, please report it as a bug.
    #[error("chunked body already completed")]
    BodyComplete,
}

impl ChunkedError {
    /// Returns true for violations of the chunked grammar or its limits.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ChunkedError::InvalidChunkSize
                | ChunkedError::ChunkSizeOverflow
                | ChunkedError::InvalidChunkExtension { .. }
                | ChunkedError::MissingChunkTerminator
                | ChunkedError::LineTooLong { .. }
                | ChunkedError::TrailersTooLong { .. }
        )
    }

    /// Returns true if the operation was abandoned because of cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ChunkedError::Canceled { .. })
    }

    pub(crate) fn canceled(source: Option<ChunkedError>) -> Self {
        ChunkedError::Canceled {
            source: source.map(Box::new),
        }
    }
}

impl From<ChunkedError> for io::Error {
    fn from(err: ChunkedError) -> Self {
        match err {
            ChunkedError::Io(e) | ChunkedError::Sink(e) => e,
            ChunkedError::UnexpectedEof => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            ChunkedError::Canceled { .. } => io::Error::new(io::ErrorKind::Interrupted, err),
            err if err.is_framing() => io::Error::new(io::ErrorKind::InvalidData, err),
            err => io::Error::other(err),
        }
    }
}
