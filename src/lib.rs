//! Incremental decoder for the HTTP/1.1 `chunked` transfer-coding.
//!
//! A [`ChunkedBody`] borrows a [`BufferedConnection`] for the lifetime of one
//! response body and turns the chunk framing back into a flat byte stream. It
//! never consumes a byte past the final CRLF of the trailer block, so whatever
//! follows stays buffered on the connection for the next response. The
//! connection is handed back to its owner with
//! [`BufferedConnection::complete_response`] only when the framing was fully
//! and correctly consumed, and with [`BufferedConnection::dispose`] otherwise.
//!
//! ```ignore
//! use chunked_wire::{ChunkedBody, Connection};
//!
//! let connection = Connection::new(stream).with_buffered(&leftover_from_head);
//! let handle = connection.handle();
//! let mut body = ChunkedBody::new(connection);
//!
//! let mut buf = [0u8; 8192];
//! loop {
//!     let n = body.read(&mut buf, None).await?;
//!     if n == 0 {
//!         break;
//!     }
//!     consume(&buf[..n]);
//! }
//!
//! let next = handle.reclaim().expect("connection back in the pool");
//! ```

use std::future::Future;
use std::io;

use bytes::Bytes;

pub mod body;
mod cancel;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod limits;
mod util;

pub use body::ChunkedBody;
pub use connection::{Connection, ConnectionHandle, ConnectionStatus};
pub use decoder::{BodyOutcome, ChunkedDecoder, ParsingState};
pub use error::ChunkedError;
pub use limits::{ChunkedLimits, DrainOptions, MAX_CHUNK_LINE_BYTES, MAX_TRAILER_BYTES};
pub use tokio_util::sync::CancellationToken;

/// The buffered side of a connection, as seen by the body decoder.
///
/// Implementors own the transport and a read buffer. The decoder only ever
/// takes bytes out of the front of that buffer, so anything it leaves behind
/// belongs to whoever uses the connection next.
pub trait BufferedConnection: Send {
    /// Takes one complete line out of the buffer.
    ///
    /// The line ends at LF; a CR right before it is stripped as well. Returns
    /// `Ok(None)` when no full line is buffered yet, and
    /// [`ChunkedError::LineTooLong`] when `limit` bytes are buffered without a
    /// line terminator among them.
    fn try_read_line(&mut self, limit: usize) -> Result<Option<Bytes>, ChunkedError>;

    /// Bytes read from the transport and not consumed yet.
    fn remaining_buffered(&self) -> &[u8];

    /// Consumes the first `n` buffered bytes and returns them.
    fn consume(&mut self, n: usize) -> Bytes;

    /// Size of a single transport read into the buffer.
    fn read_buffer_size(&self) -> usize;

    /// Reads more data from the transport into the buffer.
    ///
    /// Resolves to the number of bytes added, `0` once the peer has closed.
    fn fill_more(&mut self) -> impl Future<Output = io::Result<usize>> + Send;

    /// Reads from the transport straight into `dst`, bypassing the buffer.
    ///
    /// Only called while the buffer is empty.
    fn read_direct(&mut self, dst: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// The response was fully consumed; the connection may be reused.
    fn complete_response(self);

    /// The connection can no longer be trusted and must be closed.
    fn dispose(self);
}
