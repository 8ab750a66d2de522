//! The chunked framing state machine.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::BufferedConnection;
use crate::error::ChunkedError;
use crate::limits::ChunkedLimits;
use crate::util::{parse_chunk_size, validate_chunk_extension};

/// Where the decoder is within the chunked framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingState {
    /// Waiting for a `chunk-size [; ext]` line.
    ExpectChunkHeader,
    /// Inside chunk payload.
    ExpectChunkData,
    /// Waiting for the CRLF closing a chunk's payload.
    ExpectChunkTerminator,
    /// After the last chunk, skipping trailer lines up to the empty one.
    ConsumeTrailers,
    /// Body complete; the connection is gone.
    Done,
}

/// How the borrowed connection left the decoder, if it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOutcome {
    /// The decoder still holds the connection.
    Reading,
    /// Framing fully consumed, connection handed back for reuse.
    Released,
    /// Connection closed after an error or an abandoned body.
    Disposed,
}

/// Decodes one chunked body out of a borrowed connection's buffer.
///
/// [`advance`](Self::advance) never suspends: it only looks at bytes the
/// connection has already buffered. Fetching more is up to the caller, see
/// [`ChunkedBody`](crate::ChunkedBody).
pub struct ChunkedDecoder<C: BufferedConnection> {
    state: ParsingState,
    chunk_bytes_remaining: u64,
    trailer_bytes: usize,
    limits: ChunkedLimits,
    connection: Option<C>,
    trailers: Vec<Bytes>,
    untrusted: bool,
    outcome: BodyOutcome,
}

/// Result of one pass over the current state.
enum Step {
    Next,
    Ready(Option<Bytes>),
    Finished,
}

impl<C: BufferedConnection> ChunkedDecoder<C> {
    /// Decoder with the default 16 KiB line and trailer limits.
    pub fn new(connection: C) -> Self {
        Self::with_limits(connection, ChunkedLimits::default())
    }

    /// Takes ownership of `connection` until the body ends or fails.
    pub fn with_limits(connection: C, limits: ChunkedLimits) -> Self {
        Self {
            state: ParsingState::ExpectChunkHeader,
            chunk_bytes_remaining: 0,
            trailer_bytes: 0,
            limits,
            connection: Some(connection),
            trailers: Vec::new(),
            untrusted: false,
            outcome: BodyOutcome::Reading,
        }
    }

    /// Position within the framing.
    pub fn state(&self) -> ParsingState {
        self.state
    }

    /// Payload bytes of the current chunk not delivered yet.
    pub fn chunk_bytes_remaining(&self) -> u64 {
        self.chunk_bytes_remaining
    }

    /// True once the connection has left the decoder, cleanly or not.
    pub fn is_complete(&self) -> bool {
        self.connection.is_none()
    }

    /// How the connection left the decoder, if it has.
    pub fn outcome(&self) -> BodyOutcome {
        self.outcome
    }

    /// Raw trailer lines seen after the last chunk, delimiters stripped.
    pub fn trailers(&self) -> &[Bytes] {
        &self.trailers
    }

    pub(crate) fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut C> {
        self.connection.as_mut()
    }

    /// Disposes of the connection instead of releasing it once the body ends.
    pub(crate) fn mark_untrusted(&mut self) {
        self.untrusted = true;
    }

    /// Decodes up to `max_bytes` of payload from what is already buffered.
    ///
    /// `Ok(None)` means nothing can be produced without more input, or that
    /// the body just ended (check [`is_complete`](Self::is_complete)). Any
    /// error disposes of the connection before it is returned.
    pub fn advance(&mut self, max_bytes: usize) -> Result<Option<Bytes>, ChunkedError> {
        self.advance_inner(max_bytes, true)
    }

    pub(crate) fn advance_inner(
        &mut self,
        max_bytes: usize,
        keep_trailers: bool,
    ) -> Result<Option<Bytes>, ChunkedError> {
        loop {
            match self.step(max_bytes, keep_trailers) {
                Ok(Step::Next) => continue,
                Ok(Step::Ready(data)) => return Ok(data),
                Ok(Step::Finished) => {
                    self.complete();
                    return Ok(None);
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn step(&mut self, max_bytes: usize, keep_trailers: bool) -> Result<Step, ChunkedError> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(ChunkedError::BodyComplete);
        };

        match self.state {
            ParsingState::ExpectChunkHeader => {
                let Some(line) = conn.try_read_line(self.limits.max_chunk_line_bytes)? else {
                    return Ok(Step::Ready(None));
                };
                let (size, digits) = parse_chunk_size(&line)?;
                if digits < line.len() {
                    validate_chunk_extension(&line[digits..])?;
                }
                trace!(size, "chunk header");

                self.chunk_bytes_remaining = size;
                self.state = if size > 0 {
                    ParsingState::ExpectChunkData
                } else {
                    ParsingState::ConsumeTrailers
                };
                Ok(Step::Next)
            }
            ParsingState::ExpectChunkData => {
                let buffered = conn.remaining_buffered().len();
                let n = (max_bytes.min(buffered) as u64).min(self.chunk_bytes_remaining) as usize;
                if n == 0 {
                    return Ok(Step::Ready(None));
                }

                let data = conn.consume(n);
                trace!(n, "chunk data");
                self.chunk_bytes_remaining -= n as u64;
                if self.chunk_bytes_remaining == 0 {
                    self.state = ParsingState::ExpectChunkTerminator;
                }
                Ok(Step::Ready(Some(data)))
            }
            ParsingState::ExpectChunkTerminator => {
                let Some(line) = conn.try_read_line(self.limits.max_chunk_line_bytes)? else {
                    return Ok(Step::Ready(None));
                };
                if !line.is_empty() {
                    return Err(ChunkedError::MissingChunkTerminator);
                }
                self.state = ParsingState::ExpectChunkHeader;
                Ok(Step::Next)
            }
            ParsingState::ConsumeTrailers => loop {
                let limit = self.limits.max_trailer_bytes;
                let before = conn.remaining_buffered().len();
                let line = match conn.try_read_line(limit.saturating_sub(self.trailer_bytes)) {
                    Ok(Some(line)) => line,
                    Ok(None) => return Ok(Step::Ready(None)),
                    Err(ChunkedError::LineTooLong { .. }) => {
                        return Err(ChunkedError::TrailersTooLong { limit });
                    }
                    Err(err) => return Err(err),
                };
                self.trailer_bytes += before - conn.remaining_buffered().len();

                if line.is_empty() {
                    return Ok(Step::Finished);
                }
                if keep_trailers {
                    self.trailers.push(line);
                }
            },
            ParsingState::Done => Err(ChunkedError::BodyComplete),
        }
    }

    /// Accounts for payload read straight from the transport into the
    /// caller's buffer.
    pub(crate) fn record_direct_read(&mut self, n: usize) {
        debug_assert_eq!(self.state, ParsingState::ExpectChunkData);
        debug_assert!(n as u64 <= self.chunk_bytes_remaining);

        self.chunk_bytes_remaining -= n as u64;
        if self.chunk_bytes_remaining == 0 {
            self.state = ParsingState::ExpectChunkTerminator;
        }
    }

    /// End of the trailer block: hands the connection back.
    fn complete(&mut self) {
        self.state = ParsingState::Done;
        if let Some(conn) = self.connection.take() {
            if self.untrusted {
                debug!("chunked body complete on a canceled connection");
                self.outcome = BodyOutcome::Disposed;
                conn.dispose();
            } else {
                debug!(trailers = self.trailers.len(), "chunked body complete");
                self.outcome = BodyOutcome::Released;
                conn.complete_response();
            }
        }
    }

    /// Disposes of the connection because of `err`, then returns it.
    pub(crate) fn fail(&mut self, err: ChunkedError) -> ChunkedError {
        if let Some(conn) = self.connection.take() {
            warn!(error = %err, state = ?self.state, "disposing connection");
            self.state = ParsingState::Done;
            self.chunk_bytes_remaining = 0;
            self.outcome = BodyOutcome::Disposed;
            conn.dispose();
        }
        err
    }
}

impl<C: BufferedConnection> Drop for ChunkedDecoder<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!(state = ?self.state, "chunked body dropped before completion");
            conn.dispose();
        }
    }
}

impl<C: BufferedConnection> std::fmt::Debug for ChunkedDecoder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDecoder")
            .field("state", &self.state)
            .field("chunk_bytes_remaining", &self.chunk_bytes_remaining)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
