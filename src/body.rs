//! Reading a chunked body off a borrowed connection.

use std::io;

use bytes::{Buf, Bytes};
use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::BufferedConnection;
use crate::cancel::CancelScope;
use crate::decoder::{BodyOutcome, ChunkedDecoder, ParsingState};
use crate::error::ChunkedError;
use crate::limits::{ChunkedLimits, DrainOptions};

/// A chunked response body.
///
/// Every read first serves whatever the connection has already buffered and
/// only goes to the transport when that yields nothing. Each method takes an
/// optional [`CancellationToken`]; a token that fires while the call waits on
/// the network turns the call into [`ChunkedError::Canceled`] and leaves the
/// framing state as it was, so a later call can pick up where this one
/// stopped. The connection is then closed rather than pooled at the end of the
/// body.
///
/// Payload that a [`copy_to`](Self::copy_to) took out of the decoder but could
/// not hand to its sink is kept and delivered first by the next call.
pub struct ChunkedBody<C: BufferedConnection> {
    decoder: ChunkedDecoder<C>,
    pending: Option<Bytes>,
}

impl<C: BufferedConnection> ChunkedBody<C> {
    pub fn new(connection: C) -> Self {
        Self {
            decoder: ChunkedDecoder::new(connection),
            pending: None,
        }
    }

    pub fn with_limits(connection: C, limits: ChunkedLimits) -> Self {
        Self {
            decoder: ChunkedDecoder::with_limits(connection, limits),
            pending: None,
        }
    }

    pub fn decoder(&self) -> &ChunkedDecoder<C> {
        &self.decoder
    }

    pub fn state(&self) -> ParsingState {
        self.decoder.state()
    }

    /// True once the body has ended or failed; reads then return nothing.
    pub fn is_complete(&self) -> bool {
        self.pending.is_none() && self.decoder.is_complete()
    }

    pub fn outcome(&self) -> BodyOutcome {
        self.decoder.outcome()
    }

    /// Raw trailer lines, available once the body is complete.
    pub fn trailers(&self) -> &[Bytes] {
        self.decoder.trailers()
    }

    /// Reads decoded bytes into `buf`.
    ///
    /// Returns `0` at the end of the body or when `buf` is empty.
    pub async fn read(
        &mut self,
        buf: &mut [u8],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize, ChunkedError> {
        let scope = CancelScope::enter(cancel)?;
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(n) = self.read_pending(buf) {
            return Ok(n);
        }
        if self.decoder.is_complete() {
            return Ok(0);
        }

        let res = match self.read_buffered(buf) {
            Ok(0) if !self.decoder.is_complete() => self.read_suspending(buf, &scope).await,
            res => res,
        };
        self.settle(&scope, res)
    }

    /// Copies the rest of the body into `sink` and flushes it.
    ///
    /// Returns the number of payload bytes written.
    pub async fn copy_to<W>(
        &mut self,
        sink: &mut W,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64, ChunkedError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let scope = CancelScope::enter(cancel)?;
        if self.is_complete() {
            return Ok(0);
        }

        let res = self.copy_inner(sink, &scope).await;
        self.settle(&scope, res)
    }

    /// Next slice of payload, as large as the buffer allows, without copying.
    ///
    /// Returns `None` at the end of the body.
    pub async fn chunk(
        &mut self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Bytes>, ChunkedError> {
        let scope = CancelScope::enter(cancel)?;
        let res = self.chunk_inner(&scope).await;
        self.settle(&scope, res)
    }

    /// The remaining payload as a stream of zero-copy slices.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, ChunkedError>> {
        futures::stream::unfold(Some(self), |body| async move {
            let mut body = body?;
            match body.chunk(None).await {
                Ok(Some(data)) => Some((Ok(data), Some(body))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Discards the rest of the body so the connection can be reused.
    ///
    /// Returns `true` when the body was consumed to its end and the connection
    /// released, `false` when the byte or time budget ran out first. In the
    /// latter case the connection is still held and is disposed of when the
    /// body is dropped.
    pub async fn drain(
        &mut self,
        options: &DrainOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool, ChunkedError> {
        let scope = CancelScope::enter(cancel)?;
        let res = self.drain_inner(options, &scope).await;
        self.settle(&scope, res)
    }

    fn read_pending(&mut self, buf: &mut [u8]) -> Option<usize> {
        let pending = self.pending.as_mut()?;
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.advance(n);
        if pending.is_empty() {
            self.pending = None;
        }
        Some(n)
    }

    fn read_buffered(&mut self, buf: &mut [u8]) -> Result<usize, ChunkedError> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(data) = self.decoder.advance(buf.len() - filled)? else {
                break;
            };
            buf[filled..filled + data.len()].copy_from_slice(&data);
            filled += data.len();
        }
        Ok(filled)
    }

    async fn read_suspending(
        &mut self,
        buf: &mut [u8],
        scope: &CancelScope<'_>,
    ) -> Result<usize, ChunkedError> {
        loop {
            if self.decoder.is_complete() {
                return Ok(0);
            }
            if self.bypass_applies(buf.len()) {
                return self.read_direct(buf, scope).await;
            }

            self.fill(scope).await?;
            let n = self.read_buffered(buf)?;
            if n > 0 {
                return Ok(n);
            }
        }
    }

    /// Large reads inside a large chunk skip the connection buffer.
    fn bypass_applies(&self, len: usize) -> bool {
        let Some(conn) = self.decoder.connection() else {
            return false;
        };
        let threshold = conn.read_buffer_size();
        self.decoder.state() == ParsingState::ExpectChunkData
            && conn.remaining_buffered().is_empty()
            && len >= threshold
            && self.decoder.chunk_bytes_remaining() >= threshold as u64
    }

    async fn read_direct(
        &mut self,
        buf: &mut [u8],
        scope: &CancelScope<'_>,
    ) -> Result<usize, ChunkedError> {
        let len = (buf.len() as u64).min(self.decoder.chunk_bytes_remaining()) as usize;
        let Some(conn) = self.decoder.connection_mut() else {
            return Ok(0);
        };

        let res = scope.run(conn.read_direct(&mut buf[..len])).await;
        match res {
            Ok(0) => Err(self.decoder.fail(ChunkedError::UnexpectedEof)),
            Ok(n) => {
                trace!(n, "read chunk data past the buffer");
                self.decoder.record_direct_read(n);
                Ok(n)
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    async fn copy_inner<W>(
        &mut self,
        sink: &mut W,
        scope: &CancelScope<'_>,
    ) -> Result<u64, ChunkedError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut copied = 0u64;
        if let Some(data) = self.pending.take() {
            copied += self.write_slice(sink, data, scope).await?;
        }
        loop {
            while let Some(data) = self.decoder.advance(usize::MAX)? {
                copied += self.write_slice(sink, data, scope).await?;
            }
            if self.decoder.is_complete() {
                break;
            }
            self.fill(scope).await?;
        }

        scope
            .run(async { sink.flush().await.map_err(ChunkedError::Sink) })
            .await?;
        Ok(copied)
    }

    /// Writes all of `data`, keeping whatever the sink did not take.
    async fn write_slice<W>(
        &mut self,
        sink: &mut W,
        mut data: Bytes,
        scope: &CancelScope<'_>,
    ) -> Result<u64, ChunkedError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let len = data.len() as u64;
        while !data.is_empty() {
            let res = scope
                .run(async { sink.write(&data).await.map_err(ChunkedError::Sink) })
                .await;
            match res {
                Ok(0) => {
                    self.pending = Some(data);
                    return Err(ChunkedError::Sink(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => data.advance(n),
                Err(err) => {
                    self.pending = Some(data);
                    return Err(err);
                }
            }
        }
        Ok(len)
    }

    async fn chunk_inner(
        &mut self,
        scope: &CancelScope<'_>,
    ) -> Result<Option<Bytes>, ChunkedError> {
        if let Some(data) = self.pending.take() {
            return Ok(Some(data));
        }
        loop {
            if self.decoder.is_complete() {
                return Ok(None);
            }
            if let Some(data) = self.decoder.advance(usize::MAX)? {
                return Ok(Some(data));
            }
            if self.decoder.is_complete() {
                return Ok(None);
            }
            self.fill(scope).await?;
        }
    }

    async fn drain_inner(
        &mut self,
        options: &DrainOptions,
        scope: &CancelScope<'_>,
    ) -> Result<bool, ChunkedError> {
        self.pending = None;
        let deadline = options
            .max_time
            .and_then(|budget| Instant::now().checked_add(budget));
        let mut drained = 0usize;

        loop {
            let Some(conn) = self.decoder.connection() else {
                return Ok(true);
            };
            drained = drained.saturating_add(conn.remaining_buffered().len());

            while self.decoder.advance_inner(usize::MAX, false)?.is_some() {}

            if self.decoder.is_complete() {
                debug!(drained, "chunked body drained");
                return Ok(true);
            }
            if drained >= options.max_bytes {
                debug!(drained, limit = options.max_bytes, "drain byte budget exhausted");
                return Ok(false);
            }
            if options.max_time.is_some_and(|budget| budget.is_zero()) {
                return Ok(false);
            }

            match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.fill(scope)).await {
                        Ok(res) => res?,
                        Err(_) => {
                            debug!(drained, "drain time budget exhausted");
                            return Ok(false);
                        }
                    }
                }
                None => self.fill(scope).await?,
            }
        }
    }

    /// One transport read into the connection buffer.
    async fn fill(&mut self, scope: &CancelScope<'_>) -> Result<(), ChunkedError> {
        let Some(conn) = self.decoder.connection_mut() else {
            return Ok(());
        };

        let res = scope.run(conn.fill_more()).await;
        match res {
            Ok(0) => Err(self.decoder.fail(ChunkedError::UnexpectedEof)),
            Ok(n) => {
                trace!(n, "filled connection buffer");
                Ok(())
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// A transport failure disposes of the connection, a cancellation does not.
    fn abort(&mut self, err: ChunkedError) -> ChunkedError {
        if err.is_canceled() {
            err
        } else {
            self.decoder.fail(err)
        }
    }

    fn settle<T>(
        &mut self,
        scope: &CancelScope<'_>,
        res: Result<T, ChunkedError>,
    ) -> Result<T, ChunkedError> {
        res.map_err(|err| {
            let err = scope.wrap(err);
            if err.is_canceled() {
                self.decoder.mark_untrusted();
            }
            err
        })
    }
}

impl<C: BufferedConnection> std::fmt::Debug for ChunkedBody<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedBody")
            .field("decoder", &self.decoder)
            .field("pending", &self.pending.as_ref().map(Bytes::len))
            .finish()
    }
}
