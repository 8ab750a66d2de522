//! A [`BufferedConnection`] over any tokio byte stream.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::BufferedConnection;
use crate::error::ChunkedError;
use crate::limits::DEFAULT_READ_BUFFER_SIZE;
use crate::util::find_lf;

/// What the owner of a connection can observe about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Lent out to a body decoder.
    InUse,
    /// Response fully consumed, waiting to be reclaimed.
    Idle,
    /// Closed after an error or an abandoned body.
    Disposed,
}

enum Slot<S> {
    InUse,
    Idle(Parked<S>),
    Disposed,
}

struct Parked<S> {
    stream: S,
    buf: BytesMut,
    read_buffer_size: usize,
}

/// Socket-backed read buffer lent to a body decoder.
pub struct Connection<S> {
    stream: S,
    buf: BytesMut,
    read_buffer_size: usize,
    slot: Arc<Mutex<Slot<S>>>,
}

impl<S> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(DEFAULT_READ_BUFFER_SIZE),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            slot: Arc::new(Mutex::new(Slot::InUse)),
        }
    }

    /// Sets how many bytes a single fill asks the transport for.
    ///
    /// This is also the threshold above which reads bypass the buffer.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Seeds the buffer with bytes already read from the transport, typically
    /// whatever followed the response head.
    pub fn with_buffered(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Handle through which the owner learns how the connection came back.
    pub fn handle(&self) -> ConnectionHandle<S> {
        ConnectionHandle {
            slot: self.slot.clone(),
        }
    }

    /// Bytes buffered but not consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }
}

impl<S> BufferedConnection for Connection<S>
where
    S: AsyncRead + Unpin + Send,
{
    fn try_read_line(&mut self, limit: usize) -> Result<Option<Bytes>, ChunkedError> {
        let window = &self.buf[..self.buf.len().min(limit)];
        match find_lf(window) {
            Some(lf) => {
                let mut line = self.buf.split_to(lf + 1);
                line.truncate(lf);
                if line.last() == Some(&b'\r') {
                    line.truncate(lf - 1);
                }
                Ok(Some(line.freeze()))
            }
            None if self.buf.len() >= limit => Err(ChunkedError::LineTooLong { limit }),
            None => Ok(None),
        }
    }

    fn remaining_buffered(&self) -> &[u8] {
        &self.buf
    }

    fn consume(&mut self, n: usize) -> Bytes {
        self.buf.split_to(n).freeze()
    }

    fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    async fn fill_more(&mut self) -> io::Result<usize> {
        self.buf.reserve(self.read_buffer_size);
        let limit = self.read_buffer_size as u64;
        (&mut self.stream).take(limit).read_buf(&mut self.buf).await
    }

    async fn read_direct(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        debug_assert!(self.buf.is_empty(), "bypass read with buffered data");
        self.stream.read(dst).await
    }

    fn complete_response(self) {
        debug!(leftover = self.buf.len(), "connection released for reuse");
        let Connection {
            stream,
            buf,
            read_buffer_size,
            slot,
        } = self;
        *slot.lock() = Slot::Idle(Parked {
            stream,
            buf,
            read_buffer_size,
        });
    }

    fn dispose(self) {
        debug!("connection disposed");
        *self.slot.lock() = Slot::Disposed;
    }
}

/// Owner-side view of a [`Connection`] lent to a body decoder.
pub struct ConnectionHandle<S> {
    slot: Arc<Mutex<Slot<S>>>,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<S> ConnectionHandle<S> {
    pub fn status(&self) -> ConnectionStatus {
        match &*self.slot.lock() {
            Slot::InUse => ConnectionStatus::InUse,
            Slot::Idle(_) => ConnectionStatus::Idle,
            Slot::Disposed => ConnectionStatus::Disposed,
        }
    }

    /// Takes back an idle connection, buffered bytes included.
    ///
    /// Returns `None` unless the last response on it completed cleanly.
    pub fn reclaim(&self) -> Option<Connection<S>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::InUse) {
            Slot::Idle(parked) => Some(Connection {
                stream: parked.stream,
                buf: parked.buf,
                read_buffer_size: parked.read_buffer_size,
                slot: self.slot.clone(),
            }),
            other => {
                *slot = other;
                None
            }
        }
    }
}
