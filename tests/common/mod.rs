#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chunked_wire::{ChunkedBody, ChunkedError, Connection};
use http::{Request, Response};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, duplex};
use tokio::sync::oneshot;

/// Transport that hands out one scripted fragment per read, then EOF.
pub struct Script {
    fragments: VecDeque<Vec<u8>>,
}

impl Script {
    pub fn new<I, B>(fragments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|f| f.as_ref().to_vec())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Splits `wire` at the given offsets.
    pub fn split(wire: &[u8], cuts: &[usize]) -> Self {
        let mut cuts: Vec<usize> = cuts.iter().map(|&c| c.min(wire.len())).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut fragments = Vec::new();
        let mut start = 0;
        for cut in cuts.into_iter().chain(std::iter::once(wire.len())) {
            fragments.push(wire[start..cut].to_vec());
            start = cut;
        }
        Self::new(fragments)
    }

    /// One byte per read.
    pub fn bytewise(wire: &[u8]) -> Self {
        Self::new(wire.chunks(1))
    }
}

impl AsyncRead for Script {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(front) = self.fragments.front_mut() {
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.fragments.pop_front();
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Frames `chunks` with the chunked transfer-coding, empty chunks skipped.
pub fn encode_chunked<C: AsRef<[u8]>>(chunks: &[C]) -> Vec<u8> {
    encode_chunked_with_trailers(chunks, &[])
}

pub fn encode_chunked_with_trailers<C: AsRef<[u8]>>(chunks: &[C], trailers: &[&str]) -> Vec<u8> {
    let mut wire = Vec::new();
    for chunk in chunks {
        let chunk: &[u8] = chunk.as_ref();
        if chunk.is_empty() {
            continue;
        }
        wire.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        wire.extend_from_slice(chunk);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n");
    for trailer in trailers {
        wire.extend_from_slice(trailer.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"\r\n");
    wire
}

/// Reads `body` to its end through `read` with a `buf_size` destination.
pub async fn read_to_end<S>(
    body: &mut ChunkedBody<Connection<S>>,
    buf_size: usize,
) -> Result<Vec<u8>, ChunkedError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut out = Vec::new();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = body.read(&mut buf, None).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Socket wrapper that records every byte written through it.
struct WireCapture {
    inner: tokio::io::DuplexStream,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl AsyncRead for WireCapture {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for WireCapture {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            self.captured.lock().extend_from_slice(&buf[..n]);
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Raw bytes hyper's HTTP/1.1 server writes for a response streaming `chunks`.
///
/// The body has no known length, so hyper frames it with the chunked
/// transfer-coding. Returns once a hyper client has read the whole response.
pub async fn hyper_chunked_response(chunks: Vec<Bytes>) -> Vec<u8> {
    let (client, server) = duplex(8192);
    let captured = Arc::new(Mutex::new(Vec::new()));
    let capture_server = WireCapture {
        inner: server,
        captured: captured.clone(),
    };

    let (tx, rx) = oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        let service = service_fn(move |_req: Request<Incoming>| {
            let frames: Vec<Result<Frame<Bytes>, Infallible>> =
                chunks.iter().cloned().map(|c| Ok(Frame::data(c))).collect();
            async move {
                Ok::<_, Infallible>(Response::new(StreamBody::new(futures::stream::iter(
                    frames,
                ))))
            }
        });

        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(capture_server), service)
            .await;
    });

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("host", "localhost")
        .body(Empty::<Bytes>::new())
        .unwrap();

    let client_handle = tokio::spawn(async move {
        let (mut sender, connection) = hyper::client::conn::http1::Builder::new()
            .handshake(TokioIo::new(client))
            .await
            .expect("client handshake");
        tokio::spawn(connection);

        let response = sender.send_request(req).await.expect("response head");
        // The terminating chunk has been written once the client saw the end.
        let _ = response.into_body().collect().await;
        let _ = tx.send(());
    });

    let _ = rx.await;
    client_handle.abort();
    server_handle.abort();

    captured.lock().clone()
}

/// Splits a captured response into its head length and checks it is chunked.
pub fn chunked_head_len(wire: &[u8]) -> usize {
    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut response = httparse::Response::new(&mut headers);
    let httparse::Status::Complete(head_len) = response.parse(wire).expect("valid head") else {
        panic!("incomplete response head");
    };
    assert!(
        response.headers.iter().any(|h| {
            h.name.eq_ignore_ascii_case("transfer-encoding")
                && h.value.eq_ignore_ascii_case(b"chunked")
        }),
        "response is not chunked"
    );
    head_len
}
