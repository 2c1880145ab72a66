//! Bidirectional relay between a client and its backend.
//!
//! The client-to-backend direction reads through a [`ReplayReader`], so the
//! backend sees the buffered ClientHello before any live client bytes. Each
//! direction runs in its own task; the first one to finish (EOF or error)
//! aborts the other and both sockets are dropped. Byte counters are shared
//! with the tasks, so an aborted direction still reports what it moved.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Reader that yields a saved prefix, then continues from a live stream.
pub struct ReplayReader<R> {
    prefix: Bytes,
    inner: R,
}

impl<R> ReplayReader<R> {
    pub fn new(prefix: impl Into<Bytes>, inner: R) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    /// Bytes of the prefix not yet read.
    pub fn remaining_prefix(&self) -> usize {
        self.prefix.len()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ReplayReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The direction that terminated first.
    pub first_closed: Direction,
    /// Bytes written to the backend, replayed prefix included.
    pub bytes_to_backend: u64,
    /// Bytes written to the client.
    pub bytes_from_backend: u64,
    /// The I/O error that terminated the first direction, if not EOF.
    pub error: Option<io::Error>,
}

/// Copy until EOF or error, adding every written chunk to `written`.
async fn copy_half<R, W>(
    mut reader: R,
    mut writer: W,
    written: Arc<AtomicU64>,
) -> Option<io::Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => return Some(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Some(e);
        }
        written.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Replay `prefix` to the backend, then splice both streams.
///
/// Returns once either direction terminates. The other direction is
/// aborted and both streams are closed before this returns.
pub async fn relay<C, B>(client: C, prefix: impl Into<Bytes>, backend: B) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let upstream = ReplayReader::new(prefix, client_read);

    let to_backend_bytes = Arc::new(AtomicU64::new(0));
    let from_backend_bytes = Arc::new(AtomicU64::new(0));

    let mut to_backend = tokio::spawn(copy_half(
        upstream,
        backend_write,
        Arc::clone(&to_backend_bytes),
    ));
    let mut to_client = tokio::spawn(copy_half(
        backend_read,
        client_write,
        Arc::clone(&from_backend_bytes),
    ));

    let (first_closed, finished) = tokio::select! {
        result = &mut to_backend => (Direction::ClientToBackend, result),
        result = &mut to_client => (Direction::BackendToClient, result),
    };
    let other = match first_closed {
        Direction::ClientToBackend => to_client,
        Direction::BackendToClient => to_backend,
    };

    other.abort();
    // Wait for the aborted task so its stream halves are dropped too.
    let _ = other.await;

    let error = match finished {
        Ok(error) => error,
        Err(join_error) => Some(io::Error::other(join_error)),
    };

    RelayOutcome {
        first_closed,
        bytes_to_backend: to_backend_bytes.load(Ordering::Relaxed),
        bytes_from_backend: from_backend_bytes.load(Ordering::Relaxed),
        error,
    }
}
