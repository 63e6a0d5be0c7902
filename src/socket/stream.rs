//! Polymorphic connection type.
//!
//! `StreamSocket` lets code handle fake and real connections uniformly: a
//! client written against [`BoxedSocket`] runs over a [`FakeStream`] from a
//! hub in tests and over a `TcpStream` in production.

use crate::socket::pipe::FakeStream;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A trait for any connection that supports async read/write operations.
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {
    /// Check if the socket is connected.
    fn is_connected(&self) -> bool {
        true
    }
}

impl StreamSocket for TcpStream {}

impl StreamSocket for FakeStream {
    fn is_connected(&self) -> bool {
        FakeStream::is_connected(self)
    }
}

/// Any [`StreamSocket`] behind one concrete type.
///
/// Implements both tokio's and hyper's io traits, so the same value can be
/// handed to tungstenite or to `hyper::client::conn` directly.
pub struct BoxedSocket {
    inner: Box<dyn StreamSocket>,
}

impl BoxedSocket {
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self { inner: Box::new(socket) }
    }

    /// Whether the wrapped connection can still carry data to its peer.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn io(&mut self) -> Pin<&mut (dyn StreamSocket + 'static)> {
        Pin::new(&mut *self.inner)
    }
}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().io().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().io().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().io().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().io().poll_shutdown(cx)
    }
}

impl hyper::rt::Read for BoxedSocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut cursor: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        // SAFETY: the tokio ReadBuf only writes initialized bytes into the
        // unfilled region, and we advance the cursor by exactly that count.
        let filled = unsafe {
            let mut buf = ReadBuf::uninit(cursor.as_mut());
            ready!(self.get_mut().io().poll_read(cx, &mut buf))?;
            buf.filled().len()
        };
        unsafe { cursor.advance(filled) };
        Poll::Ready(Ok(()))
    }
}

impl hyper::rt::Write for BoxedSocket {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(self, cx)
    }
}

impl std::fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedSocket").field("connected", &self.is_connected()).finish()
    }
}
