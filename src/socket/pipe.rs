//! In-memory duplex byte pipe.
//!
//! A pipe is two unidirectional [`Channel`]s. Each [`FakeStream`] endpoint
//! reads from one channel and writes to the other, so either side can close
//! independently while the peer drains what was already written. Channel
//! storage is shared through `Arc` and released once both endpoints (and any
//! split halves) are gone.
//!
//! Blocking is expressed with wakers: a reader parks on an empty channel, a
//! writer parks on a full one (only when the channel is bounded), and both
//! arm a `tokio::time::Sleep` for their deadline so a timeout wakes them
//! even when the peer stays silent.

use crate::base::neterror::NetError;
use crate::socket::addr::FakeAddr;
use bytes::BytesMut;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// One direction of a pipe.
struct Channel {
    state: Mutex<ChannelState>,
}

struct ChannelState {
    buf: BytesMut,
    /// Maximum buffered bytes; `None` means writes never block.
    capacity: Option<usize>,
    /// Writer is gone: reader gets EOF once `buf` is drained.
    write_closed: bool,
    /// Reader is gone: further writes fail.
    read_closed: bool,
    reader: Option<Waker>,
    writer: Option<Waker>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Channel {
    fn new(capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChannelState {
                buf: BytesMut::new(),
                capacity: capacity.map(|c| c.max(1)),
                write_closed: false,
                read_closed: false,
                reader: None,
                writer: None,
                read_deadline: None,
                write_deadline: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // No critical section can leave the state half-updated, so a
        // poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close_write(&self) {
        let mut st = self.lock();
        st.write_closed = true;
        let wakers = (st.reader.take(), st.writer.take());
        drop(st);
        wake_all(wakers);
    }

    fn close_read(&self) {
        let mut st = self.lock();
        st.read_closed = true;
        let wakers = (st.reader.take(), st.writer.take());
        drop(st);
        wake_all(wakers);
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        let mut st = self.lock();
        st.read_deadline = deadline;
        let reader = st.reader.take();
        drop(st);
        wake(reader);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        let mut st = self.lock();
        st.write_deadline = deadline;
        let writer = st.writer.take();
        drop(st);
        wake(writer);
    }

    fn is_open(&self) -> bool {
        let st = self.lock();
        !st.write_closed && !st.read_closed
    }

    fn buffered(&self) -> usize {
        self.lock().buf.len()
    }
}

fn wake(waker: Option<Waker>) {
    if let Some(waker) = waker {
        waker.wake();
    }
}

fn wake_all((a, b): (Option<Waker>, Option<Waker>)) {
    wake(a);
    wake(b);
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Sleep future for the current deadline of one side of a channel.
#[derive(Default)]
struct DeadlineTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl DeadlineTimer {
    /// Arm (or re-arm) the timer for `deadline` and report whether it fired.
    fn poll_expired(&mut self, deadline: Option<Instant>, cx: &mut Context<'_>) -> bool {
        let Some(deadline) = deadline else {
            self.sleep = None;
            return false;
        };
        let sleep = self.sleep.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if sleep.deadline() != deadline {
            sleep.as_mut().reset(deadline);
        }
        sleep.as_mut().poll(cx).is_ready()
    }
}

/// Reading side of one channel.
struct PipeReader {
    chan: Arc<Channel>,
    timer: DeadlineTimer,
}

impl PipeReader {
    fn new(chan: Arc<Channel>) -> Self {
        Self { chan, timer: DeadlineTimer::default() }
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut st = self.chan.lock();
        if expired(st.read_deadline) {
            return Poll::Ready(Err(NetError::TimedOut.into()));
        }

        if !st.buf.is_empty() {
            let n = buf.remaining().min(st.buf.len());
            let chunk = st.buf.split_to(n);
            buf.put_slice(&chunk);
            let writer = st.writer.take();
            drop(st);
            wake(writer);
            return Poll::Ready(Ok(()));
        }

        // Drained and nothing more can arrive: EOF.
        if st.write_closed || st.read_closed {
            return Poll::Ready(Ok(()));
        }

        st.reader = Some(cx.waker().clone());
        let deadline = st.read_deadline;
        drop(st);

        if self.timer.poll_expired(deadline, cx) {
            return Poll::Ready(Err(NetError::TimedOut.into()));
        }
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.chan.close_read();
    }
}

/// Writing side of one channel.
struct PipeWriter {
    chan: Arc<Channel>,
    timer: DeadlineTimer,
}

impl PipeWriter {
    fn new(chan: Arc<Channel>) -> Self {
        Self { chan, timer: DeadlineTimer::default() }
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut st = self.chan.lock();
        if st.write_closed || st.read_closed {
            return Poll::Ready(Err(NetError::ConnectionClosed.into()));
        }
        if expired(st.write_deadline) {
            return Poll::Ready(Err(NetError::TimedOut.into()));
        }

        let space = match st.capacity {
            Some(cap) => cap.saturating_sub(st.buf.len()),
            None => data.len(),
        };
        if space > 0 {
            let n = space.min(data.len());
            st.buf.extend_from_slice(&data[..n]);
            let reader = st.reader.take();
            drop(st);
            wake(reader);
            return Poll::Ready(Ok(n));
        }

        st.writer = Some(cx.waker().clone());
        let deadline = st.write_deadline;
        drop(st);

        if self.timer.poll_expired(deadline, cx) {
            return Poll::Ready(Err(NetError::TimedOut.into()));
        }
        Poll::Pending
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.chan.close_write();
    }
}

/// Create a connected pair of endpoints, like a socketpair.
///
/// `capacity` bounds the bytes buffered per direction; `None` buffers without
/// limit so writes never block.
pub fn pipe(capacity: Option<usize>) -> (FakeStream, FakeStream) {
    pipe_between(capacity, FakeAddr::new("pipe"), FakeAddr::new("pipe"))
}

/// Create a pair of endpoints with explicit addresses. The first stream's
/// local address is `a`, the second's is `b`.
pub(crate) fn pipe_between(
    capacity: Option<usize>,
    a: FakeAddr,
    b: FakeAddr,
) -> (FakeStream, FakeStream) {
    let a_to_b = Channel::new(capacity);
    let b_to_a = Channel::new(capacity);

    let first = FakeStream {
        reader: PipeReader::new(Arc::clone(&b_to_a)),
        writer: PipeWriter::new(Arc::clone(&a_to_b)),
        local: a.clone(),
        peer: b.clone(),
    };
    let second = FakeStream {
        reader: PipeReader::new(a_to_b),
        writer: PipeWriter::new(b_to_a),
        local: b,
        peer: a,
    };
    (first, second)
}

/// One endpoint of an in-memory connection.
///
/// Implements tokio's `AsyncRead`/`AsyncWrite`. Errors surface as
/// `io::Error`s wrapping a [`NetError`]; see
/// [`IoErrorExt`](crate::base::context::IoErrorExt).
pub struct FakeStream {
    reader: PipeReader,
    writer: PipeWriter,
    local: FakeAddr,
    peer: FakeAddr,
}

impl FakeStream {
    /// Close both directions. Idempotent.
    ///
    /// The peer can still read everything written before the close and then
    /// sees EOF; its writes fail with `ConnectionClosed`. Bytes already
    /// buffered for this endpoint stay readable, followed by EOF.
    pub fn close(&self) {
        self.writer.chan.close_write();
        self.reader.chan.close_read();
    }

    /// Set both the read and the write deadline.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.reader.chan.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.writer.chan.set_write_deadline(deadline);
    }

    pub fn local_addr(&self) -> &FakeAddr {
        &self.local
    }

    pub fn peer_addr(&self) -> &FakeAddr {
        &self.peer
    }

    /// Whether data can still flow from this endpoint to its peer.
    pub fn is_connected(&self) -> bool {
        self.writer.chan.is_open()
    }

    /// Handle for changing this endpoint's deadlines from another task, for
    /// example while a read is blocked.
    pub fn deadlines(&self) -> DeadlineHandle {
        DeadlineHandle {
            inbound: Arc::clone(&self.reader.chan),
            outbound: Arc::clone(&self.writer.chan),
        }
    }

    /// Bytes written by the peer and not yet read.
    pub fn buffered(&self) -> usize {
        self.reader.chan.buffered()
    }

    /// Split into owned halves that can be used from different tasks.
    pub fn into_split(self) -> (FakeReadHalf, FakeWriteHalf) {
        let FakeStream { reader, writer, local, peer } = self;
        (
            FakeReadHalf { reader, local: local.clone(), peer: peer.clone() },
            FakeWriteHalf { writer, local, peer },
        )
    }
}

impl fmt::Debug for FakeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeStream")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish()
    }
}

impl AsyncRead for FakeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().reader.poll_read(cx, buf)
    }
}

impl AsyncWrite for FakeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().writer.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.writer.chan.close_write();
        Poll::Ready(Ok(()))
    }
}

/// Deadline setters detached from the endpoint that owns them.
///
/// Setting a deadline wakes a blocked operation so the new value takes
/// effect immediately.
#[derive(Clone)]
pub struct DeadlineHandle {
    inbound: Arc<Channel>,
    outbound: Arc<Channel>,
}

impl DeadlineHandle {
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.inbound.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.outbound.set_write_deadline(deadline);
    }
}

impl fmt::Debug for DeadlineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineHandle").finish_non_exhaustive()
    }
}

/// Owned read half of a [`FakeStream`]. Dropping it closes the read side.
pub struct FakeReadHalf {
    reader: PipeReader,
    local: FakeAddr,
    peer: FakeAddr,
}

impl FakeReadHalf {
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.reader.chan.set_read_deadline(deadline);
    }

    pub fn local_addr(&self) -> &FakeAddr {
        &self.local
    }

    pub fn peer_addr(&self) -> &FakeAddr {
        &self.peer
    }
}

impl AsyncRead for FakeReadHalf {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().reader.poll_read(cx, buf)
    }
}

/// Owned write half of a [`FakeStream`]. Dropping it closes the write side.
pub struct FakeWriteHalf {
    writer: PipeWriter,
    local: FakeAddr,
    peer: FakeAddr,
}

impl FakeWriteHalf {
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.writer.chan.set_write_deadline(deadline);
    }

    /// Close the write side; the peer reads EOF after draining.
    pub fn close(&self) {
        self.writer.chan.close_write();
    }

    pub fn local_addr(&self) -> &FakeAddr {
        &self.local
    }

    pub fn peer_addr(&self) -> &FakeAddr {
        &self.peer
    }
}

impl AsyncWrite for FakeWriteHalf {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().writer.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.writer.chan.close_write();
        Poll::Ready(Ok(()))
    }
}
