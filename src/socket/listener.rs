//! Fake listener with a FIFO accept backlog.
//!
//! Dials enqueue the server end of a fresh pipe; [`FakeListener::accept`]
//! pops them in the same order. A dial that finds the backlog full parks its
//! endpoint in a waiter queue. Each `accept` that frees a slot moves the
//! oldest waiter's endpoint into the backlog under the same lock, so the Nth
//! dial to be admitted is the Nth accepted no matter when the dialing tasks
//! get scheduled again.

use crate::base::neterror::NetError;
use crate::socket::addr::FakeAddr;
use crate::socket::hub::Registry;
use crate::socket::pipe::FakeStream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{oneshot, Notify};

/// What a dial does when the listener's backlog is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BacklogPolicy {
    /// Wait for `accept` to free a slot, like a real socket backlog.
    #[default]
    Wait,
    /// Fail immediately with `ConnectionRefused`.
    Refuse,
}

/// A dial parked on a full backlog.
struct Waiter {
    id: u64,
    stream: FakeStream,
    admit: oneshot::Sender<()>,
}

struct Backlog {
    queue: VecDeque<FakeStream>,
    waiters: VecDeque<Waiter>,
    capacity: usize,
    next_waiter: u64,
    closed: bool,
}

impl Backlog {
    fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity || !self.waiters.is_empty()
    }

    /// Move the oldest live waiter's endpoint into the freed slot.
    fn admit_next(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.admit.send(()).is_ok() {
                self.queue.push_back(waiter.stream);
                return;
            }
        }
    }

    fn withdraw(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Outcome of offering an endpoint to a listener.
pub(crate) enum Admission<'a> {
    /// The endpoint is in the backlog.
    Queued,
    /// The backlog is full; the endpoint waits in line.
    Waiting(PendingDial<'a>),
}

/// A dial whose endpoint is parked behind a full backlog.
///
/// Dropping it before it resolves withdraws the endpoint, so an abandoned
/// dial never shows up in `accept`.
pub(crate) struct PendingDial<'a> {
    shared: &'a ListenerShared,
    id: u64,
    admitted: oneshot::Receiver<()>,
    resolved: bool,
}

impl PendingDial<'_> {
    /// Wait until `accept` moves the endpoint into the backlog.
    ///
    /// Cancel safe. Fails with `ConnectionRefused` if the listener closes
    /// first.
    pub(crate) async fn admitted(&mut self) -> Result<(), NetError> {
        (&mut self.admitted).await.map_err(|_| NetError::ConnectionRefused)
    }

    /// Settle the dial once waiting is over.
    ///
    /// On error the endpoint is withdrawn and `result` is returned, unless
    /// `accept` already admitted it, in which case the dial succeeded after
    /// all.
    pub(crate) fn finish(mut self, result: Result<(), NetError>) -> Result<(), NetError> {
        self.resolved = true;
        let Err(err) = result else {
            return Ok(());
        };
        if self.shared.lock().withdraw(self.id) {
            return Err(err);
        }
        match self.admitted.try_recv() {
            Ok(()) => Ok(()),
            Err(_) => Err(NetError::ConnectionRefused),
        }
    }
}

impl Drop for PendingDial<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.shared.lock().withdraw(self.id);
        }
    }
}

/// State shared by the listener handle and the hub registry.
pub(crate) struct ListenerShared {
    addr: FakeAddr,
    backlog: Mutex<Backlog>,
    /// Signalled when an endpoint is queued or the listener closes.
    ready: Notify,
}

impl ListenerShared {
    pub(crate) fn new(addr: FakeAddr, backlog: usize) -> Arc<Self> {
        Arc::new(Self {
            addr,
            backlog: Mutex::new(Backlog {
                queue: VecDeque::new(),
                waiters: VecDeque::new(),
                capacity: backlog.max(1),
                next_waiter: 0,
                closed: false,
            }),
            ready: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn addr(&self) -> &FakeAddr {
        &self.addr
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Hand an endpoint to the listener.
    ///
    /// Queued at once if there is room. Otherwise refused or parked behind
    /// the dials already waiting, depending on `policy`. A closed listener
    /// never receives it.
    pub(crate) fn offer(
        &self,
        stream: FakeStream,
        policy: BacklogPolicy,
    ) -> Result<Admission<'_>, NetError> {
        let mut backlog = self.lock();
        if backlog.closed {
            return Err(NetError::ConnectionRefused);
        }
        if !backlog.is_full() {
            backlog.queue.push_back(stream);
            drop(backlog);
            self.ready.notify_one();
            return Ok(Admission::Queued);
        }
        if policy == BacklogPolicy::Refuse {
            tracing::debug!("Backlog of {} is full, refusing", self.addr);
            return Err(NetError::ConnectionRefused);
        }

        let id = backlog.next_waiter;
        backlog.next_waiter += 1;
        let (admit, admitted) = oneshot::channel();
        backlog.waiters.push_back(Waiter { id, stream, admit });
        tracing::trace!("Backlog of {} is full, {} dials waiting", self.addr, backlog.waiters.len());
        Ok(Admission::Waiting(PendingDial { shared: self, id, admitted, resolved: false }))
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.lock().queue.len()
    }

    async fn accept(&self) -> Result<FakeStream, NetError> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a close or enqueue that lands in
            // between is not missed.
            notified.as_mut().enable();

            {
                let mut backlog = self.lock();
                if let Some(stream) = backlog.queue.pop_front() {
                    backlog.admit_next();
                    return Ok(stream);
                }
                if backlog.closed {
                    return Err(NetError::ListenerClosed);
                }
            }

            notified.await;
        }
    }

    /// Returns false if the listener was already closed.
    fn close(&self) -> bool {
        let mut backlog = self.lock();
        if backlog.closed {
            return false;
        }
        backlog.closed = true;
        // Not-yet-accepted connections are dropped, so their dialers see EOF.
        // Dropping the waiters refuses the dials parked on a full backlog.
        let pending = std::mem::take(&mut backlog.queue);
        let waiters = std::mem::take(&mut backlog.waiters);
        drop(backlog);

        if !pending.is_empty() || !waiters.is_empty() {
            tracing::debug!(
                "Discarding {} pending and {} waiting connections on {}",
                pending.len(),
                waiters.len(),
                self.addr
            );
        }
        drop(pending);
        drop(waiters);

        self.ready.notify_waiters();
        true
    }
}

/// A listener bound to an address on a [`Hub`](crate::socket::hub::Hub).
///
/// Dropping the listener closes it and frees its address.
pub struct FakeListener {
    shared: Arc<ListenerShared>,
    registry: Weak<Registry>,
}

impl FakeListener {
    pub(crate) fn new(shared: Arc<ListenerShared>, registry: Weak<Registry>) -> Self {
        Self { shared, registry }
    }

    /// Wait for the next connection.
    ///
    /// Fails with `ListenerClosed` once the listener is closed; after that
    /// every call fails immediately.
    pub async fn accept(&self) -> Result<FakeStream, NetError> {
        let stream = self.shared.accept().await?;
        tracing::trace!("Accepted {} on {}", stream.peer_addr(), self.shared.addr);
        Ok(stream)
    }

    /// Close the listener. Idempotent.
    ///
    /// Wakes every pending `accept` with `ListenerClosed`, refuses waiting and
    /// future dials, and unregisters the address from the hub.
    pub fn close(&self) {
        if !self.shared.close() {
            return;
        }
        tracing::debug!("Listener on {} closed", self.shared.addr);
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.shared);
        }
    }

    pub fn local_addr(&self) -> &FakeAddr {
        self.shared.addr()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Connections dialed but not yet accepted.
    pub fn backlog_len(&self) -> usize {
        self.shared.backlog_len()
    }
}

impl Drop for FakeListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FakeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeListener")
            .field("addr", &self.shared.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::pipe::pipe;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn listener(backlog: usize) -> FakeListener {
        FakeListener::new(ListenerShared::new(FakeAddr::new("fake:1"), backlog), Weak::new())
    }

    async fn offer(listener: &FakeListener, policy: BacklogPolicy) -> Result<FakeStream, NetError> {
        let (client, server) = pipe(None);
        if let Admission::Waiting(mut pending) = listener.shared.offer(server, policy)? {
            let result = pending.admitted().await;
            pending.finish(result)?;
        }
        Ok(client)
    }

    #[tokio::test]
    async fn test_accept_in_fifo_order() {
        let l = listener(8);
        let mut first = offer(&l, BacklogPolicy::Wait).await.unwrap();
        let mut second = offer(&l, BacklogPolicy::Wait).await.unwrap();
        assert_eq!(l.backlog_len(), 2);
        first.write_all(b"1").await.unwrap();
        second.write_all(b"2").await.unwrap();

        let mut buf = [0u8; 1];
        let mut a = l.accept().await.unwrap();
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"1");
        let mut b = l.accept().await.unwrap();
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"2");
        assert_eq!(l.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_refuse_when_full() {
        let l = listener(1);
        offer(&l, BacklogPolicy::Refuse).await.unwrap();
        let err = offer(&l, BacklogPolicy::Refuse).await.unwrap_err();
        assert_eq!(err, NetError::ConnectionRefused);

        l.accept().await.unwrap();
        offer(&l, BacklogPolicy::Refuse).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_fast() {
        let l = listener(4);
        l.close();
        l.close();
        assert!(l.is_closed());
        assert_eq!(l.accept().await.unwrap_err(), NetError::ListenerClosed);
        assert_eq!(offer(&l, BacklogPolicy::Wait).await.unwrap_err(), NetError::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_close_discards_pending() {
        let l = listener(4);
        let client = offer(&l, BacklogPolicy::Wait).await.unwrap();
        l.close();
        assert_eq!(l.backlog_len(), 0);
        assert!(!client.is_connected());
        assert_eq!(l.accept().await.unwrap_err(), NetError::ListenerClosed);
    }

    #[tokio::test]
    async fn test_close_wakes_all_acceptors() {
        let l = Arc::new(listener(4));
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let l = Arc::clone(&l);
            waiters.push(tokio::spawn(async move { l.accept().await }));
        }
        tokio::task::yield_now().await;

        l.close();
        for w in waiters {
            assert_eq!(w.await.unwrap().unwrap_err(), NetError::ListenerClosed);
        }
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_order_on_accept() {
        let l = listener(1);
        let mut first = offer(&l, BacklogPolicy::Wait).await.unwrap();
        first.write_all(b"0").await.unwrap();

        let (mut second, server) = pipe(None);
        let Admission::Waiting(second_pending) = l.shared.offer(server, BacklogPolicy::Wait).unwrap()
        else {
            panic!("backlog should be full");
        };
        let (mut third, server) = pipe(None);
        let Admission::Waiting(mut third_pending) = l.shared.offer(server, BacklogPolicy::Wait).unwrap()
        else {
            panic!("backlog should be full");
        };
        second.write_all(b"1").await.unwrap();
        third.write_all(b"2").await.unwrap();

        // Each accept moves exactly one waiter into the freed slot, oldest first.
        let mut buf = [0u8; 1];
        for expected in [b"0", b"1", b"2"] {
            let mut conn = l.accept().await.unwrap();
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, expected);
        }
        assert_eq!(second_pending.finish(Ok(())), Ok(()));
        third_pending.admitted().await.unwrap();
        assert_eq!(third_pending.finish(Ok(())), Ok(()));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_withdrawn() {
        let l = listener(1);
        let _first = offer(&l, BacklogPolicy::Wait).await.unwrap();

        let (second, server) = pipe(None);
        match l.shared.offer(server, BacklogPolicy::Wait).unwrap() {
            Admission::Waiting(pending) => drop(pending),
            Admission::Queued => panic!("backlog should be full"),
        }
        assert!(!second.is_connected());

        let (_third, server) = pipe(None);
        let Admission::Waiting(pending) = l.shared.offer(server, BacklogPolicy::Wait).unwrap() else {
            panic!("backlog should be full");
        };
        assert_eq!(pending.finish(Err(NetError::Aborted)), Err(NetError::Aborted));

        // Nothing but the first dial is ever accepted.
        l.accept().await.unwrap();
        assert_eq!(l.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_close_refuses_waiters() {
        let l = listener(1);
        let _first = offer(&l, BacklogPolicy::Wait).await.unwrap();
        let (_second, server) = pipe(None);
        let Admission::Waiting(mut pending) = l.shared.offer(server, BacklogPolicy::Wait).unwrap() else {
            panic!("backlog should be full");
        };

        l.close();
        let result = pending.admitted().await;
        assert_eq!(pending.finish(result), Err(NetError::ConnectionRefused));
    }
}
