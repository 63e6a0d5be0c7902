//! The fake network hub.
//!
//! A [`Hub`] is an isolated network namespace: a registry mapping addresses
//! to [`FakeListener`]s. Dialing an address creates a [`pipe`](crate::socket::pipe)
//! and hands the server end to the listener's backlog; the hub plays no part
//! in the traffic after that.
//!
//! Hubs are created explicitly (one per test is typical) so concurrent tests
//! never collide on addresses.
//!
//! # Example
//! ```ignore
//! use fakenet::socket::hub::Hub;
//!
//! let hub = Hub::new();
//! let listener = hub.listener("fake:8080")?;
//! let client = hub.dial("tcp", "fake:8080").await?;
//! let server = listener.accept().await?;
//! ```

use crate::base::neterror::NetError;
use crate::socket::addr::{self, FakeAddr};
use crate::socket::listener::{Admission, BacklogPolicy, FakeListener, ListenerShared, PendingDial};
use crate::socket::pipe::{pipe_between, FakeStream};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// First port handed out for `:0` binds and client endpoints (IANA dynamic range).
const EPHEMERAL_PORT_START: u16 = 49152;
const EPHEMERAL_PORT_COUNT: u32 = (u16::MAX - EPHEMERAL_PORT_START) as u32 + 1;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Connections a listener holds before dials have to wait or are refused
    pub backlog: usize,
    /// What a dial does when the backlog is full
    pub backlog_policy: BacklogPolicy,
    /// Longest a dial waits for a backlog slot; `None` waits forever
    pub dial_timeout: Option<Duration>,
    /// Bytes buffered per direction of a connection; `None` is unbounded
    pub pipe_capacity: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            backlog: 128,
            backlog_policy: BacklogPolicy::Wait,
            dial_timeout: Some(Duration::from_secs(10)),
            pipe_capacity: Some(64 * 1024), // 64 KB
        }
    }
}

impl HubConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listener backlog size.
    pub fn backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the full-backlog policy.
    pub fn backlog_policy(mut self, policy: BacklogPolicy) -> Self {
        self.backlog_policy = policy;
        self
    }

    /// Set the dial timeout.
    pub fn dial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the per-direction pipe capacity.
    pub fn pipe_capacity(mut self, capacity: Option<usize>) -> Self {
        self.pipe_capacity = capacity;
        self
    }
}

/// Address → listener map shared by the hub and its listeners.
pub(crate) struct Registry {
    listeners: DashMap<String, Arc<ListenerShared>>,
}

impl Registry {
    /// Remove `shared` from the map, unless the address was re-bound since.
    pub(crate) fn unregister(&self, shared: &Arc<ListenerShared>) {
        self.listeners.remove_if(shared.addr().as_str(), |_, bound| Arc::ptr_eq(bound, shared));
    }
}

struct HubInner {
    registry: Arc<Registry>,
    config: HubConfig,
    next_port: AtomicU32,
}

/// In-process network namespace. Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Create a hub with default settings and no listeners.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: Arc::new(Registry { listeners: DashMap::new() }),
                config,
                next_port: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Bind a listener to `address`.
    ///
    /// Fails with `AddressInUse` if another open listener holds the address.
    /// A port of `0` picks an unused port; check
    /// [`FakeListener::local_addr`] for the result.
    pub fn listener(&self, address: &str) -> Result<FakeListener, NetError> {
        if address.is_empty() {
            return Err(NetError::AddressInvalid);
        }

        let shared = if addr::wants_ephemeral_port(address) {
            self.bind_ephemeral(address)?
        } else {
            self.bind(address.to_string())?
        };

        tracing::debug!("Listening on {}", shared.addr());
        Ok(FakeListener::new(shared, Arc::downgrade(&self.inner.registry)))
    }

    fn bind(&self, address: String) -> Result<Arc<ListenerShared>, NetError> {
        match self.inner.registry.listeners.entry(address) {
            Entry::Occupied(entry) => {
                tracing::debug!("Address already in use: {}", entry.key());
                Err(NetError::AddressInUse)
            }
            Entry::Vacant(entry) => {
                let shared =
                    ListenerShared::new(FakeAddr::new(entry.key().as_str()), self.inner.config.backlog);
                entry.insert(Arc::clone(&shared));
                Ok(shared)
            }
        }
    }

    fn bind_ephemeral(&self, address: &str) -> Result<Arc<ListenerShared>, NetError> {
        for _ in 0..EPHEMERAL_PORT_COUNT {
            let candidate = addr::with_port(address, self.next_port());
            match self.bind(candidate) {
                Err(NetError::AddressInUse) => continue,
                result => return result,
            }
        }
        Err(NetError::AddressInUse)
    }

    fn next_port(&self) -> u16 {
        let n = self.inner.next_port.fetch_add(1, Ordering::Relaxed) % EPHEMERAL_PORT_COUNT;
        EPHEMERAL_PORT_START + n as u16
    }

    /// Connect to the listener bound to `address`.
    ///
    /// Fails immediately with `ConnectionRefused` if nothing listens there.
    /// If the backlog is full the dial waits or is refused according to
    /// [`HubConfig::backlog_policy`], and gives up with `ConnectionTimedOut`
    /// after [`HubConfig::dial_timeout`]. Dials waiting on one listener are
    /// admitted in the order they arrived.
    pub async fn dial(&self, network: &str, address: &str) -> Result<FakeStream, NetError> {
        addr::check_network(network)?;
        let shared = self.lookup(address)?;
        let (client, server) = self.endpoints(&shared);

        if let Admission::Waiting(mut pending) =
            shared.offer(server, self.inner.config.backlog_policy)?
        {
            let result = self.wait_admitted(&shared, &mut pending).await;
            pending.finish(result)?;
        }
        tracing::trace!("Dialed {} from {}", shared.addr(), client.local_addr());
        Ok(client)
    }

    /// Like [`dial`](Self::dial), but gives up with `Aborted` when `cancel`
    /// fires first.
    ///
    /// Cancellation never leaves a half-delivered connection behind: either
    /// the server end is in the backlog and the call succeeds, or it was
    /// withdrawn and nothing can accept it.
    pub async fn dial_context(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<FakeStream, NetError> {
        if cancel.is_cancelled() {
            return Err(NetError::Aborted);
        }
        addr::check_network(network)?;
        let shared = self.lookup(address)?;
        let (client, server) = self.endpoints(&shared);

        if let Admission::Waiting(mut pending) =
            shared.offer(server, self.inner.config.backlog_policy)?
        {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Dial to {} canceled", address);
                    Err(NetError::Aborted)
                }
                result = self.wait_admitted(&shared, &mut pending) => result,
            };
            pending.finish(result)?;
        }
        tracing::trace!("Dialed {} from {}", shared.addr(), client.local_addr());
        Ok(client)
    }

    fn lookup(&self, address: &str) -> Result<Arc<ListenerShared>, NetError> {
        for key in addr::candidates(address) {
            let Some(entry) = self.inner.registry.listeners.get(&key) else {
                continue;
            };
            let shared = Arc::clone(entry.value());
            drop(entry);

            if shared.is_closed() {
                break;
            }
            return Ok(shared);
        }
        tracing::debug!("Connection refused: nothing listening on {}", address);
        Err(NetError::ConnectionRefused)
    }

    /// Wait for a parked dial to be admitted, bounded by the dial timeout.
    async fn wait_admitted(
        &self,
        shared: &ListenerShared,
        pending: &mut PendingDial<'_>,
    ) -> Result<(), NetError> {
        match self.inner.config.dial_timeout {
            Some(limit) => tokio::time::timeout(limit, pending.admitted()).await.unwrap_or_else(|_| {
                tracing::debug!("Dial to {} timed out waiting for backlog", shared.addr());
                Err(NetError::ConnectionTimedOut)
            }),
            None => pending.admitted().await,
        }
    }

    /// A fresh pipe: the client end and the server end for the listener.
    fn endpoints(&self, shared: &ListenerShared) -> (FakeStream, FakeStream) {
        let client_addr = FakeAddr::new(format!("client:{}", self.next_port()));
        pipe_between(self.inner.config.pipe_capacity, client_addr, shared.addr().clone())
    }

    /// Number of bound addresses.
    pub fn listeners(&self) -> usize {
        self.inner.registry.listeners.len()
    }

    /// Whether a listener is bound to exactly `address`.
    pub fn is_bound(&self, address: &str) -> bool {
        self.inner.registry.listeners.contains_key(address)
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("listeners", &self.listeners())
            .field("config", &self.inner.config)
            .finish()
    }
}
