//! Pluggable dial hooks.
//!
//! Client code that takes a [`Dialer`] (or a [`DialFn`]) instead of calling
//! `TcpStream::connect` directly can be pointed at a [`Hub`] in tests:
//!
//! ```ignore
//! let hub = Hub::new();
//! let ws = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await?;
//! ```

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::addr;
use crate::socket::hub::Hub;
use crate::socket::pipe::FakeStream;
use crate::socket::stream::BoxedSocket;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Something that can open a stream connection to `address`.
pub trait Dialer: Send + Sync {
    fn dial<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>>;
}

impl Dialer for Hub {
    fn dial<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        async move { Hub::dial(self, network, address).await.map(BoxedSocket::new) }.boxed()
    }
}

/// Dials real TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        async move {
            addr::check_network(network)?;
            let stream = TcpStream::connect(address).await.net_context(address)?;
            stream.set_nodelay(true).net_context(address)?;
            Ok(BoxedSocket::new(stream))
        }
        .boxed()
    }
}

impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    fn dial<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<BoxedSocket, NetError>> {
        (**self).dial(network, address)
    }
}

/// Closure-shaped dial hook: `(network, address) → connection`.
pub type DialFn =
    Arc<dyn Fn(&str, &str) -> BoxFuture<'static, Result<FakeStream, NetError>> + Send + Sync>;

/// Closure-shaped dial hook that honors cancellation:
/// `(token, network, address) → connection`.
pub type DialContextFn = Arc<
    dyn Fn(&CancellationToken, &str, &str) -> BoxFuture<'static, Result<FakeStream, NetError>>
        + Send
        + Sync,
>;

impl Hub {
    /// This hub's [`dial`](Hub::dial) as a standalone hook.
    pub fn dial_fn(&self) -> DialFn {
        let hub = self.clone();
        Arc::new(move |network: &str, address: &str| {
            let hub = hub.clone();
            let network = network.to_string();
            let address = address.to_string();
            async move { hub.dial(&network, &address).await }.boxed()
        })
    }

    /// This hub's [`dial_context`](Hub::dial_context) as a standalone hook.
    pub fn dial_context_fn(&self) -> DialContextFn {
        let hub = self.clone();
        Arc::new(move |cancel: &CancellationToken, network: &str, address: &str| {
            let hub = hub.clone();
            let cancel = cancel.clone();
            let network = network.to_string();
            let address = address.to_string();
            async move { hub.dial_context(&cancel, &network, &address).await }.boxed()
        })
    }
}
