//! Accept loops over fake listeners.
//!
//! [`serve`] is the generic "serve connections from this listener" loop and
//! [`serve_http1`] runs hyper's HTTP/1.1 server (with upgrades, so WebSocket
//! handshakes work) on each accepted connection.
//!
//! # Example
//! ```ignore
//! let hub = Hub::new();
//! let server = server::spawn(hub.listener(":8080")?, |mut conn: FakeStream| async move {
//!     let mut buf = [0u8; 4];
//!     conn.read_exact(&mut buf).await.map_err(|e| e.net_error())?;
//!     conn.write_all(&buf).await.map_err(|e| e.net_error())
//! });
//! // ...
//! server.shutdown().await?;
//! ```

use crate::base::neterror::NetError;
use crate::socket::listener::FakeListener;
use crate::socket::pipe::FakeStream;
use http::{Request, Response};
use http_body::Body;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper_util::rt::TokioIo;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Accept connections until the listener closes, running `handler` on each
/// in its own task.
///
/// Returns `Ok(())` when the listener is closed; that is the normal way to
/// stop a server. Connections still being handled at that point are aborted,
/// which closes them.
pub async fn serve<H, Fut>(listener: &FakeListener, mut handler: H) -> Result<(), NetError>
where
    H: FnMut(FakeStream) -> Fut,
    Fut: Future<Output = Result<(), NetError>> + Send + 'static,
{
    let mut connections = JoinSet::new();
    tracing::debug!("Serving on {}", listener.local_addr());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(NetError::ListenerClosed) => {
                        tracing::debug!(
                            "Listener {} closed, dropping {} connections",
                            listener.local_addr(),
                            connections.len()
                        );
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };

                let peer = stream.peer_addr().clone();
                let conn = handler(stream);
                connections.spawn(async move {
                    match conn.await {
                        Ok(()) => tracing::trace!("Connection from {} finished", peer),
                        Err(e) if e.is_shutdown() => tracing::trace!("Connection from {} closed", peer),
                        Err(e) => tracing::debug!("Connection from {} failed: {}", peer, e),
                    }
                });
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::warn!("Connection handler panicked: {}", e);
                    }
                }
            }
        }
    }
}

/// Serve HTTP/1.1 with `service` on every accepted connection.
pub async fn serve_http1<S, B>(listener: &FakeListener, service: S) -> Result<(), NetError>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    serve(listener, move |stream: FakeStream| {
        let service = service.clone();
        async move {
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
                .map_err(|e| {
                    tracing::debug!("HTTP connection error: {}", e);
                    if e.is_incomplete_message() {
                        NetError::ConnectionClosed
                    } else {
                        NetError::ConnectionReset
                    }
                })
        }
    })
    .await
}

/// A server running in the background.
pub struct ServerHandle {
    listener: Arc<FakeListener>,
    task: JoinHandle<Result<(), NetError>>,
}

impl ServerHandle {
    pub fn listener(&self) -> &FakeListener {
        &self.listener
    }

    /// Close the listener and wait for the accept loop to finish.
    pub async fn shutdown(self) -> Result<(), NetError> {
        self.listener.close();
        self.task.await.map_err(|e| {
            tracing::warn!("Server task failed: {}", e);
            NetError::Aborted
        })?
    }
}

/// Run [`serve`] on a background task.
pub fn spawn<H, Fut>(listener: FakeListener, handler: H) -> ServerHandle
where
    H: FnMut(FakeStream) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), NetError>> + Send + 'static,
{
    let listener = Arc::new(listener);
    let task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { serve(&listener, handler).await })
    };
    ServerHandle { listener, task }
}

/// Run [`serve_http1`] on a background task.
pub fn spawn_http1<S, B>(listener: FakeListener, service: S) -> ServerHandle
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let listener = Arc::new(listener);
    let task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { serve_http1(&listener, service).await })
    };
    ServerHandle { listener, task }
}
