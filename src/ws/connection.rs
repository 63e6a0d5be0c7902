//! WebSocket connection with tokio-tungstenite.
//!
//! The handshake and framing are tungstenite's; this wrapper only decides
//! where the bytes travel. Clients dial through any [`Dialer`] (a [`Hub`]
//! in tests, [`TcpDialer`] otherwise) and servers wrap an accepted or
//! HTTP-upgraded stream.
//!
//! [`Hub`]: crate::socket::hub::Hub

use super::message::{CloseFrame, Message};
use crate::base::neterror::NetError;
use crate::socket::dialer::{Dialer, TcpDialer};
use crate::socket::stream::BoxedSocket;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::{tungstenite, WebSocketStream};
use url::Url;

/// WebSocket connection.
///
/// Thread-safe wrapper around a WebSocket stream with send/recv methods.
pub struct WebSocket<S = BoxedSocket> {
    sink: Arc<Mutex<SplitSink<WebSocketStream<S>, tungstenite::Message>>>,
    stream: Arc<Mutex<SplitStream<WebSocketStream<S>>>>,
    url: Option<Url>,
}

impl WebSocket<BoxedSocket> {
    /// Connect to a WebSocket server over real TCP.
    pub async fn connect(url: &str) -> Result<Self, NetError> {
        Self::connect_with(&TcpDialer, url).await
    }

    /// Connect to a WebSocket server, opening the connection with `dialer`.
    ///
    /// # Example
    /// ```ignore
    /// let hub = Hub::new();
    /// let ws = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await?;
    /// ```
    pub async fn connect_with<D: Dialer + ?Sized>(dialer: &D, url: &str) -> Result<Self, NetError> {
        WebSocketBuilder::new().url(url)?.connect_with(dialer).await
    }
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Run the server side of the handshake on an accepted connection.
    pub async fn accept(stream: S) -> Result<Self, NetError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            tracing::debug!("WebSocket accept error: {:?}", e);
            ws_error(e)
        })?;
        Ok(Self::from_stream(ws_stream, None))
    }

    /// Wrap a connection whose handshake already happened elsewhere, such as
    /// an HTTP upgrade answered by a hyper service.
    pub async fn from_upgraded(io: S) -> Self {
        let ws_stream = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
        Self::from_stream(ws_stream, None)
    }

    fn from_stream(ws_stream: WebSocketStream<S>, url: Option<Url>) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
            url,
        }
    }

    /// Get the URL this WebSocket connected to (client side only).
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Send a message.
    pub async fn send(&self, msg: Message) -> Result<(), NetError> {
        let mut sink = self.sink.lock().await;
        sink.send(msg.into()).await.map_err(|e| {
            tracing::debug!("WebSocket send error: {:?}", e);
            ws_error(e)
        })
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), NetError> {
        self.send(Message::Text(text.into())).await
    }

    /// Send binary data.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), NetError> {
        self.send(Message::Binary(data.into())).await
    }

    /// Receive a message.
    ///
    /// Returns `None` once the closing handshake is done or the peer went away.
    pub async fn recv(&self) -> Result<Option<Message>, NetError> {
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(msg)) => Ok(Some(msg.into())),
            Some(Err(tungstenite::Error::ConnectionClosed)) => Ok(None),
            Some(Err(e)) => {
                tracing::debug!("WebSocket recv error: {:?}", e);
                Err(ws_error(e))
            }
            None => Ok(None),
        }
    }

    /// Close the connection with optional code and reason.
    ///
    /// If the peer closed first this completes the handshake instead: the
    /// close reply queued on receipt of the peer's frame is flushed, and the
    /// call succeeds.
    pub async fn close(&self, frame: Option<CloseFrame>) -> Result<(), NetError> {
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(frame).into()).await {
            Ok(()) => Ok(()),
            Err(e) if is_closing(&e) => match sink.close().await {
                Ok(()) => Ok(()),
                Err(e) if is_closing(&e) => Ok(()),
                Err(e) => {
                    tracing::debug!("WebSocket close error: {:?}", e);
                    Err(ws_error(e))
                }
            },
            Err(e) => {
                tracing::debug!("WebSocket close error: {:?}", e);
                Err(ws_error(e))
            }
        }
    }

    /// Ping the peer.
    pub async fn ping(&self, data: Vec<u8>) -> Result<(), NetError> {
        self.send(Message::Ping(data)).await
    }
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket").field("url", &self.url.as_ref().map(Url::as_str)).finish()
    }
}

/// Errors meaning a closing handshake is already under way.
fn is_closing(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)
    )
}

/// Classify a tungstenite error.
fn ws_error(err: tungstenite::Error) -> NetError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            NetError::ConnectionClosed
        }
        tungstenite::Error::Io(e) => NetError::from_io(&e),
        tungstenite::Error::Url(_) => NetError::InvalidUrl,
        _ => NetError::WsProtocolError,
    }
}

/// WebSocket connection builder.
#[derive(Debug, Clone)]
pub struct WebSocketBuilder {
    url: Option<Url>,
    headers: http::HeaderMap,
    subprotocols: Vec<String>,
}

impl Default for WebSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketBuilder {
    /// Create a new WebSocket builder.
    pub fn new() -> Self {
        Self {
            url: None,
            headers: http::HeaderMap::new(),
            subprotocols: Vec::new(),
        }
    }

    /// Set the URL to connect to.
    pub fn url(mut self, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;

        // Validate scheme
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(NetError::InvalidUrl);
        }

        self.url = Some(url);
        Ok(self)
    }

    /// Add a header to the WebSocket handshake.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a subprotocol.
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// `host:port` the connection is dialed to.
    fn address(url: &Url) -> Result<String, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        Ok(format!("{}:{}", host, port))
    }

    /// Connect over real TCP.
    pub async fn connect(self) -> Result<WebSocket, NetError> {
        self.connect_with(&TcpDialer).await
    }

    /// Connect, opening the connection with `dialer`.
    pub async fn connect_with<D: Dialer + ?Sized>(self, dialer: &D) -> Result<WebSocket, NetError> {
        let url = self.url.ok_or(NetError::InvalidUrl)?;
        if url.scheme() == "wss" {
            // No TLS layer over dialed sockets.
            return Err(NetError::NotImplemented);
        }

        let mut request = url.as_str().into_client_request().map_err(ws_error)?;
        request.headers_mut().extend(self.headers);
        if !self.subprotocols.is_empty() {
            let protocols = http::header::HeaderValue::try_from(self.subprotocols.join(", "))
                .map_err(|_| NetError::InvalidUrl)?;
            request.headers_mut().insert(http::header::SEC_WEBSOCKET_PROTOCOL, protocols);
        }

        let address = Self::address(&url)?;
        let socket = dialer.dial("tcp", &address).await?;
        let (ws_stream, _response) =
            tokio_tungstenite::client_async(request, socket).await.map_err(|e| {
                tracing::debug!("WebSocket connect error: {:?}", e);
                ws_error(e)
            })?;

        tracing::debug!("WebSocket connected to {}", url);
        Ok(WebSocket::from_stream(ws_stream, Some(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::hub::Hub;

    #[test]
    fn test_builder_new() {
        let builder = WebSocketBuilder::new();
        assert!(builder.url.is_none());
    }

    #[test]
    fn test_builder_url() {
        let builder = WebSocketBuilder::new().url("ws://example.com/ws").unwrap();
        assert!(builder.url.is_some());
    }

    #[test]
    fn test_builder_invalid_scheme() {
        let result = WebSocketBuilder::new().url("http://example.com");
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_headers() {
        let builder = WebSocketBuilder::new().header("Authorization", "Bearer token");
        assert!(builder.headers.contains_key("authorization"));
    }

    #[test]
    fn test_address_uses_default_port() {
        let url = Url::parse("ws://127.0.0.1/ws").unwrap();
        assert_eq!(WebSocketBuilder::address(&url).unwrap(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn test_wss_not_supported() {
        let hub = Hub::new();
        let err = WebSocketBuilder::new()
            .url("wss://example.com/ws")
            .unwrap()
            .connect_with(&hub)
            .await
            .unwrap_err();
        assert_eq!(err, NetError::NotImplemented);
    }

    #[tokio::test]
    async fn test_connect_refused_without_listener() {
        let hub = Hub::new();
        let err = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await.unwrap_err();
        assert_eq!(err, NetError::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_echo_over_hub() {
        let hub = Hub::new();
        let listener = hub.listener(":8080").unwrap();

        let server = tokio::spawn(async move {
            let stream = listener.accept().await.unwrap();
            let ws = WebSocket::accept(stream).await.unwrap();
            while let Some(msg) = ws.recv().await.unwrap() {
                if msg.is_close() {
                    ws.close(None).await.unwrap();
                    return msg.close_code();
                }
                ws.send(msg).await.unwrap();
            }
            None
        });

        let ws = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await.unwrap();
        assert_eq!(ws.url().map(Url::as_str), Some("ws://127.0.0.1:8080/ws"));
        ws.send_text("ping").await.unwrap();
        let reply = ws.recv().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some("ping"));

        ws.close(Some(CloseFrame::normal())).await.unwrap();
        assert_eq!(server.await.unwrap(), Some(crate::ws::CloseCode::NORMAL));

        // The server's reply completes the closing handshake.
        let reply = ws.recv().await.unwrap().unwrap();
        assert!(reply.is_normal_close());
    }

    #[tokio::test]
    async fn test_close_after_peer_close_flushes_reply() {
        let hub = Hub::new();
        let listener = hub.listener("fake:9000").unwrap();

        let server = tokio::spawn(async move {
            let ws = WebSocket::accept(listener.accept().await.unwrap()).await.unwrap();
            let msg = ws.recv().await.unwrap().unwrap();
            assert!(msg.is_normal_close());
            // Closing again after the handshake finished is harmless.
            ws.close(None).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let ws = WebSocket::connect_with(&hub, "ws://fake:9000/").await.unwrap();
        ws.close(Some(CloseFrame::normal())).await.unwrap();
        server.await.unwrap();

        // The server is gone; its close reply still arrived first.
        let reply = ws.recv().await.unwrap().unwrap();
        assert_eq!(reply.close_code(), Some(crate::ws::CloseCode::NORMAL));
    }
}
