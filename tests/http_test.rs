//! HTTP over fake connections.
//!
//! Covers:
//! - hyper HTTP/1.1 client over a hub-dialed `BoxedSocket`
//! - `serve_http1` / `spawn_http1` serving a hyper service
//! - Keep-alive reuse and server shutdown

use bytes::Bytes;
use fakenet::server;
use fakenet::socket::dialer::Dialer;
use fakenet::socket::hub::Hub;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::service::service_fn;
use std::convert::Infallible;

async fn hello(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = match req.uri().path() {
        "/hello" => "Hello, World!".to_string(),
        path => format!("not found: {}", path),
    };
    let status = if req.uri().path() == "/hello" { StatusCode::OK } else { StatusCode::NOT_FOUND };
    Ok(Response::builder().status(status).body(Full::new(Bytes::from(body))).unwrap())
}

async fn client(hub: &Hub, address: &str) -> http1::SendRequest<Empty<Bytes>> {
    let socket = Dialer::dial(hub, "tcp", address).await.unwrap();
    let (sender, conn) = http1::handshake(socket).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    sender
}

fn get(path: &str) -> Request<Empty<Bytes>> {
    Request::builder().uri(path).header("host", "fake").body(Empty::new()).unwrap()
}

#[tokio::test]
async fn test_http1_get() {
    let hub = Hub::new();
    let srv = server::spawn_http1(hub.listener("fake:80").unwrap(), service_fn(hello));

    let mut sender = client(&hub, "fake:80").await;
    let resp = sender.send_request(get("/hello")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Hello, World!");

    srv.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http1_keep_alive() {
    let hub = Hub::new();
    let srv = server::spawn_http1(hub.listener("fake:80").unwrap(), service_fn(hello));

    let mut sender = client(&hub, "fake:80").await;
    for path in ["/hello", "/missing", "/hello"] {
        sender.ready().await.unwrap();
        let resp = sender.send_request(get(path)).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        if path == "/hello" {
            assert_eq!(status, StatusCode::OK);
        } else {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(&body[..], b"not found: /missing");
        }
    }
    assert_eq!(srv.listener().backlog_len(), 0);
    srv.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http1_after_shutdown_refused() {
    let hub = Hub::new();
    let srv = server::spawn_http1(hub.listener("fake:80").unwrap(), service_fn(hello));
    srv.shutdown().await.unwrap();

    let err = Dialer::dial(&hub, "tcp", "fake:80").await.unwrap_err();
    assert_eq!(err, fakenet::base::neterror::NetError::ConnectionRefused);
}
