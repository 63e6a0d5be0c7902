//! WebSocket Tests
//!
//! Covers:
//! - Echo over a hub listener with the tungstenite server handshake
//! - Echo behind a hyper HTTP/1.1 upgrade
//! - Normal close propagation

#![cfg(feature = "ws")]

use bytes::Bytes;
use fakenet::base::neterror::NetError;
use fakenet::server;
use fakenet::socket::hub::Hub;
use fakenet::socket::pipe::FakeStream;
use fakenet::ws::{CloseCode, CloseFrame, Message, WebSocket, WebSocketBuilder};
use http::{header, Request, Response, StatusCode};
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// Echo data messages until the peer closes; returns the close code seen.
async fn echo<S>(ws: WebSocket<S>) -> Option<CloseCode>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    while let Some(msg) = ws.recv().await.unwrap() {
        match msg {
            Message::Close(_) => {
                ws.close(None).await.unwrap();
                return msg.close_code();
            }
            Message::Ping(_) | Message::Pong(_) => {}
            data => ws.send(data).await.unwrap(),
        }
    }
    None
}

#[tokio::test]
async fn test_echo_over_plain_accept() {
    let hub = Hub::new();
    let listener = hub.listener(":8080").unwrap();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let mut done_tx = Some(done_tx);

    let srv = server::spawn(listener, move |stream: FakeStream| {
        let done_tx = done_tx.take();
        async move {
            let ws = WebSocket::accept(stream).await?;
            let code = echo(ws).await;
            if let Some(tx) = done_tx {
                let _ = tx.send(code);
            }
            Ok::<_, NetError>(())
        }
    });

    let ws = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await.unwrap();
    for i in 0..5 {
        let text = format!("message {}", i);
        ws.send_text(text.clone()).await.unwrap();
        let reply = ws.recv().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some(text.as_str()));
    }

    ws.send_binary(Bytes::from_static(&[1, 2, 3])).await.unwrap();
    let reply = ws.recv().await.unwrap().unwrap();
    assert_eq!(reply.as_bytes(), Some(&[1u8, 2, 3][..]));

    // The server's tungstenite answers pings on its own.
    ws.ping(b"hb".to_vec()).await.unwrap();
    let pong = ws.recv().await.unwrap().unwrap();
    assert!(matches!(pong, Message::Pong(ref data) if data == b"hb"));

    ws.close(Some(CloseFrame::normal())).await.unwrap();
    assert_eq!(done_rx.await.unwrap(), Some(CloseCode::NORMAL));
    srv.shutdown().await.unwrap();
}

async fn upgrade(mut req: Request<Incoming>) -> Result<Response<Empty<Bytes>>, Infallible> {
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY).cloned() else {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Empty::new())
            .unwrap());
    };
    let protocol = req.headers().get(header::SEC_WEBSOCKET_PROTOCOL).cloned();

    tokio::spawn(async move {
        let upgraded = hyper::upgrade::on(&mut req).await.unwrap();
        let ws = WebSocket::from_upgraded(TokioIo::new(upgraded)).await;
        echo(ws).await;
    });

    let mut resp = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()));
    if let Some(protocol) = protocol {
        resp = resp.header(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    Ok(resp.body(Empty::new()).unwrap())
}

#[tokio::test]
async fn test_echo_over_http_upgrade() {
    let hub = Hub::new();
    let srv = server::spawn_http1(hub.listener(":8080").unwrap(), service_fn(upgrade));

    let ws = WebSocketBuilder::new()
        .url("ws://127.0.0.1:8080/ws")
        .unwrap()
        .header("X-Test", "1")
        .subprotocol("echo")
        .connect_with(&hub)
        .await
        .unwrap();

    for i in 0..5 {
        ws.send(Message::from(format!("hello {}", i))).await.unwrap();
        let reply = ws.recv().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some(format!("hello {}", i).as_str()));
    }

    ws.close(Some(CloseFrame::normal())).await.unwrap();
    let last = ws.recv().await.unwrap();
    assert!(last.map_or(true, |m| m.is_normal_close()));
    srv.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_plain_http_fails() {
    let hub = Hub::new();
    let srv = server::spawn_http1(
        hub.listener(":8080").unwrap(),
        service_fn(|_req: Request<Incoming>| async {
            Ok::<_, Infallible>(Response::new(Empty::<Bytes>::new()))
        }),
    );

    let err = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await.unwrap_err();
    assert_eq!(err, NetError::WsProtocolError);
    srv.shutdown().await.unwrap();
}
