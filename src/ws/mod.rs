//! WebSocket support.
//!
//! tokio-tungstenite connections that run over any byte stream: real TCP,
//! a [`FakeStream`](crate::socket::pipe::FakeStream) accepted from a hub
//! listener, or a hyper upgrade.
//!
//! # Example
//! ```ignore
//! use fakenet::ws::{WebSocket, Message};
//!
//! let ws = WebSocket::connect_with(&hub, "ws://127.0.0.1:8080/ws").await?;
//! ws.send(Message::Text("Hello".into())).await?;
//! let msg = ws.recv().await?;
//! ```

mod connection;
mod message;

pub use connection::{WebSocket, WebSocketBuilder};
pub use message::{CloseCode, CloseFrame, Message};
