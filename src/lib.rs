//! # fakenet
//!
//! An in-process fake network for testing networked Rust code.
//!
//! `fakenet` replaces the OS socket layer with a [`Hub`](socket::hub::Hub):
//! servers bind [`FakeListener`](socket::listener::FakeListener)s to string
//! addresses, clients dial those addresses, and each connection is a pair of
//! in-memory [`FakeStream`](socket::pipe::FakeStream)s. Nothing touches the
//! kernel, so tests are fast, hermetic, and can run in parallel with one hub
//! each.
//!
//! ## Features
//!
//! - **Listeners**: FIFO accept backlog, idempotent close, `:0` port picking
//! - **Pipes**: bounded duplex byte streams with read/write deadlines
//! - **Dial hooks**: `Dialer` trait plus closure hooks with cancellation
//! - **Servers**: accept loops and hyper HTTP/1.1 over fake connections
//! - **WebSockets**: tokio-tungstenite over any dialer (feature `ws`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fakenet::socket::hub::Hub;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! #[tokio::test]
//! async fn ping() {
//!     let hub = Hub::new();
//!     let listener = hub.listener("fake:8080").unwrap();
//!
//!     let mut client = hub.dial("tcp", "fake:8080").await.unwrap();
//!     let mut server = listener.accept().await.unwrap();
//!
//!     client.write_all(b"ping").await.unwrap();
//!     let mut buf = [0u8; 4];
//!     server.read_exact(&mut buf).await.unwrap();
//!     assert_eq!(&buf, b"ping");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and io::Error interop
//! - [`socket`] - Hub, listeners, pipes, and dial hooks
//! - [`server`] - Accept loops and HTTP/1.1 serving
//! - `ws` - WebSocket client and server connections

pub mod base;
pub mod server;
pub mod socket;
#[cfg(feature = "ws")]
pub mod ws;
