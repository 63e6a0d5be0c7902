//! Conversions between `NetError` and `std::io::Error`.
//!
//! Fake connections implement tokio's `AsyncRead`/`AsyncWrite`, which speak
//! `io::Error`. The helpers here carry a `NetError` through that boundary
//! and back, and turn errors from real sockets into `NetError` kinds.

use crate::base::neterror::NetError;
use std::io;

impl From<NetError> for io::Error {
    fn from(err: NetError) -> Self {
        let kind = match err {
            NetError::Aborted => io::ErrorKind::Interrupted,
            NetError::TimedOut | NetError::ConnectionTimedOut => io::ErrorKind::TimedOut,
            NetError::NotImplemented => io::ErrorKind::Unsupported,
            NetError::ConnectionClosed => io::ErrorKind::BrokenPipe,
            NetError::ConnectionReset => io::ErrorKind::ConnectionReset,
            NetError::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            NetError::AddressInvalid => io::ErrorKind::AddrNotAvailable,
            NetError::AddressInUse => io::ErrorKind::AddrInUse,
            NetError::InvalidUrl => io::ErrorKind::InvalidInput,
            NetError::ListenerClosed => io::ErrorKind::NotConnected,
            NetError::WsProtocolError | NetError::Unknown(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl NetError {
    /// Map an IO error onto a `NetError`.
    ///
    /// Errors produced by fake connections round-trip exactly; errors from
    /// real sockets are classified by their `ErrorKind`.
    pub fn from_io(err: &io::Error) -> NetError {
        if let Some(net) = err.get_ref().and_then(|inner| inner.downcast_ref::<NetError>()) {
            return *net;
        }
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
            io::ErrorKind::TimedOut => NetError::TimedOut,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted => NetError::ConnectionClosed,
            io::ErrorKind::Interrupted => NetError::Aborted,
            io::ErrorKind::Unsupported => NetError::NotImplemented,
            _ => NetError::Unknown(err.raw_os_error().map_or(-2, |code| -code.abs())),
        }
    }
}

/// Extension trait for inspecting IO errors raised by connections.
pub trait IoErrorExt {
    /// The `NetError` behind this IO error.
    ///
    /// # Example
    /// ```ignore
    /// use fakenet::base::context::IoErrorExt;
    ///
    /// let err = stream.read(&mut buf).await.unwrap_err();
    /// assert_eq!(err.net_error(), NetError::TimedOut);
    /// ```
    fn net_error(&self) -> NetError;
}

impl IoErrorExt for io::Error {
    fn net_error(&self) -> NetError {
        NetError::from_io(self)
    }
}

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Convert an IO error into its `NetError` kind, logging the address it
    /// happened on.
    fn net_context(self, address: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn net_context(self, address: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            let err = NetError::from_io(&e);
            tracing::debug!("IO error on {}: {} ({:?})", address, e, err);
            err
        })
    }
}
