//! Fake sockets.
//!
//! An in-process stand-in for the OS socket layer:
//! - [`hub`]: address registry pairing dials with accepts
//! - [`listener`]: accept queue bound to one address
//! - [`pipe`]: duplex in-memory byte stream handed to both peers
//! - [`dialer`]: dial hooks for client code (`Dialer`, `DialFn`)
//! - [`stream`]: `StreamSocket`/`BoxedSocket` over fake or real connections

pub mod addr;
pub mod dialer;
pub mod hub;
pub mod listener;
pub mod pipe;
pub mod stream;
