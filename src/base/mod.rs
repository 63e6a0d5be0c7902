//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): error kinds with Chromium-style codes
//! - [`context`]: carrying `NetError` through `std::io::Error`

pub mod context;
pub mod neterror;
