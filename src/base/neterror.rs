use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Generic Errors
    #[error("Operation aborted")]
    Aborted,
    #[error("Operation timed out")]
    TimedOut,
    #[error("Not implemented")]
    NotImplemented,

    // Connection Errors
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection reset")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("WebSocket protocol error")]
    WsProtocolError,
    #[error("Address in use")]
    AddressInUse,

    // URL Errors
    #[error("Invalid URL")]
    InvalidUrl,

    // Fake network errors (custom codes starting at -10000)
    #[error("Listener closed")]
    ListenerClosed,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::TimedOut => -7,
            NetError::NotImplemented => -11,

            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::AddressInvalid => -108,
            NetError::ConnectionTimedOut => -118,
            NetError::WsProtocolError => -145,
            NetError::AddressInUse => -147,

            NetError::InvalidUrl => -300,

            NetError::ListenerClosed => -10000,
            NetError::Unknown(code) => *code,
        }
    }

    /// Whether this error is the normal end of an accept loop or a stream,
    /// as opposed to a fault.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, NetError::ListenerClosed | NetError::ConnectionClosed)
    }

    /// Whether a deadline or dial timeout produced this error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::TimedOut | NetError::ConnectionTimedOut)
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -7 => NetError::TimedOut,
            -11 => NetError::NotImplemented,

            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -108 => NetError::AddressInvalid,
            -118 => NetError::ConnectionTimedOut,
            -145 => NetError::WsProtocolError,
            -147 => NetError::AddressInUse,

            -300 => NetError::InvalidUrl,

            -10000 => NetError::ListenerClosed,
            _ => NetError::Unknown(code),
        }
    }
}
