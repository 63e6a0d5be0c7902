//! WebSocket message types and their tungstenite equivalents.

use bytes::Bytes;
use tokio_tungstenite::tungstenite;

/// WebSocket message type.
#[derive(Debug, Clone)]
pub enum Message {
    /// Text message (UTF-8)
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Ping frame
    Ping(Vec<u8>),
    /// Pong frame
    Pong(Vec<u8>),
    /// Close frame with optional code and reason
    Close(Option<CloseFrame>),
}

/// Close frame data.
#[derive(Debug, Clone)]
pub struct CloseFrame {
    /// Close code (RFC 6455)
    pub code: CloseCode,
    /// Close reason (optional UTF-8 string)
    pub reason: String,
}

impl CloseFrame {
    /// Create a new close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason.
    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "")
    }
}

/// WebSocket close codes (RFC 6455).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure
    pub const NORMAL: Self = Self(1000);
    /// Server going down
    pub const GOING_AWAY: Self = Self(1001);
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl Message {
    /// Check if this is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Close code carried by a close message, if any.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Message::Close(Some(frame)) => Some(frame.code),
            _ => None,
        }
    }

    /// Whether this is a close message with the normal closure code.
    pub fn is_normal_close(&self) -> bool {
        self.close_code() == Some(CloseCode::NORMAL)
    }

    /// Try to get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as binary data.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Message::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}


impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => tungstenite::Message::Text(s),
            Message::Binary(b) => tungstenite::Message::Binary(b.to_vec()),
            Message::Ping(d) => tungstenite::Message::Ping(d),
            Message::Pong(d) => tungstenite::Message::Pong(d),
            Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| {
                tungstenite::protocol::CloseFrame {
                    code: tungstenite::protocol::frame::coding::CloseCode::from(f.code.0),
                    reason: f.reason.into(),
                }
            })),
        }
    }
}

impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(s) => Message::Text(s.to_string()),
            tungstenite::Message::Binary(b) => Message::Binary(Bytes::from(b.to_vec())),
            tungstenite::Message::Ping(d) => Message::Ping(d.to_vec()),
            tungstenite::Message::Pong(d) => Message::Pong(d.to_vec()),
            tungstenite::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
                code: CloseCode(f.code.into()),
                reason: f.reason.to_string(),
            })),
            // Raw frames only show up when writing; treat a stray one as empty data.
            tungstenite::Message::Frame(_) => Message::Binary(Bytes::new()),
        }
    }
}
