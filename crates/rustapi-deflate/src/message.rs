//! Data message types

use crate::error::ProtocolError;

/// Kind of data message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// UTF-8 text
    Text,
    /// Arbitrary bytes
    Binary,
}

/// Whether a single outgoing message may be compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageCompression {
    /// Follow the connection's write-compression setting
    #[default]
    Default,
    /// Send this message uncompressed
    Disabled,
}

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8 encoded)
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Rebuild a message from a reassembled payload
    pub fn from_payload(message_type: MessageType, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        match message_type {
            MessageType::Text => String::from_utf8(payload)
                .map(Self::Text)
                .map_err(|_| ProtocolError::InvalidUtf8),
            MessageType::Binary => Ok(Self::Binary(payload)),
        }
    }

    /// The message kind
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text(_) => MessageType::Text,
            Self::Binary(_) => MessageType::Binary,
        }
    }

    /// The raw payload bytes
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Check if this is a text message
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Get the text content if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Convert to the payload bytes, consuming the message
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(data) => data,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(data.to_vec())
    }
}
