//! Error types for permessage-deflate

use std::io;
use thiserror::Error;

/// Invalid compression configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Compression level outside the supported range
    #[error("invalid compression level {level}: expected a value in {min}..={max}")]
    InvalidLevel {
        /// The rejected level
        level: i32,
        /// Smallest accepted level
        min: i32,
        /// Largest accepted level
        max: i32,
    },

    /// Settings could not be read from the environment
    #[error("Configuration error: {0}")]
    Settings(#[from] envy::Error),
}

/// Violations of the permessage-deflate wire contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The decompressor rejected the compressed payload
    #[error("malformed compressed data: {0}")]
    MalformedCompressedData(String),

    /// A text message did not decompress to valid UTF-8
    #[error("text message payload is not valid UTF-8")]
    InvalidUtf8,

    /// The peer flagged a message as compressed without negotiating compression
    #[error("received a compressed message but compression was not negotiated")]
    UnexpectedCompression,
}

/// Error type for compression operations
#[derive(Error, Debug)]
pub enum DeflateError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Protocol violation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// IO error from the underlying sink or source
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl DeflateError {
    /// Create an invalid level error for the given value
    pub fn invalid_level(level: i32) -> Self {
        Self::Config(ConfigError::invalid_level(level))
    }

    /// Create a malformed compressed data error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::MalformedCompressedData(msg.into()))
    }

    /// Check if this error was raised by the peer's data rather than local IO
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl ConfigError {
    /// Create an invalid level error carrying the accepted bounds
    pub fn invalid_level(level: i32) -> Self {
        Self::InvalidLevel {
            level,
            min: crate::MIN_COMPRESSION_LEVEL,
            max: crate::MAX_COMPRESSION_LEVEL,
        }
    }
}

impl ProtocolError {
    /// Wrap into an `io::Error` so it can travel through `Read`/`Write` impls
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

impl From<io::Error> for DeflateError {
    /// Unwraps protocol errors that were tunnelled through `std::io`;
    /// everything else is kept as an IO error.
    fn from(err: io::Error) -> Self {
        if let Some(protocol) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ProtocolError>())
        {
            return Self::Protocol(protocol.clone());
        }
        Self::Io(err)
    }
}
