//! # rustapi-deflate
//!
//! Permessage-deflate compression for RustAPI WebSocket connections.
//!
//! This crate compresses outgoing message payloads and decompresses incoming
//! ones, in both modes the extension defines:
//!
//! - **No context takeover**: each message is an independent deflate stream.
//!   Compressors and decompressors are pooled and reset between messages.
//! - **Context takeover**: one compressor and one decompressor live for the
//!   whole connection, so later messages can refer back to earlier ones.
//!
//! The `00 00 FF FF` trailer left by a deflate sync flush never reaches the
//! wire: the sending side withholds it and the receiving side appends it
//! again before decompressing.
//!
//! Framing, masking and the extension handshake are left to the transport,
//! which plugs in through [`FrameWriter`] and [`FrameReader`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rustapi_deflate::prelude::*;
//!
//! let settings = DeflateSettings::new().enabled(true).context_takeover(true);
//! let mut conn = Connection::new(MemoryTransport::new(), CompressionConfig::from_settings(&settings));
//!
//! conn.set_compression_level(6)?;
//! conn.write_message(&Message::text("hello hello hello"))?;
//!
//! // Opt out for a single message
//! conn.write_message_with(&Message::binary(jpeg_bytes), MessageCompression::Disabled)?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod config;
mod conn;
mod error;
mod level;
mod memory;
mod message;
mod pool;
mod reader;
mod trailer;
mod writer;

pub use config::{CompressionConfig, DeflateSettings};
pub use conn::{Connection, FrameReader, FrameWriter, IncomingFrame, MessageReader, MessageWriter};
pub use error::{ConfigError, DeflateError, ProtocolError};
pub use level::{
    CompressionLevel, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, MIN_COMPRESSION_LEVEL,
};
pub use memory::{MemorySink, MemoryTransport, RecordedMessage};
pub use message::{Message, MessageCompression, MessageType};
pub use pool::{CodecPool, DEFAULT_IDLE_LIMIT};
pub use reader::{ContextTakeoverInflater, DecompressionReader, ReaderFactory};
pub use trailer::{PayloadSink, TruncatingWriter, SYNC_FLUSH_MARKER};
pub use writer::{CompressionWriter, ContextTakeoverDeflater, WriterFactory};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CompressionConfig, CompressionLevel, Connection, DeflateError, DeflateSettings,
        MemoryTransport, Message, MessageCompression, MessageType, PayloadSink,
    };
}
