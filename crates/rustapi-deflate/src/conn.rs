//! Connection send and receive paths
//!
//! Framing lives outside this crate. A transport implements [`FrameWriter`]
//! to accept one message's payload at a time and [`FrameReader`] to hand
//! back one message's payload at a time; [`Connection`] puts compression
//! between the two and the caller.
//!
//! A connection is not meant to be shared: one caller sends, one caller
//! receives, and each path finishes a message before starting the next.
//! `&mut self` on every operation enforces this.

use crate::config::CompressionConfig;
use crate::error::{DeflateError, ProtocolError};
use crate::message::{Message, MessageCompression, MessageType};
use crate::reader::DecompressionReader;
use crate::trailer::PayloadSink;
use crate::writer::CompressionWriter;
use std::io::{self, Read, Write};

/// Frame emitter for outgoing messages
pub trait FrameWriter {
    /// Sink for one message's payload; closing it finishes the message
    type Sink<'a>: PayloadSink
    where
        Self: 'a;

    /// Start a message. `compressed` is the value of the per-message
    /// compression bit (RSV1) for its first frame.
    fn begin_message(
        &mut self,
        message_type: MessageType,
        compressed: bool,
    ) -> io::Result<Self::Sink<'_>>;
}

/// One reassembled incoming message, before decompression
#[derive(Debug)]
pub struct IncomingFrame<R> {
    /// Kind of message
    pub message_type: MessageType,
    /// Whether the first frame carried the compression bit
    pub compressed: bool,
    /// The raw payload as received
    pub payload: R,
}

/// Frame source for incoming messages
pub trait FrameReader {
    /// Byte source yielding one message's raw payload
    type Source<'a>: Read
    where
        Self: 'a;

    /// Next data message, or `None` once the peer is done
    fn next_message(&mut self) -> io::Result<Option<IncomingFrame<Self::Source<'_>>>>;
}

/// A message connection with permessage-deflate support
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    compression: CompressionConfig,
}

impl<T> Connection<T> {
    /// Create a connection over `transport`
    pub fn new(transport: T, compression: CompressionConfig) -> Self {
        Self {
            transport,
            compression,
        }
    }

    /// Set the compression level for subsequent messages
    pub fn set_compression_level(&mut self, level: i32) -> Result<(), DeflateError> {
        self.compression.set_level(level)?;
        tracing::debug!(level, "compression level changed");
        Ok(())
    }

    /// Enable or disable compression of outgoing messages
    ///
    /// Only has an effect if compression was negotiated.
    pub fn enable_write_compression(&mut self, enabled: bool) {
        self.compression.set_enabled(enabled);
    }

    /// The connection's compression configuration
    pub fn compression(&self) -> &CompressionConfig {
        &self.compression
    }

    /// Access the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably access the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the connection, returning the transport
    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: FrameWriter> Connection<T> {
    /// Start streaming an outgoing message
    pub fn next_writer(
        &mut self,
        message_type: MessageType,
    ) -> Result<MessageWriter<'_, T::Sink<'_>>, DeflateError> {
        self.next_writer_with(message_type, MessageCompression::Default)
    }

    /// Start streaming an outgoing message with a per-message override
    pub fn next_writer_with(
        &mut self,
        message_type: MessageType,
        compression: MessageCompression,
    ) -> Result<MessageWriter<'_, T::Sink<'_>>, DeflateError> {
        let compress =
            compression == MessageCompression::Default && self.compression.compresses_writes();
        let level = self.compression.level();
        let sink = self.transport.begin_message(message_type, compress)?;

        match self.compression.writer_factory_mut() {
            Some(factory) if compress => {
                Ok(MessageWriter::Compressed(factory.new_writer(sink, level)))
            }
            _ => Ok(MessageWriter::Plain(sink)),
        }
    }

    /// Send a complete message
    pub fn write_message(&mut self, msg: &Message) -> Result<(), DeflateError> {
        self.write_message_with(msg, MessageCompression::Default)
    }

    /// Send a complete message with a per-message compression override
    pub fn write_message_with(
        &mut self,
        msg: &Message,
        compression: MessageCompression,
    ) -> Result<(), DeflateError> {
        let mut writer = self.next_writer_with(msg.message_type(), compression)?;
        writer.write_all(msg.payload())?;
        writer.close()?;
        Ok(())
    }
}

impl<T: FrameReader> Connection<T> {
    /// Start reading the next incoming message
    pub fn next_reader(
        &mut self,
    ) -> Result<Option<(MessageType, MessageReader<'_, T::Source<'_>>)>, DeflateError> {
        let Some(frame) = self.transport.next_message()? else {
            return Ok(None);
        };

        let reader = if frame.compressed {
            match self.compression.reader_factory_mut() {
                Some(factory) => MessageReader::Compressed(factory.new_reader(frame.payload)),
                None => return Err(ProtocolError::UnexpectedCompression.into()),
            }
        } else {
            MessageReader::Plain(frame.payload)
        };

        Ok(Some((frame.message_type, reader)))
    }

    /// Read the next complete message
    pub fn read_message(&mut self) -> Result<Option<Message>, DeflateError> {
        let Some((message_type, mut reader)) = self.next_reader()? else {
            return Ok(None);
        };

        let mut payload = Vec::new();
        if let Err(err) = reader.read_to_end(&mut payload) {
            let err = DeflateError::from(err);
            if err.is_protocol() {
                tracing::warn!(error = %err, "rejecting malformed compressed message");
            }
            return Err(err);
        }

        tracing::trace!(
            compressed = reader.is_compressed(),
            len = payload.len(),
            "message received"
        );
        Ok(Some(Message::from_payload(message_type, payload)?))
    }
}

/// Writer for one outgoing message
pub enum MessageWriter<'a, S: PayloadSink> {
    /// Payload goes to the frame layer as-is
    Plain(S),
    /// Payload is deflated on its way to the frame layer
    Compressed(CompressionWriter<'a, S>),
}

impl<S: PayloadSink> MessageWriter<'_, S> {
    /// Check if this message is being compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }
}

impl<S: PayloadSink> Write for MessageWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(sink) => sink.write(buf),
            Self::Compressed(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(sink) => sink.flush(),
            Self::Compressed(writer) => writer.flush(),
        }
    }
}

impl<S: PayloadSink> PayloadSink for MessageWriter<'_, S> {
    fn close(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(sink) => sink.close(),
            Self::Compressed(writer) => writer.close(),
        }
    }
}

/// Reader for one incoming message
pub enum MessageReader<'a, R> {
    /// Payload was sent uncompressed
    Plain(R),
    /// Payload is inflated as it is read
    Compressed(DecompressionReader<'a, R>),
}

impl<R> MessageReader<'_, R> {
    /// Check if this message was compressed by the peer
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }
}

impl<R: Read> Read for MessageReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(source) => source.read(buf),
            Self::Compressed(reader) => reader.read(buf),
        }
    }
}
