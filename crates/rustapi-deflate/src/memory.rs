//! In-memory message transport
//!
//! Records every outgoing message and replays queued incoming ones. Useful
//! for tests, benchmarks and for piping two [`Connection`](crate::Connection)s
//! into each other without a socket.

use crate::conn::{FrameReader, FrameWriter, IncomingFrame};
use crate::message::MessageType;
use crate::trailer::PayloadSink;
use bytes::{buf::Reader, Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Write};

/// A message as it crossed the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    /// Kind of message
    pub message_type: MessageType,
    /// Compression bit
    pub compressed: bool,
    /// Payload bytes as they would appear on the wire
    pub payload: Bytes,
}

/// Transport keeping messages in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Vec<RecordedMessage>,
    inbox: VecDeque<RecordedMessage>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the receive path
    pub fn push_incoming(&mut self, msg: RecordedMessage) {
        self.inbox.push_back(msg);
    }

    /// Messages sent so far
    pub fn sent(&self) -> &[RecordedMessage] {
        &self.sent
    }

    /// Take the messages sent so far
    pub fn take_sent(&mut self) -> Vec<RecordedMessage> {
        std::mem::take(&mut self.sent)
    }
}

/// Payload sink handed out by [`MemoryTransport`]
#[derive(Debug)]
pub struct MemorySink<'a> {
    message_type: MessageType,
    compressed: bool,
    buf: BytesMut,
    sent: &'a mut Vec<RecordedMessage>,
    closed: bool,
}

impl Write for MemorySink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("message already closed"));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PayloadSink for MemorySink<'_> {
    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.sent.push(RecordedMessage {
                message_type: self.message_type,
                compressed: self.compressed,
                payload: self.buf.split().freeze(),
            });
        }
        Ok(())
    }
}

impl FrameWriter for MemoryTransport {
    type Sink<'a> = MemorySink<'a>;

    fn begin_message(
        &mut self,
        message_type: MessageType,
        compressed: bool,
    ) -> io::Result<Self::Sink<'_>> {
        Ok(MemorySink {
            message_type,
            compressed,
            buf: BytesMut::new(),
            sent: &mut self.sent,
            closed: false,
        })
    }
}

impl FrameReader for MemoryTransport {
    type Source<'a> = Reader<Bytes>;

    fn next_message(&mut self) -> io::Result<Option<IncomingFrame<Self::Source<'_>>>> {
        Ok(self.inbox.pop_front().map(|msg| IncomingFrame {
            message_type: msg.message_type,
            compressed: msg.compressed,
            payload: msg.payload.reader(),
        }))
    }
}
