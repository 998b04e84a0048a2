//! Compressing message writers
//!
//! A [`WriterFactory`] hands out one [`CompressionWriter`] per outgoing
//! message. Closing the writer sync-flushes the deflate stream and drops the
//! `00 00 FF FF` trailer before the destination is closed.

use crate::level::CompressionLevel;
use crate::pool::CodecPool;
use crate::trailer::{PayloadSink, TruncatingWriter};
use flate2::{Compress, CompressError, FlushCompress};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

const OUTPUT_CHUNK: usize = 4096;

/// Builds compressing writers for a connection's send path.
///
/// The variant is chosen once per connection:
///
/// - `NoContextTakeover`: every message is an independent deflate stream.
///   Compressors come from a [`CodecPool`] and are reset on return.
/// - `ContextTakeover`: one compressor lives as long as the connection and
///   its window carries over from message to message.
pub enum WriterFactory {
    /// Fresh compression state per message
    NoContextTakeover(Arc<CodecPool>),
    /// One compressor shared by all messages of the connection
    ContextTakeover(ContextTakeoverDeflater),
}

impl WriterFactory {
    /// Stateless factory backed by the global pool
    pub fn no_context_takeover() -> Self {
        Self::NoContextTakeover(CodecPool::global())
    }

    /// Stateless factory backed by a caller-provided pool
    pub fn with_pool(pool: Arc<CodecPool>) -> Self {
        Self::NoContextTakeover(pool)
    }

    /// Context-takeover factory owning a compressor at `level`
    pub fn context_takeover(level: CompressionLevel) -> Self {
        Self::ContextTakeover(ContextTakeoverDeflater::new(level))
    }

    /// Check if this factory keeps compression context between messages
    pub fn is_context_takeover(&self) -> bool {
        matches!(self, Self::ContextTakeover(_))
    }

    /// Start compressing one message into `dest`.
    ///
    /// `level` only applies to the stateless variant; a context-takeover
    /// compressor keeps the level it was created with, since changing it
    /// mid-stream isn't supported by every deflate backend.
    ///
    /// The returned writer borrows the factory, so a second message can't be
    /// started before the first one is closed or dropped.
    pub fn new_writer<W: PayloadSink>(
        &mut self,
        dest: W,
        level: CompressionLevel,
    ) -> CompressionWriter<'_, W> {
        let deflater = match self {
            Self::NoContextTakeover(pool) => Deflater::Pooled {
                compress: Some(pool.take_compressor(level)),
                level,
                pool: Arc::clone(pool),
            },
            Self::ContextTakeover(shared) => Deflater::Shared(shared.begin_message()),
        };
        CompressionWriter::new(deflater, dest)
    }
}

impl fmt::Debug for WriterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContextTakeover(_) => f.write_str("WriterFactory::NoContextTakeover"),
            Self::ContextTakeover(shared) => f
                .debug_tuple("WriterFactory::ContextTakeover")
                .field(&shared.level)
                .finish(),
        }
    }
}

/// The long-lived compressor of a context-takeover connection
#[derive(Debug)]
pub struct ContextTakeoverDeflater {
    compress: Compress,
    level: CompressionLevel,
    in_message: bool,
}

impl ContextTakeoverDeflater {
    /// Create a compressor at `level`
    pub fn new(level: CompressionLevel) -> Self {
        tracing::debug!(%level, "creating context takeover compressor");
        Self {
            compress: Compress::new(level.to_flate2(), false),
            level,
            in_message: false,
        }
    }

    /// Level this compressor was created with
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    fn begin_message(&mut self) -> &mut Self {
        if self.in_message {
            // The previous writer was dropped without being closed. Its
            // output never completed a sync flush, so the peer's window
            // doesn't match ours any more; start over from an empty window.
            tracing::debug!("previous message was abandoned, resetting compression context");
            self.compress.reset();
        }
        self.in_message = true;
        self
    }
}

enum Deflater<'a> {
    Pooled {
        compress: Option<Compress>,
        level: CompressionLevel,
        pool: Arc<CodecPool>,
    },
    Shared(&'a mut ContextTakeoverDeflater),
}

impl Deflater<'_> {
    fn compress_mut(&mut self) -> io::Result<&mut Compress> {
        match self {
            Self::Pooled { compress, .. } => compress
                .as_mut()
                .ok_or_else(|| io::Error::other("compression writer already closed")),
            Self::Shared(shared) => Ok(&mut shared.compress),
        }
    }

    fn release(&mut self) {
        match self {
            Self::Pooled {
                compress,
                level,
                pool,
            } => {
                if let Some(compress) = compress.take() {
                    pool.put_compressor(*level, compress);
                }
            }
            Self::Shared(shared) => shared.in_message = false,
        }
    }
}

/// A compressing sink for a single message.
///
/// Bytes written are deflated into the destination as the compressor
/// produces output. [`PayloadSink::close`] must be called to finish the
/// message. Dropping the writer abandons it: a pooled compressor is freed
/// instead of returned, and a context-takeover compressor is reset when the
/// next message starts.
pub struct CompressionWriter<'a, W: PayloadSink> {
    deflater: Deflater<'a>,
    out: TruncatingWriter<W>,
    buf: Vec<u8>,
    bytes_in: u64,
    bytes_out: u64,
    closed: bool,
}

impl<'a, W: PayloadSink> CompressionWriter<'a, W> {
    fn new(deflater: Deflater<'a>, dest: W) -> Self {
        Self {
            deflater,
            out: TruncatingWriter::new(dest),
            buf: vec![0; OUTPUT_CHUNK],
            bytes_in: 0,
            bytes_out: 0,
            closed: false,
        }
    }

    /// Uncompressed bytes accepted so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Compressed bytes produced so far, including the withheld trailer
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Access the destination
    pub fn get_ref(&self) -> &W {
        self.out.get_ref()
    }

    /// Close the writer and hand back the destination
    pub fn finish(mut self) -> io::Result<W> {
        self.close()?;
        Ok(self.out.into_inner())
    }

    /// Run the compressor until it has no more output for this call.
    fn drive(&mut self, mut input: &[u8], flush: FlushCompress) -> io::Result<()> {
        loop {
            let compress = self.deflater.compress_mut()?;
            let before_in = compress.total_in();
            let before_out = compress.total_out();

            compress
                .compress(input, &mut self.buf, flush)
                .map_err(deflate_error)?;

            let consumed = (compress.total_in() - before_in) as usize;
            let produced = (compress.total_out() - before_out) as usize;

            self.out.write_all(&self.buf[..produced])?;
            self.bytes_out += produced as u64;
            input = &input[consumed..];

            if input.is_empty() && produced < self.buf.len() {
                return Ok(());
            }
            if consumed == 0 && produced == 0 {
                return Err(io::Error::other("deflate made no progress"));
            }
        }
    }
}

impl<W: PayloadSink> Write for CompressionWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("write to closed compression writer"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.drive(buf, FlushCompress::None)?;
        self.bytes_in += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: PayloadSink> PayloadSink for CompressionWriter<'_, W> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        // A sync flush byte-aligns the stream and ends it with an empty
        // stored block, which is exactly the trailer the truncating writer
        // holds back.
        self.drive(&[], FlushCompress::Sync)?;
        self.out.close()?;
        self.closed = true;
        self.deflater.release();

        tracing::trace!(
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            "compressed message"
        );
        Ok(())
    }
}

fn deflate_error(err: CompressError) -> io::Error {
    io::Error::other(format!("Compression error: {err}"))
}
