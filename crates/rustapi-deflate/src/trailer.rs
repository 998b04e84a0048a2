//! Sync-flush trailer handling
//!
//! A deflate sync flush always ends with the four bytes `00 00 FF FF`.
//! Permessage-deflate forbids sending them, so the compressing sink writes
//! through a [`TruncatingWriter`] that keeps the last four bytes of the
//! stream back and drops them on close.

use std::io::{self, Write};

/// The empty stored block emitted by a deflate sync flush
pub const SYNC_FLUSH_MARKER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// A byte sink that can be closed, as handed out by the frame layer.
///
/// `close` finishes the message on the destination (for example by emitting
/// the final frame). Plain buffers implement it as a no-op.
pub trait PayloadSink: Write {
    /// Finish the message written to this sink
    fn close(&mut self) -> io::Result<()>;
}

impl PayloadSink for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PayloadSink for io::Sink {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: PayloadSink + ?Sized> PayloadSink for &mut S {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<S: PayloadSink + ?Sized> PayloadSink for Box<S> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Writer that withholds the final four bytes written through it.
///
/// Every write forwards all but the last four bytes of everything seen so
/// far. The withheld tail is discarded by [`TruncatingWriter::close`]. After
/// an error from the destination the writer must not be reused.
#[derive(Debug)]
pub struct TruncatingWriter<W> {
    inner: W,
    pending: [u8; 4],
    filled: usize,
}

impl<W: Write> TruncatingWriter<W> {
    /// Wrap a destination
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: [0; 4],
            filled: 0,
        }
    }

    /// Bytes currently held back
    pub fn pending(&self) -> &[u8] {
        &self.pending[..self.filled]
    }

    /// Access the destination
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Drop the withheld tail and hand back the destination
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Discard the withheld tail, leaving the writer ready for a new stream
    pub(crate) fn discard_pending(&mut self) {
        if self.pending() != SYNC_FLUSH_MARKER {
            tracing::warn!(
                tail = ?self.pending(),
                "deflate sync flush did not end with the expected marker"
            );
        }
        self.filled = 0;
    }
}

impl<W: PayloadSink> TruncatingWriter<W> {
    /// Discard the withheld tail and close the destination
    pub fn close(&mut self) -> io::Result<()> {
        self.discard_pending();
        self.inner.close()
    }
}

impl<W: Write> Write for TruncatingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = buf;

        // Top up the pending buffer first.
        if self.filled < self.pending.len() {
            let n = input.len().min(self.pending.len() - self.filled);
            self.pending[self.filled..self.filled + n].copy_from_slice(&input[..n]);
            self.filled += n;
            input = &input[n..];
            if input.is_empty() {
                return Ok(buf.len());
            }
        }

        // The pending buffer is full here. The oldest `m` pending bytes can
        // go out, and the last `m` input bytes replace them.
        let m = input.len().min(self.pending.len());
        self.inner.write_all(&self.pending[..m])?;
        self.pending.copy_within(m.., 0);
        let keep = self.pending.len() - m;
        self.pending[keep..].copy_from_slice(&input[input.len() - m..]);
        self.inner.write_all(&input[..input.len() - m])?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
