//! Decompressing message readers
//!
//! The sender strips the sync-flush trailer, so once a message's payload is
//! exhausted the reader feeds the decompressor `00 00 FF FF` again, followed
//! by one empty stored block:
//!
//! - final (`01 00 00 FF FF`) without context takeover, so a complete message
//!   always ends the deflate stream;
//! - non-final (`00 00 00 FF FF`) with context takeover, so the stream stays
//!   open for the next message.
//!
//! A well-formed payload stops on a block boundary, which makes both tails
//! decode to nothing. Output while decoding the tail, or a stateless stream
//! that never ends, means the payload was cut short or corrupted.

use crate::error::ProtocolError;
use crate::pool::CodecPool;
use flate2::{Decompress, FlushDecompress, Status};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

const INPUT_CHUNK: usize = 4096;

static FINAL_TAIL: [u8; 9] = [0x00, 0x00, 0xff, 0xff, 0x01, 0x00, 0x00, 0xff, 0xff];
static OPEN_TAIL: [u8; 9] = [0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0xff, 0xff];

/// Builds decompressing readers for a connection's receive path.
///
/// Mirrors [`WriterFactory`](crate::WriterFactory): the stateless variant
/// takes a fresh inflater from a [`CodecPool`] per message, the
/// context-takeover variant keeps one inflater for the whole connection.
pub enum ReaderFactory {
    /// Fresh decompression state per message
    NoContextTakeover(Arc<CodecPool>),
    /// One inflater shared by all messages of the connection
    ContextTakeover(ContextTakeoverInflater),
}

impl ReaderFactory {
    /// Stateless factory backed by the global pool
    pub fn no_context_takeover() -> Self {
        Self::NoContextTakeover(CodecPool::global())
    }

    /// Stateless factory backed by a caller-provided pool
    pub fn with_pool(pool: Arc<CodecPool>) -> Self {
        Self::NoContextTakeover(pool)
    }

    /// Context-takeover factory owning a fresh inflater
    pub fn context_takeover() -> Self {
        Self::ContextTakeover(ContextTakeoverInflater::new())
    }

    /// Check if this factory keeps decompression context between messages
    pub fn is_context_takeover(&self) -> bool {
        matches!(self, Self::ContextTakeover(_))
    }

    /// Start decompressing one message read from `source`.
    ///
    /// `source` must yield exactly the compressed payload of one message.
    /// The reader borrows the factory, so messages are read one at a time.
    pub fn new_reader<R: Read>(&mut self, source: R) -> DecompressionReader<'_, R> {
        let (inflater, tail) = match self {
            Self::NoContextTakeover(pool) => (
                Inflater::Pooled {
                    decompress: Some(pool.take_decompressor()),
                    pool: Arc::clone(pool),
                },
                &FINAL_TAIL,
            ),
            Self::ContextTakeover(shared) => (Inflater::Shared(shared), &OPEN_TAIL),
        };
        DecompressionReader {
            inflater,
            source,
            input: vec![0; INPUT_CHUNK].into_boxed_slice(),
            pos: 0,
            len: 0,
            phase: Phase::Payload,
            tail,
            tail_pos: 0,
            finished: false,
        }
    }
}

impl fmt::Debug for ReaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContextTakeover(_) => f.write_str("ReaderFactory::NoContextTakeover"),
            Self::ContextTakeover(_) => f.write_str("ReaderFactory::ContextTakeover"),
        }
    }
}

/// The long-lived inflater of a context-takeover connection
///
/// A message that fails to decompress, or is dropped half-read, leaves the
/// window out of step with the peer. Treat either as fatal for the
/// connection.
#[derive(Debug)]
pub struct ContextTakeoverInflater {
    decompress: Decompress,
}

impl ContextTakeoverInflater {
    /// Create an inflater with an empty window
    pub fn new() -> Self {
        tracing::debug!("creating context takeover decompressor");
        Self {
            decompress: Decompress::new(false),
        }
    }
}

impl Default for ContextTakeoverInflater {
    fn default() -> Self {
        Self::new()
    }
}

enum Inflater<'a> {
    Pooled {
        decompress: Option<Decompress>,
        pool: Arc<CodecPool>,
    },
    Shared(&'a mut ContextTakeoverInflater),
}

impl Inflater<'_> {
    fn decompress_mut(&mut self) -> io::Result<&mut Decompress> {
        match self {
            Self::Pooled { decompress, .. } => decompress
                .as_mut()
                .ok_or_else(|| io::Error::other("decompression reader already finished")),
            Self::Shared(shared) => Ok(&mut shared.decompress),
        }
    }

    fn requires_stream_end(&self) -> bool {
        matches!(self, Self::Pooled { .. })
    }

    fn release(&mut self, stream_ended: bool) {
        match self {
            Self::Pooled { decompress, pool } => {
                if let Some(decompress) = decompress.take() {
                    pool.put_decompressor(decompress);
                }
            }
            // A final block ends the deflate stream; the next message starts
            // a new one.
            Self::Shared(shared) if stream_ended => shared.decompress.reset(false),
            Self::Shared(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Feeding the message payload
    Payload,
    /// Payload exhausted, collecting output still buffered in the inflater
    Drain,
    /// Feeding the re-appended trailer and empty block
    Tail,
}

/// A decompressing source for a single message.
///
/// Yields the decompressed payload and then `Ok(0)` for every later read.
/// Corrupt or truncated input surfaces as an [`io::ErrorKind::InvalidData`]
/// error wrapping [`ProtocolError::MalformedCompressedData`].
pub struct DecompressionReader<'a, R> {
    inflater: Inflater<'a>,
    source: R,
    input: Box<[u8]>,
    pos: usize,
    len: usize,
    phase: Phase,
    tail: &'static [u8],
    tail_pos: usize,
    finished: bool,
}

impl<R: Read> DecompressionReader<'_, R> {
    /// Check if the whole message has been decompressed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, stream_ended: bool) {
        self.finished = true;
        self.inflater.release(stream_ended);
    }
}

impl<R: Read> Read for DecompressionReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }

        loop {
            if self.phase == Phase::Payload && self.pos == self.len {
                let n = self.source.read(&mut self.input)?;
                self.pos = 0;
                self.len = n;
                if n == 0 {
                    self.phase = Phase::Drain;
                }
            }

            let input: &[u8] = match self.phase {
                Phase::Payload => &self.input[self.pos..self.len],
                Phase::Drain => &[],
                Phase::Tail => &self.tail[self.tail_pos..],
            };

            let decompress = self.inflater.decompress_mut()?;
            let before_in = decompress.total_in();
            let before_out = decompress.total_out();

            let status = decompress
                .decompress(input, out, FlushDecompress::None)
                .map_err(|err| malformed(err.to_string()))?;

            let consumed = (decompress.total_in() - before_in) as usize;
            let produced = (decompress.total_out() - before_out) as usize;

            match self.phase {
                Phase::Payload => self.pos += consumed,
                Phase::Drain => {}
                Phase::Tail => self.tail_pos += consumed,
            }

            if self.phase == Phase::Tail && produced > 0 {
                return Err(malformed("message does not end on a block boundary"));
            }
            if status == Status::StreamEnd {
                self.finish(true);
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }

            match self.phase {
                Phase::Payload if consumed == 0 && self.pos < self.len => {
                    return Err(malformed("decompressor made no progress"));
                }
                Phase::Payload => {}
                Phase::Drain => self.phase = Phase::Tail,
                Phase::Tail if self.tail_pos == self.tail.len() => {
                    if self.inflater.requires_stream_end() {
                        return Err(malformed("unexpected end of compressed data"));
                    }
                    self.finish(false);
                    return Ok(0);
                }
                Phase::Tail if consumed == 0 => {
                    return Err(malformed("decompressor made no progress"));
                }
                Phase::Tail => {}
            }
        }
    }
}

fn malformed(msg: impl Into<String>) -> io::Error {
    ProtocolError::MalformedCompressedData(msg.into()).into_io()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::CompressionLevel;
    use crate::trailer::{PayloadSink, SYNC_FLUSH_MARKER};
    use crate::writer::WriterFactory;
    use crate::DeflateError;
    use proptest::prelude::*;
    use std::io::Write;

    fn level(n: i32) -> CompressionLevel {
        CompressionLevel::new(n).unwrap()
    }

    fn compress(factory: &mut WriterFactory, payload: &[u8], level: CompressionLevel) -> Vec<u8> {
        let mut writer = factory.new_writer(Vec::new(), level);
        writer.write_all(payload).unwrap();
        writer.finish().unwrap()
    }

    fn decompress(factory: &mut ReaderFactory, compressed: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        factory.new_reader(compressed).read_to_end(&mut out)?;
        Ok(out)
    }

    fn text_messages(count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| format!("planet: {i}, country: {i}, city: {i}, street: {i}").into_bytes())
            .collect()
    }

    fn table_rows(seed: usize) -> Vec<u8> {
        (0..400)
            .flat_map(|i| format!("row {i}: {}\n", (i * 7919 + seed) % 1000).into_bytes())
            .collect()
    }

    fn assert_malformed(result: io::Result<Vec<u8>>, cut: usize) {
        let err = match result {
            Ok(out) => panic!("cut {cut}: decoded {} bytes from a truncated message", out.len()),
            Err(err) => err,
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData, "cut {cut}");
        assert!(matches!(
            DeflateError::from(err),
            DeflateError::Protocol(ProtocolError::MalformedCompressedData(_))
        ));
    }

    #[test]
    fn test_truncated_stateless_message_is_malformed() {
        let mut writers = WriterFactory::no_context_takeover();
        let compressed = compress(&mut writers, &table_rows(0), level(6));

        for cut in [1, 3, compressed.len() / 2] {
            let mut readers = ReaderFactory::no_context_takeover();
            let truncated = &compressed[..compressed.len() - cut];
            assert_malformed(decompress(&mut readers, truncated), cut);
        }
    }

    #[test]
    fn test_truncated_context_takeover_message_is_malformed() {
        let mut writers = WriterFactory::context_takeover(level(6));
        let messages: Vec<Vec<u8>> = (0..3).map(|seed| table_rows(seed * 13)).collect();
        let compressed: Vec<Vec<u8>> = messages
            .iter()
            .map(|m| compress(&mut writers, m, level(6)))
            .collect();
        let last = &compressed[2];

        for cut in [1, 3, last.len() / 2] {
            let mut readers = ReaderFactory::context_takeover();
            for (payload, original) in compressed.iter().zip(&messages).take(2) {
                assert_eq!(&decompress(&mut readers, payload).unwrap(), original);
            }
            assert_malformed(decompress(&mut readers, &last[..last.len() - cut]), cut);
        }
    }

    #[test]
    fn test_empty_compressed_payload_is_malformed() {
        let mut readers = ReaderFactory::no_context_takeover();
        assert_malformed(decompress(&mut readers, &[]), 0);
    }

    #[test]
    fn test_final_block_from_peer_is_accepted() {
        // A peer may end the message with a final block instead of a sync
        // flush; the stream is then complete before the tail is fed.
        let mut compress = flate2::Compress::new(flate2::Compression::new(6), false);
        let mut payload = Vec::with_capacity(256);
        compress
            .compress_vec(b"final block", &mut payload, flate2::FlushCompress::Finish)
            .unwrap();

        let mut stateless = ReaderFactory::no_context_takeover();
        assert_eq!(decompress(&mut stateless, &payload).unwrap(), b"final block");

        let mut contextual = ReaderFactory::context_takeover();
        assert_eq!(decompress(&mut contextual, &payload).unwrap(), b"final block");
        assert_eq!(decompress(&mut contextual, &payload).unwrap(), b"final block");
    }

    #[test]
    fn test_stateless_round_trip_empty_payload() {
        let mut writers = WriterFactory::no_context_takeover();
        let mut readers = ReaderFactory::no_context_takeover();

        let compressed = compress(&mut writers, b"", level(1));
        assert!(!compressed.ends_with(&SYNC_FLUSH_MARKER));
        assert_eq!(decompress(&mut readers, &compressed).unwrap(), b"");
    }

    #[test]
    fn test_stateless_messages_are_independent() {
        let mut writers = WriterFactory::no_context_takeover();
        let messages = text_messages(3);

        let first = compress(&mut writers, &messages[1], level(6));
        let _ = compress(&mut writers, &messages[0], level(6));
        let again = compress(&mut writers, &messages[1], level(6));
        assert_eq!(first, again);

        // Each message decodes on a brand-new reader, in any order.
        for msg in messages.iter().rev() {
            let compressed = compress(&mut writers, msg, level(6));
            let mut readers = ReaderFactory::no_context_takeover();
            assert_eq!(&decompress(&mut readers, &compressed).unwrap(), msg);
        }
    }

    #[test]
    fn test_context_takeover_round_trip_in_order() {
        let mut writers = WriterFactory::context_takeover(level(2));
        let mut readers = ReaderFactory::context_takeover();
        let messages = text_messages(50);

        let compressed: Vec<Vec<u8>> = messages
            .iter()
            .map(|m| compress(&mut writers, m, level(2)))
            .collect();
        for (compressed, original) in compressed.iter().zip(&messages) {
            assert!(!compressed.ends_with(&SYNC_FLUSH_MARKER));
            assert_eq!(&decompress(&mut readers, compressed).unwrap(), original);
        }
    }

    #[test]
    fn test_context_takeover_shrinks_repeated_messages() {
        let mut stateless = WriterFactory::no_context_takeover();
        let mut contextual = WriterFactory::context_takeover(level(6));
        let msg = b"the quick brown fox jumps over the lazy dog, again and again".to_vec();

        let _ = compress(&mut contextual, &msg, level(6));
        let second = compress(&mut contextual, &msg, level(6));
        let independent = compress(&mut stateless, &msg, level(6));
        assert!(second.len() < independent.len());
    }

    #[test]
    fn test_context_takeover_requires_prior_messages() {
        let mut writers = WriterFactory::context_takeover(level(6));
        let msg = b"the quick brown fox jumps over the lazy dog, again and again".to_vec();

        let _first = compress(&mut writers, &msg, level(6));
        let second = compress(&mut writers, &msg, level(6));

        // Without the first message the back-references in the second one
        // point at a window the reader never saw.
        let mut readers = ReaderFactory::context_takeover();
        match decompress(&mut readers, &second) {
            Ok(out) => assert_ne!(out, msg),
            Err(err) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
        }
    }

    #[test]
    fn test_context_takeover_out_of_order_fails() {
        let mut writers = WriterFactory::context_takeover(level(6));
        let messages = [
            b"alpha beta gamma delta epsilon zeta eta theta".to_vec(),
            b"alpha beta gamma delta epsilon zeta eta theta iota".to_vec(),
        ];
        let compressed: Vec<Vec<u8>> = messages
            .iter()
            .map(|m| compress(&mut writers, m, level(6)))
            .collect();

        let mut readers = ReaderFactory::context_takeover();
        let first_read = decompress(&mut readers, &compressed[1]);
        let ok = matches!(&first_read, Ok(out) if out == &messages[1]);
        assert!(!ok, "second message decoded without its context");
    }

    #[test]
    fn test_read_past_end_is_clean() {
        let mut writers = WriterFactory::no_context_takeover();
        let mut readers = ReaderFactory::no_context_takeover();
        let compressed = compress(&mut writers, b"hello", level(1));

        let mut reader = readers.new_reader(&compressed[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert!(reader.is_finished());

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_garbage_input_is_malformed() {
        let mut readers = ReaderFactory::no_context_takeover();
        // BTYPE = 11 is reserved.
        let err = decompress(&mut readers, &[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(
            crate::DeflateError::from(err),
            crate::DeflateError::Protocol(ProtocolError::MalformedCompressedData(_))
        ));
    }

    #[test]
    fn test_stateless_reader_returns_inflater_to_pool() {
        let pool = Arc::new(CodecPool::new(4));
        let mut writers = WriterFactory::with_pool(pool.clone());
        let mut readers = ReaderFactory::with_pool(pool.clone());

        let compressed = compress(&mut writers, b"pooled", level(1));
        assert_eq!(pool.idle_compressors(level(1)), 1);
        assert_eq!(decompress(&mut readers, &compressed).unwrap(), b"pooled");
        assert_eq!(pool.idle_decompressors(), 1);
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "frame truncated"))
        }
    }

    #[test]
    fn test_source_error_propagates_unchanged() {
        let mut readers = ReaderFactory::no_context_takeover();
        let err = readers
            .new_reader(BrokenSource)
            .read_to_end(&mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_abandoned_context_writer_resets_window() {
        let mut writers = WriterFactory::context_takeover(level(6));
        let mut readers = ReaderFactory::context_takeover();
        let msg = b"some repeated text, some repeated text".to_vec();

        let first = compress(&mut writers, &msg, level(6));
        assert_eq!(decompress(&mut readers, &first).unwrap(), msg);

        {
            let mut abandoned = writers.new_writer(Vec::new(), level(6));
            abandoned.write_all(b"never sent").unwrap();
        }

        // The next message must not depend on the abandoned bytes.
        let next = compress(&mut writers, &msg, level(6));
        assert_eq!(decompress(&mut readers, &next).unwrap(), msg);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut writers = WriterFactory::no_context_takeover();
        let mut writer = writers.new_writer(Vec::new(), level(1));
        writer.write_all(b"abc").unwrap();
        writer.close().unwrap();
        let len = writer.get_ref().len();
        writer.close().unwrap();
        assert_eq!(writer.get_ref().len(), len);
        assert!(writer.write(b"more").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_stateless_round_trip_any_level(
            payload in proptest::collection::vec(any::<u8>(), 0..20_000),
            raw_level in -1i32..=9,
        ) {
            let mut writers = WriterFactory::no_context_takeover();
            let mut readers = ReaderFactory::no_context_takeover();
            let compressed = compress(&mut writers, &payload, level(raw_level));
            prop_assert!(!compressed.ends_with(&SYNC_FLUSH_MARKER));
            prop_assert_eq!(decompress(&mut readers, &compressed).unwrap(), payload);
        }

        #[test]
        fn test_chunked_writes_round_trip(
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..37,
        ) {
            let mut writers = WriterFactory::no_context_takeover();
            let mut readers = ReaderFactory::no_context_takeover();
            let mut writer = writers.new_writer(Vec::new(), level(1));
            for part in payload.chunks(chunk) {
                writer.write_all(part).unwrap();
            }
            let compressed = writer.finish().unwrap();
            prop_assert_eq!(decompress(&mut readers, &compressed).unwrap(), payload);
        }

        #[test]
        fn test_context_takeover_sequence_round_trip(
            messages in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..512), 1..16),
        ) {
            let mut writers = WriterFactory::context_takeover(level(1));
            let mut readers = ReaderFactory::context_takeover();
            for msg in &messages {
                let compressed = compress(&mut writers, msg, level(1));
                prop_assert_eq!(&decompress(&mut readers, &compressed).unwrap(), msg);
            }
        }
    }
}
