//! Reuse pool for stateless-mode compressors and decompressors
//!
//! Without context takeover every message gets its own deflate stream, so the
//! only thing worth keeping between messages is the allocation. Entries are
//! reset before they go back into the pool.

use crate::level::CompressionLevel;
use flate2::{Compress, Decompress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Idle entries kept per level when no explicit limit is configured
pub const DEFAULT_IDLE_LIMIT: usize = 64;

static GLOBAL_POOL: OnceLock<Arc<CodecPool>> = OnceLock::new();

/// A pool of raw deflate compressors keyed by level, plus raw inflaters
#[derive(Debug)]
pub struct CodecPool {
    deflaters: Mutex<HashMap<CompressionLevel, Vec<Compress>>>,
    inflaters: Mutex<Vec<Decompress>>,
    idle_limit: usize,
}

impl CodecPool {
    /// Create a pool keeping at most `idle_limit` idle entries per key
    pub fn new(idle_limit: usize) -> Self {
        Self {
            deflaters: Mutex::new(HashMap::new()),
            inflaters: Mutex::new(Vec::new()),
            idle_limit,
        }
    }

    /// The process-wide pool shared by connections that don't bring their own
    pub fn global() -> Arc<CodecPool> {
        GLOBAL_POOL
            .get_or_init(|| Arc::new(CodecPool::new(DEFAULT_IDLE_LIMIT)))
            .clone()
    }

    /// Take a compressor for `level`, allocating one if none is idle
    pub fn take_compressor(&self, level: CompressionLevel) -> Compress {
        lock(&self.deflaters)
            .get_mut(&level)
            .and_then(Vec::pop)
            .unwrap_or_else(|| Compress::new(level.to_flate2(), false))
    }

    /// Reset a compressor and keep it for the next message at `level`
    pub fn put_compressor(&self, level: CompressionLevel, mut compress: Compress) {
        compress.reset();
        let mut deflaters = lock(&self.deflaters);
        let idle = deflaters.entry(level).or_default();
        if idle.len() < self.idle_limit {
            idle.push(compress);
        }
    }

    /// Take a raw inflater, allocating one if none is idle
    pub fn take_decompressor(&self) -> Decompress {
        lock(&self.inflaters)
            .pop()
            .unwrap_or_else(|| Decompress::new(false))
    }

    /// Reset an inflater and keep it for the next message
    pub fn put_decompressor(&self, mut decompress: Decompress) {
        decompress.reset(false);
        let mut inflaters = lock(&self.inflaters);
        if inflaters.len() < self.idle_limit {
            inflaters.push(decompress);
        }
    }

    /// Number of idle compressors for `level`
    pub fn idle_compressors(&self, level: CompressionLevel) -> usize {
        lock(&self.deflaters).get(&level).map_or(0, Vec::len)
    }

    /// Number of idle inflaters
    pub fn idle_decompressors(&self) -> usize {
        lock(&self.inflaters).len()
    }
}

impl Default for CodecPool {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_LIMIT)
    }
}

// A panic while holding the lock can't leave a pooled entry half-reset:
// entries are reset before the lock is taken.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
