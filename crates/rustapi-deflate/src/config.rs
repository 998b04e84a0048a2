//! Per-connection compression configuration
//!
//! [`DeflateSettings`] is the negotiated surface handed over by the
//! handshake (or loaded from the environment). [`CompressionConfig`] is what
//! a connection owns: the write-compression toggle, the validated level and
//! the writer/reader factories selected once for the connection's lifetime.

use crate::error::ConfigError;
use crate::level::CompressionLevel;
use crate::pool::CodecPool;
use crate::reader::ReaderFactory;
use crate::writer::WriterFactory;
use serde::Deserialize;
use std::sync::Arc;

/// Negotiated permessage-deflate parameters
///
/// # Example
///
/// ```rust,ignore
/// use rustapi_deflate::DeflateSettings;
///
/// // WS_DEFLATE_ENABLED=true WS_DEFLATE_CONTEXT_TAKEOVER=true WS_DEFLATE_LEVEL=6
/// let settings = DeflateSettings::from_env()?;
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeflateSettings {
    /// Whether the extension was negotiated
    pub enabled: bool,
    /// Whether compression context is kept between messages
    pub context_takeover: bool,
    /// Compression level for outgoing messages
    pub level: CompressionLevel,
    /// Idle entries kept by a private codec pool; `None` uses the global pool
    pub pool_idle_limit: Option<usize>,
}

impl Default for DeflateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            context_takeover: false,
            level: CompressionLevel::default(),
            pool_idle_limit: None,
        }
    }
}

impl DeflateSettings {
    /// Create settings with compression disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from `WS_DEFLATE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_prefixed("WS_DEFLATE")
    }

    /// Load settings from `{prefix}_*` environment variables
    pub fn from_env_prefixed(prefix: &str) -> Result<Self, ConfigError> {
        envy::prefixed(format!("{}_", prefix))
            .from_env::<Self>()
            .map_err(ConfigError::from)
    }

    /// Enable or disable the extension
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Keep compression context between messages
    pub fn context_takeover(mut self, context_takeover: bool) -> Self {
        self.context_takeover = context_takeover;
        self
    }

    /// Set the compression level
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Use a private codec pool keeping at most `limit` idle entries
    pub fn pool_idle_limit(mut self, limit: usize) -> Self {
        self.pool_idle_limit = Some(limit);
        self
    }
}

/// Compression state owned by one connection
#[derive(Debug)]
pub struct CompressionConfig {
    enabled: bool,
    level: CompressionLevel,
    context_takeover: bool,
    writer: Option<WriterFactory>,
    reader: Option<ReaderFactory>,
}

impl CompressionConfig {
    /// Configuration for a connection that did not negotiate compression
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            level: CompressionLevel::default(),
            context_takeover: false,
            writer: None,
            reader: None,
        }
    }

    /// Configuration for a connection that negotiated compression.
    ///
    /// Write compression starts enabled.
    pub fn negotiated(context_takeover: bool, level: CompressionLevel) -> Self {
        Self::with_pool(context_takeover, level, CodecPool::global())
    }

    fn with_pool(context_takeover: bool, level: CompressionLevel, pool: Arc<CodecPool>) -> Self {
        let (writer, reader) = if context_takeover {
            (
                WriterFactory::context_takeover(level),
                ReaderFactory::context_takeover(),
            )
        } else {
            (
                WriterFactory::with_pool(pool.clone()),
                ReaderFactory::with_pool(pool),
            )
        };
        tracing::debug!(context_takeover, %level, "permessage-deflate configured");

        Self {
            enabled: true,
            level,
            context_takeover,
            writer: Some(writer),
            reader: Some(reader),
        }
    }

    /// Build from negotiated settings
    pub fn from_settings(settings: &DeflateSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        let pool = match settings.pool_idle_limit {
            Some(limit) => Arc::new(CodecPool::new(limit)),
            None => CodecPool::global(),
        };
        Self::with_pool(settings.context_takeover, settings.level, pool)
    }

    /// Set the level used for subsequent messages.
    ///
    /// Out-of-range values are rejected and leave the current level
    /// untouched. A message already being written keeps its level.
    pub fn set_level(&mut self, level: i32) -> Result<(), ConfigError> {
        let level = CompressionLevel::new(level)?;
        if self.context_takeover && level != self.level {
            tracing::debug!(
                %level,
                "context takeover compressor keeps the level it was negotiated with"
            );
        }
        self.level = level;
        Ok(())
    }

    /// Current compression level
    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Enable or disable compression of outgoing messages.
    ///
    /// Has no effect on what is sent unless compression was negotiated.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the write-compression toggle is on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether compression was negotiated for this connection
    pub fn is_negotiated(&self) -> bool {
        self.writer.is_some()
    }

    /// Whether outgoing messages are compressed by default
    pub fn compresses_writes(&self) -> bool {
        self.enabled && self.is_negotiated()
    }

    /// Whether compression context is kept between messages
    pub fn context_takeover(&self) -> bool {
        self.context_takeover
    }

    /// The send path's writer factory, if compression was negotiated
    pub fn writer_factory_mut(&mut self) -> Option<&mut WriterFactory> {
        self.writer.as_mut()
    }

    /// The receive path's reader factory, if compression was negotiated
    pub fn reader_factory_mut(&mut self) -> Option<&mut ReaderFactory> {
        self.reader.as_mut()
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
