//! Compression level handling
//!
//! Levels follow the deflate convention: `0` stores, `1` is fastest and `9`
//! compresses best. `-1` is a sentinel for the backend's default level.

use crate::error::ConfigError;
use flate2::Compression;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Smallest accepted compression level (the "backend default" sentinel)
pub const MIN_COMPRESSION_LEVEL: i32 = -1;

/// Largest accepted compression level
pub const MAX_COMPRESSION_LEVEL: i32 = 9;

/// Level used when nothing else is configured
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 1;

/// A compression level that has already passed range validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    /// Validate a raw level
    pub fn new(level: i32) -> Result<Self, ConfigError> {
        if (MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&level) {
            Ok(Self(level))
        } else {
            Err(ConfigError::invalid_level(level))
        }
    }

    /// The raw level value
    pub fn get(self) -> i32 {
        self.0
    }

    /// Convert to the level understood by `flate2`
    pub fn to_flate2(self) -> Compression {
        match u32::try_from(self.0) {
            Ok(level) => Compression::new(level),
            Err(_) => Compression::default(),
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl TryFrom<i32> for CompressionLevel {
    type Error = ConfigError;

    fn try_from(level: i32) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<CompressionLevel> for i32 {
    fn from(level: CompressionLevel) -> Self {
        level.0
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for CompressionLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i32::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_level_bounds() {
        for level in [MIN_COMPRESSION_LEVEL - 1, MAX_COMPRESSION_LEVEL + 1] {
            assert!(CompressionLevel::new(level).is_err(), "accepted {level}");
        }
        for level in [MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL] {
            assert_eq!(CompressionLevel::new(level).unwrap().get(), level);
        }
    }

    #[test]
    fn test_default_sentinel_maps_to_backend_default() {
        let level = CompressionLevel::new(-1).unwrap();
        assert_eq!(level.to_flate2(), Compression::default());
        assert_eq!(CompressionLevel::new(9).unwrap().to_flate2(), Compression::best());
    }

    #[test]
    fn test_deserialize_rejects_out_of_range() {
        let ok: CompressionLevel = serde_json::from_str("4").unwrap();
        assert_eq!(ok.get(), 4);
        assert!(serde_json::from_str::<CompressionLevel>("10").is_err());
    }

    proptest! {
        #[test]
        fn test_level_validation_matches_range(level in -100i32..100) {
            let in_range = (MIN_COMPRESSION_LEVEL..=MAX_COMPRESSION_LEVEL).contains(&level);
            prop_assert_eq!(CompressionLevel::new(level).is_ok(), in_range);
        }
    }
}
