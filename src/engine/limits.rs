// src/engine/limits.rs
//
// Load-time configuration: decode limits and the accepted-format whitelist.
// Commit-time output caps live here too.

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ErrorKind;
use crate::ops::ImageSize;

const STRICT_MAX_DIMENSION: u32 = 16384;
const STRICT_MAX_PIXELS: u64 = 40_000_000; // ~8K x 5K
const STRICT_MAX_BYTES: u64 = 32 * 1024 * 1024; // 32MB input cap
const LENIENT_MAX_PIXELS: u64 = 75_000_000;
const LENIENT_MAX_BYTES: u64 = 48 * 1024 * 1024; // 48MB input cap

/// Upper bounds checked against a file before its pixels are decoded.
///
/// Exceeding any of them fails the load with `OUT_OF_MEMORY`, the same kind
/// the decoder would report had it tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_dimension: Option<u32>,
    pub max_pixels: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self::standard()
    }
}

impl DecodeLimits {
    pub fn standard() -> Self {
        Self {
            max_dimension: Some(MAX_DIMENSION),
            max_pixels: Some(MAX_PIXELS),
            max_bytes: None,
        }
    }

    pub fn strict() -> Self {
        Self {
            max_dimension: Some(STRICT_MAX_DIMENSION),
            max_pixels: Some(STRICT_MAX_PIXELS),
            max_bytes: Some(STRICT_MAX_BYTES),
        }
    }

    pub fn lenient() -> Self {
        Self {
            max_dimension: Some(MAX_DIMENSION),
            max_pixels: Some(LENIENT_MAX_PIXELS),
            max_bytes: Some(LENIENT_MAX_BYTES),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_dimension: None,
            max_pixels: None,
            max_bytes: None,
        }
    }

    pub fn enforce_source_len(&self, len: u64) -> Result<(), ErrorKind> {
        match self.max_bytes {
            Some(limit) if len > limit => {
                tracing::warn!(len, limit, "input exceeds byte limit");
                Err(ErrorKind::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    pub fn enforce_dimensions(&self, width: u32, height: u32) -> Result<(), ErrorKind> {
        if let Some(limit) = self.max_dimension {
            if width > limit || height > limit {
                tracing::warn!(width, height, limit, "image exceeds dimension limit");
                return Err(ErrorKind::OutOfMemory);
            }
        }
        if let Some(limit) = self.max_pixels {
            let pixels = width as u64 * height as u64;
            if pixels > limit {
                tracing::warn!(width, height, pixels, limit, "image exceeds pixel limit");
                return Err(ErrorKind::OutOfMemory);
            }
        }
        Ok(())
    }
}

/// Caps on a resampled output, independent of the limits the source was
/// loaded with. A target beyond them would not fit in memory.
pub fn enforce_output_size(target: ImageSize) -> Result<(), ErrorKind> {
    DecodeLimits::standard().enforce_dimensions(target.width, target.height)
}

/// Per-load options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub limits: DecodeLimits,
    /// Lowercase format names a load may produce; `None` accepts any
    pub accepted_formats: Option<Vec<String>>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict loads to `formats` (case-insensitive).
    pub fn accept<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accepted_formats = Some(
            formats
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn accepts(&self, format: &str) -> bool {
        match &self.accepted_formats {
            None => true,
            Some(list) => list.iter().any(|f| f.eq_ignore_ascii_case(format)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_limits_match_engine_caps() {
        let limits = DecodeLimits::default();
        assert_eq!(limits, DecodeLimits::standard());
        assert!(limits.enforce_dimensions(MAX_DIMENSION, 1).is_ok());
        assert_eq!(
            limits.enforce_dimensions(MAX_DIMENSION + 1, 1),
            Err(ErrorKind::OutOfMemory)
        );
        assert!(limits.enforce_source_len(u64::MAX).is_ok());
    }

    #[test]
    fn strict_limits_enforce_pixels_and_bytes() {
        let limits = DecodeLimits::strict();
        assert!(limits.enforce_dimensions(2000, 2000).is_ok());
        assert!(limits.enforce_dimensions(7000, 7000).is_err());
        assert!(limits.enforce_source_len(STRICT_MAX_BYTES).is_ok());
        assert!(limits.enforce_source_len(STRICT_MAX_BYTES + 1).is_err());
    }

    #[test]
    fn unlimited_accepts_everything() {
        let limits = DecodeLimits::unlimited();
        assert!(limits.enforce_dimensions(u32::MAX, u32::MAX).is_ok());
        assert!(limits.enforce_source_len(u64::MAX).is_ok());
    }

    #[test]
    fn output_size_capped_at_engine_limits() {
        assert!(enforce_output_size(ImageSize::new(MAX_DIMENSION, 1)).is_ok());
        assert_eq!(
            enforce_output_size(ImageSize::new(200_000, 200_000)),
            Err(ErrorKind::OutOfMemory)
        );
        // each side fits, the product does not
        assert_eq!(
            enforce_output_size(ImageSize::new(20_000, 20_000)),
            Err(ErrorKind::OutOfMemory)
        );
    }

    #[test]
    fn whitelist_is_case_insensitive() {
        let options = LoadOptions::new().accept(["PNG", "jpeg"]);
        assert!(options.accepts("png"));
        assert!(options.accepts("JPEG"));
        assert!(!options.accepts("webp"));
        assert!(LoadOptions::new().accepts("anything"));
    }
}
