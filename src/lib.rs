// lib.rs
//
// staged-image: a stateful image handle with staged transforms
//
// Design goals:
// - Crop and resize requests are recorded, not applied, until save
// - Resize is always planned against the crop, whatever the call order
// - Every save starts from the same decoded baseline
// - Background load/save with at most one task in flight per handle

// Memory allocator optimization - jemalloc for better performance
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod engine;
pub mod error;
pub mod ops;

use std::path::Path;

pub use engine::{
    DecodeLimits, ExecutorConfig, ImageCrateLibrary, ImageHandle, ImageLibrary, LoadOptions,
    SharedImage, TaskExecutor, TaskId, TaskState,
};
pub use error::{ErrorKind, Result, StagedImageError};
pub use ops::{CropAlign, CropRegion, HorizontalAlign, ImageSize, VerticalAlign};

/// Load `path` synchronously with the default library.
pub fn open(path: impl AsRef<Path>) -> Result<ImageHandle> {
    ImageHandle::open(path)
}

/// Header information returned by [`inspect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Detected format (jpeg, png, webp, gif, etc.)
    pub format: String,
}

/// Read dimensions and format WITHOUT decoding pixels.
///
/// Use this to check dimensions before loading, or to reject images that
/// are too large without paying for a decode.
pub fn inspect(path: impl AsRef<Path>) -> Result<ImageInfo> {
    let path = path.as_ref();
    let (width, height, format) = engine::inspect_path(path)
        .map_err(|kind| StagedImageError::load(path.display().to_string(), kind))?;
    Ok(ImageInfo {
        width,
        height,
        format: engine::format_to_string(format),
    })
}

/// Get library version
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Get supported input formats
pub fn supported_input_formats() -> Vec<String> {
    vec![
        "jpeg".to_string(),
        "jpg".to_string(),
        "png".to_string(),
        "webp".to_string(),
    ]
}

/// Get supported output formats
pub fn supported_output_formats() -> Vec<String> {
    vec![
        "jpeg".to_string(),
        "jpg".to_string(),
        "png".to_string(),
        "webp".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn output_formats_resolve_to_encoders() {
        for name in supported_output_formats() {
            let format = image::ImageFormat::from_extension(&name).unwrap();
            assert!(engine::OUTPUT_FORMATS.contains(&format), "{name}");
        }
    }

    #[test]
    fn inspect_missing_file() {
        let err = inspect("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, StagedImageError::Load { .. }));
    }
}
