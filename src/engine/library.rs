// src/engine/library.rs
//
// The image-library seam. Handles never touch pixels directly; they hand
// final geometry and save attributes to an ImageLibrary, which does the
// decode, crop, scale and encode work.

use crate::engine::decoder;
use crate::engine::encoder;
use crate::engine::limits::DecodeLimits;
use crate::engine::pipeline;
use crate::error::ErrorKind;
use crate::ops::{CropRegion, ImageSize, SaveAttributes};
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, warn};

pub type LibraryResult<T> = std::result::Result<T, ErrorKind>;

/// A freshly decoded image and what was learned while decoding it.
#[derive(Debug)]
pub struct Decoded<I> {
    pub image: I,
    /// Lowercase format name, e.g. "jpeg"
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Capability surface of an image library.
///
/// Derived images returned by `crop` and `crop_scaled` are new resources;
/// the input image is never modified. Every resource obtained from the
/// library goes back through `release` once its owner is done with it.
pub trait ImageLibrary: Send + Sync + 'static {
    type Image: Send + 'static;

    fn decode(&self, path: &Path, limits: &DecodeLimits) -> LibraryResult<Decoded<Self::Image>>;

    fn crop(&self, image: &Self::Image, region: &CropRegion) -> LibraryResult<Self::Image>;

    /// Crop `region` and resample it to `target` in a single pass.
    fn crop_scaled(
        &self,
        image: &Self::Image,
        region: &CropRegion,
        target: ImageSize,
    ) -> LibraryResult<Self::Image>;

    fn encode(
        &self,
        image: &Self::Image,
        path: &Path,
        attrs: &SaveAttributes<'_>,
    ) -> LibraryResult<()>;

    /// Free a resource. Libraries with an image cache evict it here.
    fn release(&self, image: Self::Image) {
        drop(image);
    }
}

/// Library backed by the `image` crate, with SIMD resizing through
/// `fast_image_resize`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateLibrary;

impl ImageLibrary for ImageCrateLibrary {
    type Image = DynamicImage;

    fn decode(&self, path: &Path, limits: &DecodeLimits) -> LibraryResult<Decoded<DynamicImage>> {
        let source = decoder::map_source(path, limits)?;
        let (image, format) = decoder::decode_image(&source, limits)?;
        let decoded = Decoded {
            width: image.width(),
            height: image.height(),
            format: decoder::format_to_string(format),
            image,
        };
        debug!(
            path = %path.display(),
            format = %decoded.format,
            width = decoded.width,
            height = decoded.height,
            "decoded"
        );
        Ok(decoded)
    }

    fn crop(&self, image: &DynamicImage, region: &CropRegion) -> LibraryResult<DynamicImage> {
        pipeline::crop_region(image, region).map_err(|e| {
            warn!(error = %e, "crop failed");
            ErrorKind::Unknown
        })
    }

    fn crop_scaled(
        &self,
        image: &DynamicImage,
        region: &CropRegion,
        target: ImageSize,
    ) -> LibraryResult<DynamicImage> {
        pipeline::crop_and_resize(image, region, target).map_err(|e| {
            warn!(error = %e, "crop+scale failed");
            if e.is_resource_limit() {
                ErrorKind::OutOfMemory
            } else {
                ErrorKind::Unknown
            }
        })
    }

    fn encode(
        &self,
        image: &DynamicImage,
        path: &Path,
        attrs: &SaveAttributes<'_>,
    ) -> LibraryResult<()> {
        let format = encoder::resolve_format(path, attrs)?;
        let data = encoder::encode(image, format, attrs.quality)?;
        encoder::write_atomic(path, &data)
    }
}
