// src/engine/pipeline.rs
//
// Pixel work for commit(): crop extraction and the crop+scale pass.
// Geometry is decided by the planner; nothing here chooses sizes.
//
// crop_and_resize() never copies the crop out first. fir resamples through
// a view of the region, so only the target buffer is allocated and no pixel
// outside the region contributes. If fir rejects the input, the image crate
// resamples instead.

use crate::engine::limits;
use crate::ops::{CropRegion, ImageSize};
use fast_image_resize::{self as fir, ImageBufferError, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("region {region:?} exceeds {width}x{height} source")]
    OutOfBounds {
        region: CropRegion,
        width: u32,
        height: u32,
    },

    #[error("target {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },

    #[error("target {width}x{height} exceeds output limits")]
    TargetTooLarge { width: u32, height: u32 },

    #[error("source buffer rejected: {0}")]
    Buffer(#[from] ImageBufferError),

    #[error("region view rejected: {0}")]
    View(#[from] fir::CropBoxError),

    #[error("resample failed: {0}")]
    Resample(#[from] fir::ResizeError),

    #[error("resampled buffer does not fill {width}x{height}")]
    Output { width: u32, height: u32 },
}

impl ResizeError {
    /// Only an oversized target is a resource problem; the rest are bugs
    /// in the caller's geometry.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::TargetTooLarge { .. })
    }
}

fn check_region(img: &DynamicImage, region: &CropRegion) -> Result<(), ResizeError> {
    if region.fits_within(img.width(), img.height()) {
        Ok(())
    } else {
        Err(ResizeError::OutOfBounds {
            region: *region,
            width: img.width(),
            height: img.height(),
        })
    }
}

fn check_target(target: ImageSize) -> Result<(), ResizeError> {
    let (width, height) = target.dimensions();
    if width == 0 || height == 0 {
        return Err(ResizeError::EmptyTarget { width, height });
    }
    limits::enforce_output_size(target).map_err(|_| ResizeError::TargetTooLarge { width, height })
}

/// Copy `region` out of `img`. The source is left untouched.
pub fn crop_region(img: &DynamicImage, region: &CropRegion) -> Result<DynamicImage, ResizeError> {
    check_region(img, region)?;
    Ok(img.crop_imm(region.x, region.y, region.size.width, region.size.height))
}

/// Resample `region` of `img` to `target` in one pass.
pub fn crop_and_resize(
    img: &DynamicImage,
    region: &CropRegion,
    target: ImageSize,
) -> Result<DynamicImage, ResizeError> {
    check_region(img, region)?;
    check_target(target)?;
    if region.size.dimensions() == target.dimensions() {
        return Ok(img.crop_imm(region.x, region.y, target.width, target.height));
    }
    debug!(?region, to_w = target.width, to_h = target.height, "resizing");

    match resample(img, region, target) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            debug!(error = %err, "fir resize failed, using image crate fallback");
            Ok(img
                .crop_imm(region.x, region.y, region.size.width, region.size.height)
                .resize_exact(target.width, target.height, FilterType::Lanczos3))
        }
    }
}

/// Lanczos3 through fir, reading RGB8/RGBA8 buffers in place. Other layouts
/// are widened to RGBA8 first.
fn resample(
    img: &DynamicImage,
    region: &CropRegion,
    target: ImageSize,
) -> Result<DynamicImage, ResizeError> {
    let widened;
    let (pixel_type, pixels): (PixelType, &[u8]) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.as_raw().as_slice()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.as_raw().as_slice()),
        other => {
            widened = other.to_rgba8();
            (PixelType::U8x4, widened.as_raw().as_slice())
        }
    };

    let src = fir::images::ImageRef::new(img.width(), img.height(), pixels, pixel_type)?;
    let view = fir::images::CroppedImage::new(
        &src,
        region.x,
        region.y,
        region.size.width,
        region.size.height,
    )?;
    let mut dst = fir::images::Image::new(target.width, target.height, pixel_type);
    let options =
        ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    // fir premultiplies alpha itself when the pixel type carries one.
    fir::Resizer::new().resize(&view, &mut dst, &options)?;

    let (width, height) = target.dimensions();
    let out = dst.into_vec();
    let resized = match pixel_type {
        PixelType::U8x3 => RgbImage::from_raw(width, height, out).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(width, height, out).map(DynamicImage::ImageRgba8),
    };
    resized.ok_or(ResizeError::Output { width, height })
}
