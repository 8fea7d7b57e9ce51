// src/engine/planner.rs
//
// Transform planning: crop rectangles and resize targets from high-level
// requests. Pure arithmetic, no pixels and no I/O.
//
// Ordering rule: resize targets are computed against the staged crop when
// there is one, never against the natural size. plan() is the only place
// geometry is finalized, so the rule holds whatever order the requests
// were staged in.

use crate::error::{CropAxis, Result, StagedImageError};
use crate::ops::{
    CropAlign, CropRegion, Geometry, HorizontalAlign, ImageSize, ResizeRequest, VerticalAlign,
};

pub const CROP_SIGNATURE: &str = "crop(aspect: f64 > 0, align: CropAlign)";
pub const SCALE_SIGNATURE: &str = "scale(percent: f64 > 0)";
pub const RESIZE_SIGNATURE: &str = "resize(width: u32 >= 1, height: u32 >= 1)";
pub const RESIZE_BY_WIDTH_SIGNATURE: &str = "resize_by_width(width: u32 >= 1)";
pub const RESIZE_BY_HEIGHT_SIGNATURE: &str = "resize_by_height(height: u32 >= 1)";

/// Crop `natural` to `target_aspect`.
///
/// Returns `Ok(None)` when the aspects are exactly equal. The returned
/// region's aspect comes from its integer dimensions, which can differ
/// slightly from `target_aspect` after truncation.
pub fn crop_by_aspect(
    natural: ImageSize,
    target_aspect: f64,
    align: CropAlign,
) -> Result<Option<CropRegion>> {
    if !(target_aspect.is_finite() && target_aspect > 0.0) {
        return Err(StagedImageError::usage(CROP_SIGNATURE));
    }
    if natural.width == 0 || natural.height == 0 {
        return Ok(None);
    }

    if natural.aspect > target_aspect {
        // Wider than the target: keep full height, narrow the width.
        let horizontal = match align {
            CropAlign::None | CropAlign::Vertical(VerticalAlign::None) => HorizontalAlign::None,
            CropAlign::Horizontal(h) => h,
            CropAlign::Vertical(_) => {
                return Err(StagedImageError::alignment_mismatch(CropAxis::Horizontal))
            }
        };
        let width = ((natural.height as f64 * target_aspect) as u32).clamp(1, natural.width);
        let slack = natural.width - width;
        let x = match horizontal {
            HorizontalAlign::None | HorizontalAlign::Left => 0,
            HorizontalAlign::Center => slack / 2,
            HorizontalAlign::Right => slack,
        };
        Ok(Some(CropRegion::new(x, 0, width, natural.height)))
    } else if natural.aspect < target_aspect {
        // Taller than the target: keep full width, shorten the height.
        let vertical = match align {
            CropAlign::None | CropAlign::Horizontal(HorizontalAlign::None) => VerticalAlign::None,
            CropAlign::Vertical(v) => v,
            CropAlign::Horizontal(_) => {
                return Err(StagedImageError::alignment_mismatch(CropAxis::Vertical))
            }
        };
        let height = ((natural.width as f64 / target_aspect) as u32).clamp(1, natural.height);
        let slack = natural.height - height;
        let y = match vertical {
            VerticalAlign::None | VerticalAlign::Top => 0,
            VerticalAlign::Middle => slack / 2,
            VerticalAlign::Bottom => slack,
        };
        Ok(Some(CropRegion::new(0, y, natural.width, height)))
    } else {
        Ok(None)
    }
}

/// Scale `base` by `percent`, flooring each dimension on its own.
pub fn scale_by_percent(base: ImageSize, percent: f64) -> Result<ImageSize> {
    if !(percent.is_finite() && percent > 0.0) {
        return Err(StagedImageError::usage(SCALE_SIGNATURE));
    }
    Ok(scaled(base, percent))
}

/// Resize to exactly `width` x `height`; `None` when that is already `base`.
pub fn resize_exact(base: ImageSize, width: u32, height: u32) -> Result<Option<ImageSize>> {
    if width < 1 || height < 1 {
        return Err(StagedImageError::usage(RESIZE_SIGNATURE));
    }
    Ok(exact(base, width, height))
}

/// Resize to `width`, height following `base.aspect`; `None` when the
/// width already matches.
pub fn resize_by_width(base: ImageSize, width: u32) -> Result<Option<ImageSize>> {
    if width < 1 {
        return Err(StagedImageError::usage(RESIZE_BY_WIDTH_SIGNATURE));
    }
    Ok(by_width(base, width))
}

/// Resize to `height`, width following `base.aspect`; `None` when the
/// height already matches.
pub fn resize_by_height(base: ImageSize, height: u32) -> Result<Option<ImageSize>> {
    if height < 1 {
        return Err(StagedImageError::usage(RESIZE_BY_HEIGHT_SIGNATURE));
    }
    Ok(by_height(base, height))
}

/// Validate `request` and evaluate it against `base`.
pub fn resize_target(base: ImageSize, request: ResizeRequest) -> Result<Option<ImageSize>> {
    match request {
        ResizeRequest::Scale { percent } => scale_by_percent(base, percent).map(Some),
        ResizeRequest::Exact { width, height } => resize_exact(base, width, height),
        ResizeRequest::ByWidth { width } => resize_by_width(base, width),
        ResizeRequest::ByHeight { height } => resize_by_height(base, height),
    }
}

/// Size the resize step starts from: the crop when staged, else natural.
pub fn resize_base(natural: ImageSize, crop: Option<&CropRegion>) -> ImageSize {
    crop.map(|region| region.size).unwrap_or(natural)
}

/// Final geometry for a commit. Crop first, then the resize request
/// evaluated against the crop.
///
/// Requests are validated when staged, so evaluation here cannot fail.
pub fn plan(
    natural: ImageSize,
    crop: Option<CropRegion>,
    resize: Option<ResizeRequest>,
) -> Geometry {
    let base = resize_base(natural, crop.as_ref());
    let resize = resize.and_then(|request| evaluate(base, request));
    Geometry { crop, resize }
}

fn evaluate(base: ImageSize, request: ResizeRequest) -> Option<ImageSize> {
    match request {
        ResizeRequest::Scale { percent } => Some(scaled(base, percent)),
        ResizeRequest::Exact { width, height } => exact(base, width, height),
        ResizeRequest::ByWidth { width } => by_width(base, width),
        ResizeRequest::ByHeight { height } => by_height(base, height),
    }
}

fn scaled(base: ImageSize, percent: f64) -> ImageSize {
    let width = (base.width as f64 * percent / 100.0).floor() as u32;
    let height = (base.height as f64 * percent / 100.0).floor() as u32;
    // A zero-sized target cannot be materialized.
    ImageSize::new(width.max(1), height.max(1))
}

fn exact(base: ImageSize, width: u32, height: u32) -> Option<ImageSize> {
    if (width, height) == base.dimensions() {
        return None;
    }
    Some(ImageSize::new(width, height))
}

fn by_width(base: ImageSize, width: u32) -> Option<ImageSize> {
    if width == base.width || base.aspect <= 0.0 {
        return None;
    }
    let height = (width as f64 / base.aspect).round() as u32;
    Some(ImageSize::new(width, height.max(1)))
}

fn by_height(base: ImageSize, height: u32) -> Option<ImageSize> {
    if height == base.height || base.aspect <= 0.0 {
        return None;
    }
    let width = (height as f64 * base.aspect).round() as u32;
    Some(ImageSize::new(width.max(1), height))
}
