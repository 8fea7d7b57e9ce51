// src/ops.rs
//
// Staged geometry.
// These are cheap to create and store - the pixel work happens in commit().

/// Width, height and their ratio.
///
/// `aspect` is always `width / height`; it is 0.0 for a degenerate size
/// with zero height so that reading it never divides by zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    pub aspect: f64,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        let aspect = if height == 0 {
            0.0
        } else {
            width as f64 / height as f64
        };
        Self {
            width,
            height,
            aspect,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// A rectangle in natural-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub size: ImageSize,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            size: ImageSize::new(width, height),
        }
    }

    /// Region covering a whole image of `size`
    pub fn whole(size: ImageSize) -> Self {
        Self { x: 0, y: 0, size }
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x as u64 + self.size.width as u64 <= width as u64
            && self.y as u64 + self.size.height as u64 <= height as u64
    }
}

/// Offset of a narrowed crop, used when the image is wider than the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HorizontalAlign {
    #[default]
    None,
    Left,
    Center,
    Right,
}

/// Offset of a shortened crop, used when the image is taller than the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerticalAlign {
    #[default]
    None,
    Top,
    Middle,
    Bottom,
}

/// Alignment passed to `crop`.
///
/// Which axis applies depends on whether the image is wider or taller than
/// the requested aspect, so the caller must know the image's aspect to pick
/// the right variant. Passing the other axis is rejected rather than
/// reinterpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CropAlign {
    #[default]
    None,
    Horizontal(HorizontalAlign),
    Vertical(VerticalAlign),
}

impl From<HorizontalAlign> for CropAlign {
    fn from(align: HorizontalAlign) -> Self {
        CropAlign::Horizontal(align)
    }
}

impl From<VerticalAlign> for CropAlign {
    fn from(align: VerticalAlign) -> Self {
        CropAlign::Vertical(align)
    }
}

/// A resize request as the caller issued it.
///
/// The target size is derived from the request each time geometry is
/// planned, so it always follows the currently staged crop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeRequest {
    /// Percentage of the base size, each dimension floored independently
    Scale { percent: f64 },
    /// Fixed width and height
    Exact { width: u32, height: u32 },
    /// Fixed width, height follows the base aspect
    ByWidth { width: u32 },
    /// Fixed height, width follows the base aspect
    ByHeight { height: u32 },
}

/// Final geometry handed to the image library at commit time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    pub crop: Option<CropRegion>,
    pub resize: Option<ImageSize>,
}

impl Geometry {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && self.resize.is_none()
    }
}

/// Save-time attributes for the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveAttributes<'a> {
    /// 0-100, only lossy encoders use it
    pub quality: u8,
    /// Explicit target format; overrides the destination extension
    pub format: Option<&'a str>,
    /// Format detected at load, used when nothing else names one
    pub source_format: &'a str,
}
