// src/engine/handle.rs
//
// ImageHandle: one loaded image plus its staged crop/resize/format/quality.
//
// Staging calls only record requests. commit() asks the planner for final
// geometry, has the library derive working images from the baseline, and
// encodes the result. The baseline resource is never replaced, so every
// commit starts from the same pixels whether the previous one succeeded or
// failed.

use crate::engine::library::{ImageCrateLibrary, ImageLibrary};
use crate::engine::limits::{self, LoadOptions};
use crate::engine::planner;
use crate::error::{ErrorKind, Result, StagedImageError};
use crate::ops::{CropAlign, CropRegion, Geometry, ImageSize, ResizeRequest, SaveAttributes};
use std::fmt;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

pub const DEFAULT_QUALITY: u8 = 100;
pub const FORMAT_SIGNATURE: &str = "set_format(name: non-empty str)";

pub struct ImageHandle<L: ImageLibrary = ImageCrateLibrary> {
    source_path: PathBuf,
    raw_size: ImageSize,
    crop: Option<CropRegion>,
    resize: Option<ResizeRequest>,
    quality: u8,
    output_format: Option<String>,
    detected_format: String,
    /// Baseline resource. Only `Drop` takes it out.
    image: Option<L::Image>,
    library: Arc<L>,
}

impl ImageHandle<ImageCrateLibrary> {
    /// Load `path` with the default library and options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(Arc::new(ImageCrateLibrary), path, &LoadOptions::default())
    }
}

impl<L: ImageLibrary> ImageHandle<L> {
    /// Load `path` through `library`.
    ///
    /// On failure nothing is retained: a decoded image that fails the
    /// format whitelist is released before the error is returned.
    pub fn open_with(library: Arc<L>, path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |kind: ErrorKind| StagedImageError::load(path.display().to_string(), kind);

        let decoded = library.decode(path, &options.limits).map_err(|kind| {
            warn!(path = %path.display(), %kind, "load failed");
            load_error(kind)
        })?;

        let rejection = if decoded.width == 0 || decoded.height == 0 {
            Some(ErrorKind::NoLoaderForFileFormat)
        } else if !options.accepts(&decoded.format) {
            Some(ErrorKind::FormatUnacceptable)
        } else {
            None
        };
        if let Some(kind) = rejection {
            warn!(path = %path.display(), format = %decoded.format, %kind, "load rejected");
            library.release(decoded.image);
            return Err(load_error(kind));
        }

        debug!(
            path = %path.display(),
            format = %decoded.format,
            width = decoded.width,
            height = decoded.height,
            "image loaded"
        );
        Ok(Self {
            source_path: path.to_path_buf(),
            raw_size: ImageSize::new(decoded.width, decoded.height),
            crop: None,
            resize: None,
            quality: DEFAULT_QUALITY,
            output_format: None,
            detected_format: decoded.format,
            image: Some(decoded.image),
            library,
        })
    }

    // =========================================================================
    // STAGING
    // =========================================================================

    /// Stage a crop to `aspect`. Returns false, and clears any staged crop,
    /// when the image already has exactly that aspect.
    pub fn crop(&mut self, aspect: f64, align: impl Into<CropAlign>) -> Result<bool> {
        let region = planner::crop_by_aspect(self.raw_size, aspect, align.into())?;
        self.crop = region;
        Ok(region.is_some())
    }

    pub fn scale(&mut self, percent: f64) -> Result<()> {
        planner::scale_by_percent(self.resize_base(), percent)?;
        self.resize = Some(ResizeRequest::Scale { percent });
        Ok(())
    }

    /// Stage an exact resize. Asking for the current base size changes
    /// nothing, including any resize already staged.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if planner::resize_exact(self.resize_base(), width, height)?.is_some() {
            self.resize = Some(ResizeRequest::Exact { width, height });
        }
        Ok(())
    }

    pub fn resize_by_width(&mut self, width: u32) -> Result<()> {
        if planner::resize_by_width(self.resize_base(), width)?.is_some() {
            self.resize = Some(ResizeRequest::ByWidth { width });
        }
        Ok(())
    }

    pub fn resize_by_height(&mut self, height: u32) -> Result<()> {
        if planner::resize_by_height(self.resize_base(), height)?.is_some() {
            self.resize = Some(ResizeRequest::ByHeight { height });
        }
        Ok(())
    }

    /// Drop every staged crop and resize.
    pub fn reset(&mut self) {
        self.crop = None;
        self.resize = None;
    }

    /// Set the save format, e.g. "png". Overrides the destination extension.
    pub fn set_format(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(StagedImageError::usage(FORMAT_SIGNATURE));
        }
        self.output_format = Some(name.to_ascii_lowercase());
        Ok(())
    }

    /// Set output quality; saturates into 0..=100.
    pub fn set_quality(&mut self, quality: i32) {
        self.quality = quality.clamp(0, 100) as u8;
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Format detected at load time.
    pub fn format(&self) -> &str {
        &self.detected_format
    }

    pub fn output_format(&self) -> Option<&str> {
        self.output_format.as_deref()
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn raw_size(&self) -> ImageSize {
        self.raw_size
    }

    pub fn raw_width(&self) -> u32 {
        self.raw_size.width
    }

    pub fn raw_height(&self) -> u32 {
        self.raw_size.height
    }

    /// Effective size: resize target if resized, else crop size if cropped,
    /// else the natural size.
    pub fn size(&self) -> ImageSize {
        let geometry = self.geometry();
        geometry
            .resize
            .unwrap_or_else(|| planner::resize_base(self.raw_size, geometry.crop.as_ref()))
    }

    pub fn width(&self) -> u32 {
        self.size().width
    }

    pub fn height(&self) -> u32 {
        self.size().height
    }

    pub fn crop_region(&self) -> Option<CropRegion> {
        self.crop
    }

    pub fn is_cropped(&self) -> bool {
        self.crop.is_some()
    }

    pub fn is_resized(&self) -> bool {
        self.geometry().resize.is_some()
    }

    /// Final geometry as commit() would apply it now.
    pub fn geometry(&self) -> Geometry {
        planner::plan(self.raw_size, self.crop, self.resize)
    }

    pub fn library(&self) -> &Arc<L> {
        &self.library
    }

    fn resize_base(&self) -> ImageSize {
        planner::resize_base(self.raw_size, self.crop.as_ref())
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Apply the staged transforms and write the result to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.commit(path.as_ref())
    }

    /// Crop, then crop+scale the derived image, then encode.
    ///
    /// Working images are released as soon as they are superseded and on
    /// every exit path; the baseline is left as it was.
    pub fn commit(&self, path: &Path) -> Result<()> {
        let save_error = |kind: ErrorKind| {
            warn!(path = %path.display(), %kind, "save failed");
            StagedImageError::save(path.display().to_string(), kind)
        };
        let baseline = self
            .image
            .as_ref()
            .ok_or_else(|| save_error(ErrorKind::Unknown))?;
        let library = self.library.as_ref();
        let geometry = self.geometry();
        debug!(path = %path.display(), ?geometry, "commit");

        let mut working: Option<WorkingImage<'_, L>> = None;

        if let Some(region) = geometry.crop {
            trace!(?region, "crop");
            let cropped = library.crop(baseline, &region).map_err(save_error)?;
            working = Some(WorkingImage::new(library, cropped));
        }

        if let Some(target) = geometry.resize {
            // Any target >= 1x1 stages fine; only materializing it is bounded.
            limits::enforce_output_size(target).map_err(save_error)?;
            // The derived image starts at the origin, so the region is all of it.
            let base = planner::resize_base(self.raw_size, geometry.crop.as_ref());
            let region = CropRegion::whole(base);
            let source = working.as_ref().map_or(baseline, WorkingImage::image);
            trace!(?region, ?target, "crop_scaled");
            let scaled = library
                .crop_scaled(source, &region, target)
                .map_err(save_error)?;
            working = Some(WorkingImage::new(library, scaled));
        }

        let current = working.as_ref().map_or(baseline, WorkingImage::image);
        let attrs = SaveAttributes {
            quality: self.quality,
            format: self.output_format.as_deref(),
            source_format: &self.detected_format,
        };
        trace!(quality = attrs.quality, format = ?attrs.format, "encode");
        library.encode(current, path, &attrs).map_err(save_error)?;

        debug!(path = %path.display(), "commit finished");
        Ok(())
    }
}

impl<L: ImageLibrary> Drop for ImageHandle<L> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            self.library.release(image);
        }
    }
}

impl<L: ImageLibrary> fmt::Debug for ImageHandle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("source_path", &self.source_path)
            .field("raw_size", &self.raw_size)
            .field("crop", &self.crop)
            .field("resize", &self.resize)
            .field("quality", &self.quality)
            .field("output_format", &self.output_format)
            .field("detected_format", &self.detected_format)
            .finish_non_exhaustive()
    }
}

/// A derived resource released back to the library when dropped.
struct WorkingImage<'a, L: ImageLibrary> {
    library: &'a L,
    image: ManuallyDrop<L::Image>,
}

impl<'a, L: ImageLibrary> WorkingImage<'a, L> {
    fn new(library: &'a L, image: L::Image) -> Self {
        Self {
            library,
            image: ManuallyDrop::new(image),
        }
    }

    fn image(&self) -> &L::Image {
        &self.image
    }
}

impl<L: ImageLibrary> Drop for WorkingImage<'_, L> {
    fn drop(&mut self) {
        // SAFETY: `image` is taken exactly once, here, and never touched again.
        let image = unsafe { ManuallyDrop::take(&mut self.image) };
        self.library.release(image);
    }
}

// =============================================================================
// SHARED HANDLE
// =============================================================================

/// A handle shared between the caller and background tasks.
///
/// The mutex is the handle's exclusivity lock: background saves hold it
/// for the whole commit, so at most one load or save runs per handle.
/// Staging through a `SharedImage` while a save is queued is allowed but
/// takes effect only for saves that have not yet started.
pub struct SharedImage<L: ImageLibrary = ImageCrateLibrary> {
    inner: Arc<Mutex<ImageHandle<L>>>,
}

impl<L: ImageLibrary> Clone for SharedImage<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ImageLibrary> From<ImageHandle<L>> for SharedImage<L> {
    fn from(handle: ImageHandle<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(handle)),
        }
    }
}

impl<L: ImageLibrary> SharedImage<L> {
    pub fn new(handle: ImageHandle<L>) -> Self {
        handle.into()
    }

    /// Run `f` with the handle locked. A lock poisoned by an earlier panic
    /// is recovered: the handle's state is only ever replaced wholesale.
    pub fn with<R>(&self, f: impl FnOnce(&mut ImageHandle<L>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Take the exclusivity lock for a background task. A poisoned lock is
    /// reported as `LockAcquire` and then cleared so later tasks can run.
    pub(crate) fn acquire(&self) -> Result<MutexGuard<'_, ImageHandle<L>>> {
        match self.inner.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                drop(poisoned);
                self.inner.clear_poison();
                Err(StagedImageError::lock_acquire(
                    "image lock poisoned by a panicked holder",
                ))
            }
        }
    }

    /// Number of live references, including ones pinned by queued tasks.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Unwrap the handle if this is the last reference.
    pub fn try_unwrap(self) -> std::result::Result<ImageHandle<L>, Self> {
        Arc::try_unwrap(self.inner)
            .map(|mutex| mutex.into_inner().unwrap_or_else(PoisonError::into_inner))
            .map_err(|inner| Self { inner })
    }

    pub fn crop(&self, aspect: f64, align: impl Into<CropAlign>) -> Result<bool> {
        self.with(|h| h.crop(aspect, align))
    }

    pub fn scale(&self, percent: f64) -> Result<()> {
        self.with(|h| h.scale(percent))
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.with(|h| h.resize(width, height))
    }

    pub fn resize_by_width(&self, width: u32) -> Result<()> {
        self.with(|h| h.resize_by_width(width))
    }

    pub fn resize_by_height(&self, height: u32) -> Result<()> {
        self.with(|h| h.resize_by_height(height))
    }

    pub fn set_format(&self, name: impl Into<String>) -> Result<()> {
        self.with(|h| h.set_format(name))
    }

    pub fn set_quality(&self, quality: i32) {
        self.with(|h| h.set_quality(quality))
    }

    pub fn format(&self) -> String {
        self.with(|h| h.format().to_string())
    }

    pub fn quality(&self) -> u8 {
        self.with(|h| h.quality())
    }

    pub fn size(&self) -> ImageSize {
        self.with(|h| h.size())
    }

    pub fn width(&self) -> u32 {
        self.size().width
    }

    pub fn height(&self) -> u32 {
        self.size().height
    }

    pub fn raw_width(&self) -> u32 {
        self.with(|h| h.raw_width())
    }

    pub fn raw_height(&self) -> u32 {
        self.with(|h| h.raw_height())
    }

    /// Synchronous save on the calling thread.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.with(|h| h.commit(path.as_ref()))
    }
}

impl<L: ImageLibrary> fmt::Debug for SharedImage<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(handle) => f.debug_tuple("SharedImage").field(&*handle).finish(),
            Err(_) => f.write_str("SharedImage(<locked>)"),
        }
    }
}
