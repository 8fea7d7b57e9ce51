// src/engine/decoder.rs
//
// Decoder operations for the image-crate library: map the file, sniff the
// format, check header dimensions against the limits, then decode.

use crate::engine::limits::DecodeLimits;
use crate::error::{Access, ErrorKind};
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use memmap2::Mmap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

type DecoderResult<T> = std::result::Result<T, ErrorKind>;

/// Map `path` into memory.
///
/// Directories and empty files are rejected before mapping; neither can be
/// decoded and mapping a zero-length file fails on some platforms.
pub fn map_source(path: &Path, limits: &DecodeLimits) -> DecoderResult<Mmap> {
    let file = File::open(path).map_err(|e| ErrorKind::from_io_error(&e, Access::Read))?;
    let metadata = file
        .metadata()
        .map_err(|e| ErrorKind::from_io_error(&e, Access::Read))?;
    if metadata.is_dir() {
        return Err(ErrorKind::FileIsDirectory);
    }
    if metadata.len() == 0 {
        return Err(ErrorKind::NoLoaderForFileFormat);
    }
    limits.enforce_source_len(metadata.len())?;

    // Safety: the file is assumed not to be modified externally while the
    // handle is loading. If it is, decoding may fail or read torn data.
    unsafe { Mmap::map(&file) }.map_err(|e| ErrorKind::from_io_error(&e, Access::Read))
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

pub fn format_to_string(fmt: ImageFormat) -> String {
    match fmt {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Avif => "avif",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Tiff => "tiff",
        other => other.extensions_str().first().copied().unwrap_or("unknown"),
    }
    .to_string()
}

/// Read width and height from the header without decoding pixels.
pub fn read_dimensions(bytes: &[u8]) -> DecoderResult<(u32, u32)> {
    reader_for(bytes)?
        .into_dimensions()
        .map_err(|e| map_image_error(&e))
}

/// Width, height and format of the file at `path`, without decoding pixels.
pub fn inspect_path(path: &Path) -> DecoderResult<(u32, u32, ImageFormat)> {
    let source = map_source(path, &DecodeLimits::unlimited())?;
    let format = detect_format(&source).ok_or(ErrorKind::NoLoaderForFileFormat)?;
    let (width, height) = read_dimensions(&source)?;
    Ok((width, height, format))
}

/// Decode `bytes`, enforcing `limits` on the header dimensions first.
pub fn decode_image(bytes: &[u8], limits: &DecodeLimits) -> DecoderResult<(DynamicImage, ImageFormat)> {
    let format = detect_format(bytes).ok_or(ErrorKind::NoLoaderForFileFormat)?;

    let (width, height) = read_dimensions(bytes)?;
    limits.enforce_dimensions(width, height)?;

    let mut reader = reader_for(bytes)?;
    if limits.max_pixels.is_none() && limits.max_dimension.is_none() {
        reader.no_limits();
    }
    let img = reader.decode().map_err(|e| map_image_error(&e))?;
    Ok((img, format))
}

fn reader_for(bytes: &[u8]) -> DecoderResult<ImageReader<Cursor<&[u8]>>> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ErrorKind::from_io_error(&e, Access::Read))
}

/// Map an image-crate failure onto the taxonomy.
pub fn map_image_error(err: &ImageError) -> ErrorKind {
    match err {
        ImageError::Unsupported(_) | ImageError::Decoding(_) => ErrorKind::NoLoaderForFileFormat,
        ImageError::Limits(_) => ErrorKind::OutOfMemory,
        ImageError::IoError(io) => match io.kind() {
            // Truncated streams surface as I/O errors from the decoders.
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                ErrorKind::NoLoaderForFileFormat
            }
            _ => ErrorKind::from_io_error(io, Access::Read),
        },
        ImageError::Parameter(_) | ImageError::Encoding(_) => ErrorKind::Unknown,
    }
}
