// src/engine/encoder.rs
//
// Encoder operations: target format resolution, JPEG/PNG/WebP encoding and
// the atomic file write used by every save.

use crate::engine::decoder::map_image_error;
use crate::error::{Access, ErrorKind};
use crate::ops::SaveAttributes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

type EncoderResult<T> = std::result::Result<T, ErrorKind>;

/// Formats a save may produce.
pub const OUTPUT_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Pick the output format.
///
/// Precedence: the explicit format attribute, then the destination's
/// extension, then the format detected at load.
pub fn resolve_format(path: &Path, attrs: &SaveAttributes<'_>) -> EncoderResult<ImageFormat> {
    let format = if let Some(name) = attrs.format {
        ImageFormat::from_extension(name)
    } else {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
            .or_else(|| ImageFormat::from_extension(attrs.source_format))
    };

    match format {
        Some(fmt) if OUTPUT_FORMATS.contains(&fmt) => Ok(fmt),
        _ => Err(ErrorKind::NoLoaderForFileFormat),
    }
}

/// Encode `img` in `format`. Quality applies to JPEG only; PNG is lossless and
/// the WebP encoder available here is lossless.
pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> EncoderResult<Vec<u8>> {
    match format {
        ImageFormat::Jpeg => encode_jpeg(img, quality),
        ImageFormat::Png => encode_png(img),
        ImageFormat::WebP => encode_webp(img),
        _ => Err(ErrorKind::NoLoaderForFileFormat),
    }
}

/// Encode to JPEG. JPEG has no alpha, so everything goes through RGB8.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    // The encoder accepts 1..=100
    let quality = quality.clamp(1, 100);
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| map_image_error(&e))?;
    Ok(buf)
}

pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    let mut buf = Vec::new();
    let result = match img {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba8(
            img.to_rgba8(),
        )
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
        _ => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png),
    };
    result.map_err(|e| map_image_error(&e))?;
    Ok(buf)
}

/// Encode to WebP. Avoids an alpha channel when the source has none.
pub fn encode_webp(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    let converted = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => None,
        other if other.color().has_alpha() => Some(DynamicImage::ImageRgba8(other.to_rgba8())),
        other => Some(DynamicImage::ImageRgb8(other.to_rgb8())),
    };
    let source = converted.as_ref().unwrap_or(img);

    let mut buf = Vec::new();
    source
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)
        .map_err(|e| map_image_error(&e))?;
    Ok(buf)
}

/// Write `data` to `path` atomically.
///
/// The temp file lives in the destination directory so the final rename
/// never crosses filesystems. On failure nothing appears at `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> EncoderResult<()> {
    let output_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(output_dir)
        .map_err(|e| ErrorKind::from_io_error(&e, Access::Write))?;
    temp_file
        .write_all(data)
        .map_err(|e| ErrorKind::from_io_error(&e, Access::Write))?;
    temp_file
        .as_file_mut()
        .sync_all()
        .map_err(|e| ErrorKind::from_io_error(&e, Access::Write))?;

    // tempfile removes the temp file if the rename fails
    temp_file
        .persist(path)
        .map_err(|e| ErrorKind::from_io_error(&e.error, Access::Write))?;

    debug!(path = %path.display(), bytes = data.len(), "wrote image");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage, RgbaImage};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn attrs<'a>(format: Option<&'a str>, source_format: &'a str) -> SaveAttributes<'a> {
        SaveAttributes {
            quality: 90,
            format,
            source_format,
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn explicit_format_wins_over_extension() {
            let fmt = resolve_format(Path::new("out.jpg"), &attrs(Some("png"), "jpeg")).unwrap();
            assert_eq!(fmt, ImageFormat::Png);
        }

        #[test]
        fn extension_wins_over_source_format() {
            let fmt = resolve_format(Path::new("out.webp"), &attrs(None, "png")).unwrap();
            assert_eq!(fmt, ImageFormat::WebP);
        }

        #[test]
        fn source_format_is_last_resort() {
            let fmt = resolve_format(Path::new("out"), &attrs(None, "jpeg")).unwrap();
            assert_eq!(fmt, ImageFormat::Jpeg);
            let fmt = resolve_format(Path::new("out.unknownext"), &attrs(None, "png")).unwrap();
            assert_eq!(fmt, ImageFormat::Png);
        }

        #[test]
        fn unsupported_target_has_no_saver() {
            let err = resolve_format(Path::new("out.gif"), &attrs(None, "png")).unwrap_err();
            assert_eq!(err, ErrorKind::NoLoaderForFileFormat);
            let err = resolve_format(Path::new("out.png"), &attrs(Some("bogus"), "png")).unwrap_err();
            assert_eq!(err, ErrorKind::NoLoaderForFileFormat);
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_encode_jpeg_produces_valid_jpeg() {
            let result = encode_jpeg(&create_test_image(100, 100), 80).unwrap();
            assert_eq!(&result[0..2], &[0xFF, 0xD8]);
            assert_eq!(&result[result.len() - 2..], &[0xFF, 0xD9]);
        }

        #[test]
        fn test_encode_jpeg_quality_zero_is_accepted() {
            let result = encode_jpeg(&create_test_image(16, 16), 0).unwrap();
            assert_eq!(&result[0..2], &[0xFF, 0xD8]);
        }

        #[test]
        fn test_encode_jpeg_drops_alpha() {
            let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 4])));
            let encoded = encode(&rgba, ImageFormat::Jpeg, 75).unwrap();
            let decoded = image::load_from_memory(&encoded).unwrap();
            assert_eq!(decoded.dimensions(), (8, 8));
        }

        #[test]
        fn test_encode_png_and_webp_round_trip_dimensions() {
            let img = create_test_image(12, 7);
            for format in [ImageFormat::Png, ImageFormat::WebP] {
                let encoded = encode(&img, format, 100).unwrap();
                let decoded = image::load_from_memory(&encoded).unwrap();
                assert_eq!(decoded.dimensions(), (12, 7), "{format:?}");
            }
        }
    }

    mod write_tests {
        use super::*;

        #[test]
        fn write_atomic_creates_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.bin");
            write_atomic(&path, b"payload").unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"payload");
            // only the target remains
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        }

        #[test]
        fn write_atomic_missing_directory() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("missing").join("out.bin");
            assert_eq!(
                write_atomic(&path, b"x").unwrap_err(),
                ErrorKind::PathComponentNonExistent
            );
        }
    }
}
