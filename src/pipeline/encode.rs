//! Image encoding: raster image → base64 data URI.
//!
//! Vision chat APIs accept images as base64 data URIs embedded in the JSON
//! request body. The adapter is lossless relative to the in-memory image's
//! own re-serialisation: the image is written back in its original format
//! (PNG stays PNG, JPEG stays JPEG) with no resizing, recompression-quality
//! change, or colour-space conversion. Rasterised PDF pages have no source
//! format and are always encoded as PNG — lossless compression keeps the
//! fine print of dense shareholding diagrams legible to the model.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// A page image encoded for the vision request body.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// `data:image/<format>;base64,<payload>`
    pub data_uri: String,
    /// MIME type of the payload, e.g. `image/png`.
    pub mime_type: &'static str,
}

/// Failure to encode an image for the request body.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The bytes do not carry a recognisable image format tag.
    #[error("image carries no recognisable format tag")]
    UnknownFormat,

    /// The format is recognised but has no data-URI mapping here
    /// (only PNG and JPEG are accepted).
    #[error("unsupported image format {0:?} (expected PNG or JPEG)")]
    UnsupportedFormat(ImageFormat),

    /// The image could not be re-serialised in its own format.
    #[error("image re-serialisation failed: {0}")]
    Write(#[from] image::ImageError),
}

/// MIME type for the supported upload formats.
pub fn mime_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        _ => None,
    }
}

/// Encode a raster image as a base64 data URI in the given format.
///
/// The format must be PNG or JPEG; anything else fails with
/// [`EncodeError::UnsupportedFormat`] before any bytes are produced.
pub fn encode_image(img: &DynamicImage, format: ImageFormat) -> Result<EncodedImage, EncodeError> {
    let mime = mime_type(format).ok_or(EncodeError::UnsupportedFormat(format))?;

    let mut buf = Vec::new();
    // JPEG has no alpha channel; flatten before re-encoding.
    if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut Cursor::new(&mut buf), format)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)?;
    }

    let data_uri = format!("data:{};base64,{}", mime, STANDARD.encode(&buf));
    debug!("encoded image → {} bytes data URI ({})", data_uri.len(), mime);

    Ok(EncodedImage {
        data_uri,
        mime_type: mime,
    })
}

/// Sniff, decode, and re-encode uploaded image bytes.
///
/// The format tag comes from the bytes themselves (magic numbers), not the
/// file extension, matching how the in-memory image carries its format.
/// Unknown or unsupported formats fail here, before any network call is
/// attempted for the page. Bytes that sniff correctly but fail to decode
/// also fail here.
pub fn load_and_encode(bytes: &[u8]) -> Result<EncodedImage, EncodeError> {
    let format = image::guess_format(bytes).map_err(|_| EncodeError::UnknownFormat)?;
    mime_type(format).ok_or(EncodeError::UnsupportedFormat(format))?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    encode_image(&img, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 128, 255, 255])))
    }

    #[test]
    fn encode_png_produces_data_uri() {
        let encoded = encode_image(&test_image(), ImageFormat::Png).expect("encode");
        assert!(encoded.data_uri.starts_with("data:image/png;base64,"));
        assert_eq!(encoded.mime_type, "image/png");

        let payload = encoded.data_uri.split(',').nth(1).expect("payload");
        let decoded = STANDARD.decode(payload).expect("valid base64");
        assert_eq!(&decoded[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn encode_jpeg_flattens_alpha() {
        let encoded = encode_image(&test_image(), ImageFormat::Jpeg).expect("encode");
        assert!(encoded.data_uri.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn unsupported_format_fails_before_encoding() {
        let err = encode_image(&test_image(), ImageFormat::Gif).unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn garbage_bytes_have_no_format_tag() {
        let err = load_and_encode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EncodeError::UnknownFormat));
    }

    #[test]
    fn load_and_encode_round_trips_png_bytes() {
        let mut buf = Vec::new();
        test_image()
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        let encoded = load_and_encode(&buf).expect("load and encode");
        assert_eq!(encoded.mime_type, "image/png");
    }

    #[test]
    fn gif_magic_is_recognised_but_rejected() {
        // A GIF header sniffs as ImageFormat::Gif, which has no data-URI
        // mapping here, so the failure is UnsupportedFormat, not decode.
        let gif_header = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        let err = load_and_encode(gif_header).unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(_)));
    }
}
