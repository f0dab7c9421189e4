//! Photo downscaling and JPEG re-encoding ahead of upload.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::ApiError;

/// Widest image sent to the server; wider photos are scaled down.
pub const DEFAULT_MAX_IMAGE_WIDTH: u32 = 1024;
/// JPEG quality used for uploads, in percent.
pub const DEFAULT_IMAGE_QUALITY: u8 = 60;
/// Largest decoded payload accepted for upload.
pub const MAX_IMAGE_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Decodes `bytes`, scales the image down to `max_width` keeping its aspect
/// ratio, and re-encodes it as a JPEG data URL.
///
/// Images already narrower than `max_width` keep their size. Transparency is
/// dropped.
///
/// # Errors
/// - [`ApiError::Image`] when the input cannot be decoded or encoded.
/// - [`ApiError::ImageTooLarge`] when the result exceeds
///   [`MAX_IMAGE_PAYLOAD_BYTES`].
pub fn compress_image(bytes: &[u8], max_width: u32, quality: u8) -> Result<String, ApiError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|error| ApiError::Image(error.to_string()))?;

    let (width, height) = decoded.dimensions();
    let scaled = if max_width > 0 && width > max_width {
        let new_height = scaled_height(width, height, max_width);
        decoded.resize_exact(max_width, new_height, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());

    let mut encoded = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|error| ApiError::Image(error.to_string()))?;

    let data_url = format!("{DATA_URL_PREFIX}{}", STANDARD.encode(encoded.into_inner()));
    let actual = estimated_payload_bytes(&data_url);
    if actual > MAX_IMAGE_PAYLOAD_BYTES {
        return Err(ApiError::ImageTooLarge {
            limit: MAX_IMAGE_PAYLOAD_BYTES,
            actual,
        });
    }
    Ok(data_url)
}

/// Estimates the decoded size of a base64 payload, with or without a data URL
/// prefix.
pub fn estimated_payload_bytes(encoded: &str) -> usize {
    let payload = encoded
        .split_once(";base64,")
        .map_or(encoded, |(_, payload)| payload);
    payload.len() * 3 / 4
}

fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let scaled = u64::from(height) * u64::from(max_width) / u64::from(width);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    //! Unit tests for the sizing helpers.

    use super::*;

    #[test]
    fn scaled_height_keeps_aspect_ratio() {
        assert_eq!(scaled_height(2048, 1536, 1024), 768);
        assert_eq!(scaled_height(4000, 1, 1024), 1);
    }

    #[test]
    fn payload_estimate_ignores_data_url_prefix() {
        assert_eq!(estimated_payload_bytes("data:image/jpeg;base64,AAAA"), 3);
        assert_eq!(estimated_payload_bytes("AAAAAAAA"), 6);
    }
}
