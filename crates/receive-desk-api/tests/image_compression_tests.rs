//! Integration tests for photo compression before upload.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{GenericImageView, ImageFormat, Rgba, RgbaImage};
use receive_desk_api::{
    ApiError, DEFAULT_IMAGE_QUALITY, DEFAULT_MAX_IMAGE_WIDTH, compress_image,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([40, 120, 200, 128]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("png encodes");
    bytes.into_inner()
}

fn decode_data_url(data_url: &str) -> image::DynamicImage {
    let payload = data_url
        .strip_prefix("data:image/jpeg;base64,")
        .expect("jpeg data url");
    let bytes = STANDARD.decode(payload).expect("valid base64");
    image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).expect("valid jpeg")
}

#[test]
fn image_compression_tests_wide_photo_is_scaled_to_max_width() {
    let data_url = compress_image(&png(2048, 1024), DEFAULT_MAX_IMAGE_WIDTH, DEFAULT_IMAGE_QUALITY)
        .expect("compresses");

    assert_eq!(decode_data_url(&data_url).dimensions(), (1024, 512));
}

#[test]
fn image_compression_tests_narrow_photo_keeps_size() {
    let data_url =
        compress_image(&png(300, 200), DEFAULT_MAX_IMAGE_WIDTH, DEFAULT_IMAGE_QUALITY)
            .expect("compresses");

    assert_eq!(decode_data_url(&data_url).dimensions(), (300, 200));
}

#[test]
fn image_compression_tests_rejects_non_images() {
    let result = compress_image(b"not an image", DEFAULT_MAX_IMAGE_WIDTH, DEFAULT_IMAGE_QUALITY);

    assert!(matches!(result, Err(ApiError::Image(_))));
}
