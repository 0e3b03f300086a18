//! Image normalization to web-friendly JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use super::MediaError;

/// Re-encode an image as JPEG at `quality`, scaling it down so neither side
/// exceeds `max_dimension`. Alpha is flattened.
pub fn normalize_image(bytes: &[u8], quality: u8, max_dimension: u32) -> Result<Vec<u8>, MediaError> {
    let img = image::load_from_memory(bytes)?;

    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = img.to_rgb8();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(&rgb)?;
    Ok(out)
}

/// Pixel dimensions of an encoded image.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), MediaError> {
    let img = image::load_from_memory(bytes)?;
    Ok((img.width(), img.height()))
}
