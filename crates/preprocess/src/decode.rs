use crate::error::PreprocessError;
use common::span_debug;
use image::RgbImage;

/// Decode an encoded image (JPEG, PNG, GIF, WebP, BMP) into packed RGB8.
///
/// Grayscale is expanded to three channels. Alpha is dropped, not composited
/// onto a background. Animated formats yield their first frame.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let _s = span_debug!("decode_rgb");

    if bytes.is_empty() {
        return Err(PreprocessError::EmptyInput);
    }

    let decoded = image::load_from_memory(bytes)?;
    let rgb = decoded.to_rgb8();

    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessError::InvalidDimensions { width, height });
    }

    tracing::trace!(
        width,
        height,
        source_color = ?decoded.color(),
        encoded_bytes = bytes.len(),
        "Decoded image"
    );

    Ok(rgb)
}
