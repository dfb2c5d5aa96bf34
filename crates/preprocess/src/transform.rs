use crate::config::{DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD};
use crate::decode::decode_rgb;
use crate::error::PreprocessError;
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::Array4;

/// Fixed preprocessing pipeline: resize to a square input, scale to [0, 1],
/// then normalise per channel.
///
/// The values must match what the weights were trained against, so a
/// `Transform` is built once next to the model and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub input_size: (u32, u32),
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Transform {
    pub fn new(input_size: (u32, u32), mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            input_size,
            mean,
            std,
        }
    }

    /// ImageNet statistics at the given square resolution.
    pub fn imagenet(size: u32) -> Self {
        Self::new((size, size), IMAGENET_MEAN, IMAGENET_STD)
    }

    /// Decode encoded image bytes and produce the network input tensor.
    pub fn apply(&self, bytes: &[u8]) -> Result<Array4<f32>, PreprocessError> {
        let _s = span!("preprocess_image");

        let rgb = decode_rgb(bytes)?;
        let (width, height) = rgb.dimensions();
        self.apply_rgb(rgb.as_raw(), width, height)
    }

    /// Resize and normalise packed RGB8 pixels in HWC order.
    pub fn apply_rgb(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Array4<f32>, PreprocessError> {
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidDimensions { width, height });
        }

        let resized = self.resize(pixels, width, height)?;
        self.normalize(&resized)
    }

    // Antialiased bilinear convolution, the same resampling PIL applies for
    // a bilinear resize. The network is sensitive to resampling artifacts.
    fn resize(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Image<'static>, PreprocessError> {
        let _s = span!("resize");

        let (dst_width, dst_height) = self.input_size;
        if dst_width == 0 || dst_height == 0 {
            return Err(PreprocessError::InvalidDimensions {
                width: dst_width,
                height: dst_height,
            });
        }

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let mut resized = Image::new(dst_width, dst_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        tracing::trace!(
            src_width = width,
            src_height = height,
            dst_width,
            dst_height,
            "Resized image"
        );

        Ok(resized)
    }

    fn normalize(&self, image: &Image) -> Result<Array4<f32>, PreprocessError> {
        let _s = span!("normalize");

        let width = image.width() as usize;
        let height = image.height() as usize;
        let spatial = width * height;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in image.buffer().chunks_exact(3).enumerate() {
            for c in 0..3 {
                let value = px[c] as f32 / 255.0;
                output[i + c * spatial] = (value - self.mean[c]) / self.std[c];
            }
        }

        Ok(Array4::from_shape_vec((1, 3, height, width), output)?)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    // One 8-bit step after normalisation, resampling may round either way
    const PIXEL_TOLERANCE: f32 = 1.0 / 255.0 / 0.224 + 1e-4;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_default_matches_training_configuration() {
        let transform = Transform::default();
        assert_eq!(transform.input_size, (300, 300));
        assert_eq!(transform.mean, [0.485, 0.456, 0.406]);
        assert_eq!(transform.std, [0.229, 0.224, 0.225]);
        assert_eq!(transform, Transform::imagenet(300));
    }

    #[test]
    fn test_output_shape_is_nchw_with_batch_of_one() {
        let transform = Transform::default();

        for (w, h) in [(640, 480), (120, 400), (300, 300), (1, 1)] {
            let output = transform.apply(&png_bytes(w, h, [10, 20, 30])).unwrap();
            assert_eq!(output.shape(), &[1, 3, 300, 300], "input {}x{}", w, h);
        }
    }

    #[test]
    fn test_resize_ignores_aspect_ratio() {
        // Squashed, not letterboxed: every output pixel comes from the source
        let transform = Transform::imagenet(8);
        let output = transform.apply(&png_bytes(64, 4, [255, 255, 255])).unwrap();

        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        for value in output.index_axis(ndarray::Axis(1), 0).iter() {
            assert!((value - expected).abs() < PIXEL_TOLERANCE, "got {}", value);
        }
    }

    #[test]
    fn test_imagenet_normalization() {
        // Mid gray 128 -> 0.502 before normalisation
        let transform = Transform::imagenet(4);
        let output = transform.apply(&png_bytes(4, 4, [128, 128, 128])).unwrap();

        let gray = 128.0 / 255.0;
        for c in 0..3 {
            let expected = (gray - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            let actual = output[[0, c, 2, 2]];
            assert!(
                (actual - expected).abs() < PIXEL_TOLERANCE,
                "channel {} expected {} got {}",
                c,
                expected,
                actual
            );
        }
    }

    #[test]
    fn test_channels_stay_separated() {
        let transform = Transform::imagenet(2);
        let output = transform.apply(&png_bytes(2, 2, [255, 0, 0])).unwrap();

        let r = output[[0, 0, 0, 0]];
        let g = output[[0, 1, 0, 0]];
        let b = output[[0, 2, 0, 0]];

        assert!((r - (1.0 - 0.485) / 0.229).abs() < PIXEL_TOLERANCE);
        assert!((g - (0.0 - 0.456) / 0.224).abs() < PIXEL_TOLERANCE);
        assert!((b - (0.0 - 0.406) / 0.225).abs() < PIXEL_TOLERANCE);
    }

    #[test]
    fn test_apply_is_deterministic() {
        let transform = Transform::default();
        let bytes = png_bytes(97, 53, [12, 200, 77]);

        let first = transform.apply(&bytes).unwrap();
        let second = transform.apply(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_apply_rgb_rejects_zero_dimensions() {
        let transform = Transform::default();
        let result = transform.apply_rgb(&[], 0, 10);
        assert!(matches!(
            result,
            Err(PreprocessError::InvalidDimensions { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_apply_rgb_rejects_short_buffer() {
        let transform = Transform::default();
        let result = transform.apply_rgb(&[0u8; 10], 4, 4);
        assert!(matches!(result, Err(PreprocessError::ImageBuffer(_))));
    }

    #[test]
    fn test_invalid_bytes_surface_decode_error() {
        let transform = Transform::default();
        assert!(matches!(
            transform.apply(b"GIF89a"),
            Err(PreprocessError::Decode(_))
        ));
        assert!(matches!(
            transform.apply(&[]),
            Err(PreprocessError::EmptyInput)
        ));
    }
}
