//! Image preprocessing for the food classifier.
//!
//! Raw upload bytes are decoded, forced to RGB, resized to the network's
//! square input and normalised with ImageNet statistics into a `[1, 3, H, W]`
//! tensor.

pub mod config;
pub mod decode;
pub mod error;
pub mod transform;

pub use config::{DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD};
pub use decode::decode_rgb;
pub use error::PreprocessError;
pub use transform::Transform;
